//! Command Correlator (§4.5): tracks app-issued commands awaiting a
//! display response, keyed by `(room, request_id)` to avoid cross-room
//! collisions per §9's re-architecture note.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pairbridge_core::{RequestId, RoomCode};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct PendingEntry {
    app_session_id: Uuid,
    created_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct CommandCorrelator {
    pending: Arc<RwLock<HashMap<(RoomCode, RequestId), PendingEntry>>>,
}

impl CommandCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, code: RoomCode, request_id: RequestId, app_session_id: Uuid) {
        self.pending
            .write()
            .await
            .insert((code, request_id), PendingEntry { app_session_id, created_at: Instant::now() });
    }

    /// Removes and returns the owning app session id, if the entry exists.
    /// A miss (unknown `request_id`, already-answered, or already-expired)
    /// is not an error — callers drop silently per §8's boundary behavior.
    pub async fn take(&self, code: &RoomCode, request_id: &str) -> Option<Uuid> {
        self.pending
            .write()
            .await
            .remove(&(code.clone(), request_id.to_owned()))
            .map(|entry| entry.app_session_id)
    }

    /// Drops every entry owned by `app_session_id` — called on app
    /// disconnect. No synthetic response is sent to the departed app.
    pub async fn drop_owned_by(&self, app_session_id: Uuid) {
        self.pending.write().await.retain(|_, entry| entry.app_session_id != app_session_id);
    }

    /// Removes and returns entries older than `timeout`, for the optional
    /// timeout sweep described as a MAY in §4.5.
    pub async fn sweep_expired(&self, timeout: Duration) -> Vec<(RoomCode, RequestId, Uuid)> {
        let now = Instant::now();
        let mut pending = self.pending.write().await;
        let expired_keys: Vec<(RoomCode, RequestId)> = pending
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.created_at) >= timeout)
            .map(|(key, _)| key.clone())
            .collect();

        expired_keys
            .into_iter()
            .filter_map(|key| {
                let entry = pending.remove(&key)?;
                Some((key.0, key.1, entry.app_session_id))
            })
            .collect()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }
}
