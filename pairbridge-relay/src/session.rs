//! Client Session (§4.1): per-connection state, exclusively owned by that
//! connection's reader task. Room and the Command Correlator never hold
//! this struct — only a session id and a clone of its outbound channel
//! (see [`crate::room::Occupant`]), the "weak reference" §9 calls for.

use std::sync::Arc;

use axum::extract::ws::Message;
use pairbridge_core::{ClientKind, DeviceId, RoomCode, SerialNumber};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Bound on a session's outbound queue (§5 Backpressure). Large enough to
/// absorb a burst of relayed frames; once it's full the peer is too slow to
/// keep up and the policy is to remove it, not to pin memory waiting on it.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 128;

/// A session's outbound half: a bounded queue plus a `kill` signal the
/// writer task (`socket.rs`) also selects on. Room and the Correlator only
/// ever hold a clone of this, never the socket — §3's "weak reference".
#[derive(Debug, Clone)]
pub struct OutboundTx {
    tx: mpsc::Sender<Message>,
    kill: Arc<Notify>,
}

impl OutboundTx {
    pub fn new(tx: mpsc::Sender<Message>, kill: Arc<Notify>) -> Self {
        Self { tx, kill }
    }

    /// Enqueues a frame. A full queue means the peer can't keep up with the
    /// rate frames are being relayed to it; rather than block the router
    /// (which would stall every other room) or grow without bound, the slow
    /// session is closed and the enqueue itself is reported as failed.
    pub fn send(&self, message: Message) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.kill.notify_one();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unset,
    Display,
    App,
}

impl Role {
    pub fn kind(self) -> Option<ClientKind> {
        match self {
            Role::Display => Some(ClientKind::Display),
            Role::App => Some(ClientKind::App),
            Role::Unset => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AuthContext {
    Anonymous,
    Verified { device_id: DeviceId },
}

/// One WebSocket connection's state machine: `CONNECTED` is `role ==
/// Unset`, `JOINED` is `role != Unset`, `CLOSED` is reached by dropping the
/// session out of the reader loop — there is no explicit terminal variant
/// because nothing refers to a session after its task ends.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub tx: OutboundTx,
    pub role: Role,
    pub room_code: Option<RoomCode>,
    pub device_id: Option<DeviceId>,
    pub serial_number: Option<SerialNumber>,
    pub auth: AuthContext,
}

impl Session {
    pub fn new(id: Uuid, tx: OutboundTx) -> Self {
        Self {
            id,
            tx,
            role: Role::Unset,
            room_code: None,
            device_id: None,
            serial_number: None,
            auth: AuthContext::Anonymous,
        }
    }

    /// `(room_code, sender_kind)` if this session is currently `JOINED`.
    pub fn room_membership(&self) -> Option<(RoomCode, ClientKind)> {
        let code = self.room_code.clone()?;
        let kind = self.role.kind()?;
        Some((code, kind))
    }
}
