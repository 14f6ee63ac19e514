//! Room Manager (§4.3): maps a pairing code to at most one display and at
//! most one app. A single `RwLock` around the whole table is the teacher's
//! `RelayState` pattern (`cliprelay-relay`'s `AppState`/`RelayState` split) —
//! critical sections here stay lookup/mutation only, never I/O, per §5.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use pairbridge_core::{ClientKind, RoomCode};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::session::OutboundTx;

/// What the Room Manager remembers about an occupant — enough to route to
/// it and to recognize it again later, nothing it would need I/O to use.
#[derive(Debug, Clone)]
pub struct Occupant {
    pub session_id: Uuid,
    pub tx: OutboundTx,
}

impl Occupant {
    pub fn new(session_id: Uuid, tx: OutboundTx) -> Self {
        Self { session_id, tx }
    }

    /// Best-effort liveness check backed by the outbound channel: once the
    /// connection's writer task exits, the channel's receiver drops and the
    /// sender reports closed. This stands in for checking WebSocket
    /// ready-state without holding any lock across I/O.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Debug, Default)]
struct Room {
    display: Option<Occupant>,
    app: Option<Occupant>,
    #[allow(dead_code)]
    created_at: Option<Instant>,
}

impl Room {
    fn slot(&self, kind: ClientKind) -> &Option<Occupant> {
        match kind {
            ClientKind::Display => &self.display,
            ClientKind::App => &self.app,
        }
    }

    fn slot_mut(&mut self, kind: ClientKind) -> &mut Option<Occupant> {
        match kind {
            ClientKind::Display => &mut self.display,
            ClientKind::App => &mut self.app,
        }
    }

    fn is_empty(&self) -> bool {
        self.display.is_none() && self.app.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Occupancy {
    pub display_connected: bool,
    pub app_connected: bool,
}

pub enum JoinOutcome {
    Joined { occupancy: Occupancy, peer: Option<Occupant> },
    /// The requested slot already holds a live occupant — §9's resolved
    /// Open Question: reject the newcomer rather than evict the incumbent.
    SlotOccupied,
}

#[derive(Debug, Clone, Default)]
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<RoomCode, Room>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(&self, code: &RoomCode, kind: ClientKind, occupant: Occupant) -> JoinOutcome {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(code.clone()).or_default();

        if let Some(existing) = room.slot(kind) {
            if existing.is_open() {
                return JoinOutcome::SlotOccupied;
            }
        }

        *room.slot_mut(kind) = Some(occupant);
        if room.created_at.is_none() {
            room.created_at = Some(Instant::now());
        }

        let peer = room.slot(kind.opposite()).clone();
        JoinOutcome::Joined {
            occupancy: Occupancy {
                display_connected: room.display.is_some(),
                app_connected: room.app.is_some(),
            },
            peer,
        }
    }

    /// Clears `session_id`'s slot (a no-op if it no longer occupies it —
    /// e.g. it was already evicted by a newer join) and deletes the room if
    /// both slots end up empty. Returns the peer to notify, if any.
    pub async fn leave(&self, code: &RoomCode, kind: ClientKind, session_id: Uuid) -> Option<Occupant> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code)?;

        if matches!(room.slot(kind), Some(occupant) if occupant.session_id == session_id) {
            *room.slot_mut(kind) = None;
        }

        let peer = room.slot(kind.opposite()).clone();
        if room.is_empty() {
            rooms.remove(code);
        }
        peer
    }

    /// The current occupant of the slot opposite `sender_kind`, i.e. the
    /// peer a message from `sender_kind` should be routed to.
    pub async fn peer_of(&self, code: &RoomCode, sender_kind: ClientKind) -> Option<Occupant> {
        let rooms = self.rooms.read().await;
        rooms.get(code)?.slot(sender_kind.opposite()).clone()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

trait Opposite {
    fn opposite(self) -> Self;
}

impl Opposite for ClientKind {
    fn opposite(self) -> Self {
        match self {
            ClientKind::Display => ClientKind::App,
            ClientKind::App => ClientKind::Display,
        }
    }
}
