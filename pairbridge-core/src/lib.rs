//! Wire protocol for the pairing relay broker.
//!
//! Splits cleanly from `pairbridge-relay`: this crate owns the JSON frame
//! shapes and has no notion of sockets, rooms, or auth — just encode/decode.

pub mod inbound;
pub mod outbound;

use thiserror::Error;

/// Pairing codes are short, uppercase, alphanumeric.
pub const PAIRING_CODE_LEN: usize = 6;

pub type RoomCode = String;
pub type RequestId = String;
pub type DeviceId = String;
pub type SerialNumber = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    Display,
    App,
}

impl ClientKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientKind::Display => "display",
            ClientKind::App => "app",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "display" => Some(ClientKind::Display),
            "app" => Some(ClientKind::App),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed JSON frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame missing a \"type\" field")]
    MissingType,
}

/// Uppercases and trims a pairing code. Does not otherwise validate it —
/// the room manager decides whether an unknown code is created or rejected.
pub fn normalize_code(raw: &str) -> RoomCode {
    raw.trim().to_ascii_uppercase()
}
