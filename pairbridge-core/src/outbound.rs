//! Outbound frame grammar (§6 of the spec).
//!
//! Every variant the broker itself synthesizes is represented explicitly;
//! frames relayed verbatim from one peer to the other (`status`, `config`,
//! `get_status`, `get_config`, and peer-originated `command`/
//! `command_response`) are never round-tripped through this enum — the
//! router re-emits the sender's original [`serde_json::Value`] directly, so
//! a field this broker doesn't know about still reaches the peer intact.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionData {
    pub webex: &'static str,
    pub clients: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinedData {
    pub code: String,
    #[serde(rename = "clientType")]
    pub client_type: &'static str,
    #[serde(rename = "displayConnected")]
    pub display_connected: bool,
    #[serde(rename = "appConnected")]
    pub app_connected: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "connection")]
    Connection { data: ConnectionData, timestamp: String },
    #[serde(rename = "joined")]
    Joined { data: JoinedData },
    #[serde(rename = "peer_connected")]
    PeerConnected {
        #[serde(rename = "peerType")]
        peer_type: &'static str,
    },
    #[serde(rename = "peer_disconnected")]
    PeerDisconnected {
        #[serde(rename = "peerType")]
        peer_type: &'static str,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "command_response")]
    CommandResponse {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "debug_subscribed")]
    DebugSubscribed,
    #[serde(rename = "error")]
    Error { message: String },
}

impl Outbound {
    pub fn error(message: impl Into<String>) -> Self {
        Outbound::Error { message: message.into() }
    }

    pub fn command_response_failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Outbound::CommandResponse {
            request_id: request_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Encodes an outbound frame as the text that goes on the wire.
pub fn encode_outbound(message: &Outbound) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
