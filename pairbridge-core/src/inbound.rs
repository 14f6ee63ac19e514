//! Inbound frame grammar (§6 of the spec): a JSON object tagged by `type`.
//!
//! Frames whose fields are purely relayed verbatim to a peer (`status`,
//! `get_status`, `get_config`, `config`) keep their raw [`serde_json::Value`]
//! rather than being destructured into a struct — the router never needs to
//! look inside them, and re-serializing a struct would only risk losing a
//! field a future client adds.

use serde::Deserialize;
use serde_json::Value;

use crate::CoreError;

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayAuth {
    pub timestamp: String,
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppAuth {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinFrame {
    pub code: Option<String>,
    #[serde(rename = "clientType")]
    pub client_type: Option<String>,
    pub serial: Option<String>,
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub auth: Option<DisplayAuth>,
    #[serde(default)]
    pub app_auth: Option<AppAuth>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeFrame {
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandFrame {
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    pub command: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandResponseFrame {
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebugLogFrame {
    pub level: Option<String>,
    pub log_message: Option<String>,
    #[serde(default)]
    pub log_metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum Inbound {
    Join(JoinFrame),
    Subscribe(SubscribeFrame),
    Ping,
    Status(Value),
    Command(CommandFrame),
    CommandResponse(CommandResponseFrame),
    GetStatus(Value),
    GetConfig(Value),
    Config(Value),
    DebugLog(DebugLogFrame),
    SubscribeDebug,
    /// Recognized-but-unparseable or genuinely unknown `type` value. Logged
    /// at debug and dropped by the router, never an error to the client.
    Unknown(String),
}

/// Parses one text frame into a tagged [`Inbound`] variant.
///
/// Malformed JSON or a frame missing `type` is a [`CoreError`] — the caller
/// (the session's reader loop) logs and discards it without replying, per
/// spec.md §4.1.
pub fn decode_inbound(text: &str) -> Result<Inbound, CoreError> {
    let value: Value = serde_json::from_str(text)?;
    let type_ = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CoreError::MissingType)?
        .to_owned();

    let inbound = match type_.as_str() {
        "join" => Inbound::Join(serde_json::from_value(value)?),
        "subscribe" => Inbound::Subscribe(serde_json::from_value(value)?),
        "ping" => Inbound::Ping,
        "status" => Inbound::Status(value),
        "command" => Inbound::Command(serde_json::from_value(value)?),
        "command_response" => Inbound::CommandResponse(serde_json::from_value(value)?),
        "get_status" => Inbound::GetStatus(value),
        "get_config" => Inbound::GetConfig(value),
        "config" => Inbound::Config(value),
        "debug_log" => Inbound::DebugLog(serde_json::from_value(value)?),
        "subscribe_debug" => Inbound::SubscribeDebug,
        other => Inbound::Unknown(other.to_owned()),
    };
    Ok(inbound)
}
