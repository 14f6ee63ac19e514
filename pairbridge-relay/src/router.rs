//! Message Router (§4.4): dispatches a decoded [`Inbound`] frame by type,
//! enforcing the sender-role constraint each type carries and relaying to
//! the session's peer.

use axum::extract::ws::Message;
use pairbridge_core::inbound::{CommandFrame, CommandResponseFrame, DebugLogFrame, Inbound, JoinFrame, SubscribeFrame};
use pairbridge_core::outbound::{ConnectionData, JoinedData, Outbound};
use pairbridge_core::{normalize_code, ClientKind, RoomCode};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::identity::AuthOutcome;
use crate::registry::DeviceRecord;
use crate::room::{JoinOutcome, Occupant};
use crate::session::{AuthContext, Role, Session};
use crate::AppState;

pub async fn dispatch(state: &AppState, session: &mut Session, inbound: Inbound) {
    match inbound {
        Inbound::Join(frame) => handle_join(state, session, frame).await,
        Inbound::Subscribe(frame) => handle_subscribe(session, frame),
        Inbound::Ping => send_outbound(&session.tx, &Outbound::Pong),
        Inbound::SubscribeDebug => handle_subscribe_debug(state, session).await,
        Inbound::Status(value) => handle_status(state, session, value).await,
        Inbound::GetStatus(value) => handle_get(state, session, value, "get_status").await,
        Inbound::GetConfig(value) => handle_get(state, session, value, "get_config").await,
        Inbound::Config(value) => handle_config(state, session, value).await,
        Inbound::Command(frame) => handle_command(state, session, frame).await,
        Inbound::CommandResponse(frame) => handle_command_response(state, session, frame).await,
        Inbound::DebugLog(frame) => handle_debug_log(state, session, frame).await,
        Inbound::Unknown(kind) => debug!("dropping unknown inbound frame type {}", kind),
    }
}

/// Emitted once per connection, right after the WebSocket upgrade.
pub fn connection_frame(live_clients: usize, timestamp: String) -> Outbound {
    Outbound::Connection { data: ConnectionData { webex: "connected", clients: live_clients }, timestamp }
}

fn handle_subscribe(session: &mut Session, frame: SubscribeFrame) {
    // Logging hint only (§9 Open Question): never changes auth context.
    session.device_id = frame.device_id;
}

async fn handle_subscribe_debug(state: &AppState, session: &Session) {
    if state.config.bridge_debug_subscribe_enabled() {
        send_outbound(&session.tx, &Outbound::DebugSubscribed);
    } else {
        send_outbound(&session.tx, &Outbound::error("subscribe_debug is deprecated and disabled"));
    }
}

async fn handle_join(state: &AppState, session: &mut Session, frame: JoinFrame) {
    if session.role != Role::Unset {
        debug!("session {} sent a repeat join while already joined", session.id);
        return;
    }

    let (Some(code_raw), Some(client_type_raw)) = (frame.code.as_deref(), frame.client_type.as_deref()) else {
        send_outbound(&session.tx, &Outbound::error("Missing code or clientType"));
        return;
    };

    let Some(kind) = ClientKind::from_wire(client_type_raw) else {
        send_outbound(&session.tx, &Outbound::error("Missing code or clientType"));
        return;
    };

    let decision = authenticate(state, kind, &frame).await;
    let device = match decision {
        AuthDecision::Rejected(message) => {
            send_outbound(&session.tx, &Outbound::error(message));
            return;
        }
        AuthDecision::Allowed { device } => device,
    };

    // The device id that authentication actually vouched for — distinct
    // from `session.device_id` below, which a client can set to anything
    // via the declared `deviceId` field and is a logging hint only (§9).
    let verified_device_id = device.as_ref().map(|d| d.device_id.clone());

    if let Some(device) = &device {
        state.registry.upsert(device.clone()).await;
        session.serial_number = Some(device.serial_number.clone());
        session.auth = AuthContext::Verified { device_id: device.device_id.clone() };
    }
    session.device_id = frame.device_id.clone().or_else(|| verified_device_id.clone());

    let code: RoomCode = normalize_code(code_raw);

    // §3: `pairing_code` is "the canonical code this display will use" —
    // an app's token likewise "grant[s] access to a specific pairing code"
    // per §4.2. When auth resolved a device record, the joiner must use
    // that device's own code rather than one it merely typed in.
    if let Some(device) = &device {
        let expected = normalize_code(&device.pairing_code);
        if !expected.is_empty() && expected != code {
            send_outbound(&session.tx, &Outbound::error("Pairing code does not match the authorized device"));
            return;
        }
    }

    let occupant = Occupant::new(session.id, session.tx.clone());

    match state.rooms.join(&code, kind, occupant).await {
        JoinOutcome::SlotOccupied => {
            let message = match kind {
                ClientKind::Display => "Display already connected",
                ClientKind::App => "App already connected",
            };
            send_outbound(&session.tx, &Outbound::error(message));
        }
        JoinOutcome::Joined { occupancy, peer } => {
            session.role = match kind {
                ClientKind::Display => Role::Display,
                ClientKind::App => Role::App,
            };
            session.room_code = Some(code.clone());

            send_outbound(
                &session.tx,
                &Outbound::Joined {
                    data: JoinedData {
                        code: code.clone(),
                        client_type: kind.as_str(),
                        display_connected: occupancy.display_connected,
                        app_connected: occupancy.app_connected,
                    },
                },
            );

            if let Some(peer) = peer {
                if peer.is_open() {
                    send_outbound(&peer.tx, &Outbound::PeerConnected { peer_type: kind.as_str() });
                }
            }

            info!("{} joined room {} (session {})", kind.as_str(), code, session.id);

            // §4.3 step 7: only when authentication yielded a device record —
            // never for a merely-declared `deviceId` the client asserted.
            if kind == ClientKind::Display {
                if let Some(device_id) = verified_device_id {
                    let identity = state.identity.clone();
                    tokio::spawn(async move {
                        identity.update_device_last_seen(&device_id).await;
                    });
                }
            }
        }
    }
}

enum AuthDecision {
    Allowed { device: Option<DeviceRecord> },
    Rejected(&'static str),
}

async fn authenticate(state: &AppState, kind: ClientKind, frame: &JoinFrame) -> AuthDecision {
    match kind {
        ClientKind::Display => match (&frame.serial, &frame.auth) {
            (Some(serial), Some(auth)) => {
                let outcome = call_with_budget(state, state.identity.validate_device_auth(serial, &auth.timestamp, &auth.signature)).await;
                decide(state, outcome, "Authentication failed")
            }
            _ => {
                if state.config.require_device_auth() {
                    AuthDecision::Rejected("Authentication required for display devices")
                } else {
                    AuthDecision::Allowed { device: None }
                }
            }
        },
        ClientKind::App => match &frame.app_auth {
            Some(app_auth) => {
                let outcome = call_with_budget(state, state.identity.validate_app_token(&app_auth.token)).await;
                decide(state, outcome, "App authentication failed")
            }
            None => {
                if state.config.require_device_auth() {
                    AuthDecision::Rejected("Authentication required")
                } else {
                    AuthDecision::Allowed { device: None }
                }
            }
        },
    }
}

async fn call_with_budget<F>(state: &AppState, future: F) -> Option<AuthOutcome>
where
    F: std::future::Future<Output = Result<AuthOutcome, crate::identity::IdentityError>>,
{
    match tokio::time::timeout(state.config.identity_store_timeout, future).await {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(err)) => {
            debug!("identity store call failed: {}", err);
            None
        }
        Err(_) => {
            debug!("identity store call exceeded its budget");
            None
        }
    }
}

/// An unavailable verifier (timeout or transport error) is treated the
/// same as "invalid" per §4.2. Whether that blocks the join depends on
/// `REQUIRE_DEVICE_AUTH`, exactly as it does for outright-invalid creds.
fn decide(state: &AppState, outcome: Option<AuthOutcome>, rejection: &'static str) -> AuthDecision {
    match outcome {
        Some(outcome) if outcome.valid => AuthDecision::Allowed { device: outcome.device },
        _ => {
            if state.config.require_device_auth() {
                AuthDecision::Rejected(rejection)
            } else {
                AuthDecision::Allowed { device: None }
            }
        }
    }
}

async fn handle_status(state: &AppState, session: &Session, value: Value) {
    let Some((code, kind)) = session.room_membership() else {
        send_outbound(&session.tx, &Outbound::error("Not in a pairing room"));
        return;
    };
    if let Some(peer) = active_peer(state, &code, kind).await {
        send_value(&peer.tx, &value);
    }
}

async fn handle_get(state: &AppState, session: &Session, value: Value, kind_label: &str) {
    let Some((code, kind)) = session.room_membership() else {
        send_outbound(&session.tx, &Outbound::error("Not in a pairing room"));
        return;
    };
    if kind != ClientKind::App {
        debug!("ignoring {} from a non-app sender", kind_label);
        return;
    }
    match active_peer(state, &code, kind).await {
        Some(peer) => send_value(&peer.tx, &value),
        None => send_outbound(&session.tx, &Outbound::error("Display not connected")),
    }
}

async fn handle_config(state: &AppState, session: &Session, value: Value) {
    let Some((code, kind)) = session.room_membership() else {
        send_outbound(&session.tx, &Outbound::error("Not in a pairing room"));
        return;
    };
    if kind != ClientKind::Display {
        debug!("ignoring config from a non-display sender");
        return;
    }
    if let Some(peer) = active_peer(state, &code, kind).await {
        send_value(&peer.tx, &value);
    }
}

async fn handle_command(state: &AppState, session: &Session, frame: CommandFrame) {
    let Some((code, kind)) = session.room_membership() else {
        send_outbound(&session.tx, &Outbound::error("Not in a pairing room"));
        return;
    };

    // Role violation is reported independent of requestId — only the
    // app-originated path below requires one to correlate a response.
    if kind == ClientKind::Display {
        let request_id = frame.request_id.clone().unwrap_or_default();
        send_outbound(&session.tx, &Outbound::command_response_failure(request_id, "Only apps can send commands"));
        return;
    }

    let Some(request_id) = frame.request_id.clone() else {
        debug!("dropping command without a requestId");
        return;
    };

    match active_peer(state, &code, kind).await {
        Some(display) => {
            state.correlator.record(code.clone(), request_id.clone(), session.id).await;
            let relay = serde_json::json!({
                "type": "command",
                "requestId": request_id,
                "command": frame.command,
                "payload": frame.payload,
            });
            if !display.tx.send(Message::Text(relay.to_string().into())) {
                state.correlator.take(&code, &request_id).await;
                send_outbound(&session.tx, &Outbound::command_response_failure(request_id, "Display not connected"));
            }
        }
        None => send_outbound(&session.tx, &Outbound::command_response_failure(request_id, "Display not connected")),
    }
}

async fn handle_command_response(state: &AppState, session: &Session, frame: CommandResponseFrame) {
    let Some((code, kind)) = session.room_membership() else {
        send_outbound(&session.tx, &Outbound::error("Not in a pairing room"));
        return;
    };
    if kind != ClientKind::Display {
        debug!("ignoring command_response from a non-display sender");
        return;
    }

    let Some(request_id) = frame.request_id.clone() else {
        debug!("dropping command_response without a requestId");
        return;
    };

    let Some(app_session_id) = state.correlator.take(&code, &request_id).await else {
        debug!("dropping command_response for unknown or already-resolved requestId {}", request_id);
        return;
    };

    if let Some(app) = active_peer(state, &code, kind).await {
        if app.session_id == app_session_id {
            let relay = serde_json::json!({
                "type": "command_response",
                "requestId": request_id,
                "success": frame.success.unwrap_or(false),
                "data": frame.data,
                "error": frame.error,
            });
            send_value(&app.tx, &relay);
        }
    }
}

async fn handle_debug_log(state: &AppState, session: &Session, frame: DebugLogFrame) {
    let Some((_code, kind)) = session.room_membership() else {
        send_outbound(&session.tx, &Outbound::error("Not in a pairing room"));
        return;
    };
    if kind != ClientKind::Display {
        debug!("ignoring debug_log from a non-display sender");
        return;
    }

    let (Some(level), Some(message)) = (frame.level, frame.log_message) else {
        debug!("dropping debug_log missing level or log_message");
        return;
    };

    let device_id = session.device_id.clone().unwrap_or_default();
    let serial_number = session.serial_number.clone().unwrap_or_default();
    state.debug_log.handle(&serial_number, &device_id, &level, &message, frame.log_metadata).await;
}

/// Resolves to `None` both when no occupant holds the opposite slot and
/// when that occupant's connection has already gone away — the two cases
/// every relay arm treats identically.
async fn active_peer(state: &AppState, code: &RoomCode, sender_kind: ClientKind) -> Option<Occupant> {
    let peer = state.rooms.peer_of(code, sender_kind).await?;
    peer.is_open().then_some(peer)
}

/// Emits the synthetic timeout response for a swept pending command (§4.5).
pub async fn emit_pending_timeout(state: &AppState, code: &RoomCode, request_id: &str, app_session_id: Uuid) {
    if let Some(app) = active_peer(state, code, ClientKind::Display).await {
        if app.session_id == app_session_id {
            send_outbound(&app.tx, &Outbound::command_response_failure(request_id.to_owned(), "timeout"));
        }
    }
}

pub fn send_outbound(tx: &crate::session::OutboundTx, frame: &Outbound) {
    match pairbridge_core::outbound::encode_outbound(frame) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text.into()));
        }
        Err(err) => tracing::error!("failed to encode outbound frame: {}", err),
    }
}

pub fn send_value(tx: &crate::session::OutboundTx, value: &Value) {
    let _ = tx.send(Message::Text(value.to_string().into()));
}
