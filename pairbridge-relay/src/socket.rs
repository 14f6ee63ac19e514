//! Per-connection I/O (§4.1): splits the upgraded WebSocket into reader and
//! writer halves, mirroring the teacher's `handle_socket` — a dedicated
//! writer task owns the socket's write half so the keepalive ping and
//! relayed frames never race with each other.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use pairbridge_core::outbound::Outbound;
use tokio::sync::{mpsc, Notify};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::router;
use crate::session::{OutboundTx, Session, OUTBOUND_QUEUE_CAPACITY};
use crate::AppState;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (raw_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);
    let kill = Arc::new(Notify::new());
    let outbound_tx = OutboundTx::new(raw_tx, kill.clone());

    let writer = tokio::spawn(async move {
        let mut ticker = interval(KEEPALIVE_INTERVAL);
        ticker.tick().await; // first tick fires immediately; consume it
        loop {
            tokio::select! {
                maybe_message = outbound_rx.recv() => {
                    match maybe_message {
                        Some(message) => {
                            if ws_sender.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                // §5 Backpressure: overflowing the bounded queue marks this
                // session as the slow consumer to remove, not the producer.
                _ = kill.notified() => {
                    debug!("closing a session whose outbound queue overflowed");
                    break;
                }
            }
        }
    });

    let live_clients = state.live_clients.fetch_add(1, Ordering::SeqCst) + 1;
    let session_id = Uuid::new_v4();
    let mut session = Session::new(session_id, outbound_tx.clone());

    router::send_outbound(
        &outbound_tx,
        &router::connection_frame(live_clients, unix_timestamp()),
    );

    loop {
        let next = tokio::time::timeout(state.config.session_idle_timeout, ws_receiver.next()).await;
        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(err))) => {
                debug!("session {} websocket error: {}", session_id, err);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                debug!("session {} idle timeout", session_id);
                break;
            }
        };

        match message {
            Message::Text(text) => match pairbridge_core::inbound::decode_inbound(&text) {
                Ok(inbound) => router::dispatch(&state, &mut session, inbound).await,
                Err(err) => debug!("session {} sent an undecodable frame: {}", session_id, err),
            },
            Message::Binary(_) => {
                warn!("session {} sent a binary frame, closing", session_id);
                break;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    cleanup(&state, &session).await;
    state.live_clients.fetch_sub(1, Ordering::SeqCst);
    drop(outbound_tx);
    drop(session); // session.tx is the writer's other sender clone
    let _ = writer.await;
    info!("session {} closed", session_id);
}

async fn cleanup(state: &AppState, session: &Session) {
    let Some((code, kind)) = session.room_membership() else {
        return;
    };

    if kind == pairbridge_core::ClientKind::App {
        state.correlator.drop_owned_by(session.id).await;
    }

    if let Some(peer) = state.rooms.leave(&code, kind, session.id).await {
        if peer.is_open() {
            router::send_outbound(&peer.tx, &Outbound::PeerDisconnected { peer_type: kind.as_str() });
        }
    }
}

/// The teacher's `ControlMessage` frames carry no timestamp; this broker's
/// `connection` frame does (§6). Stamped as Unix seconds rather than pulling
/// in a date/time crate neither the teacher nor this broker otherwise needs.
fn unix_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    format!("{secs}")
}
