//! PairBridge relay broker: mediates pairing-code WebSocket rooms between
//! embedded displays and browser control apps.

pub mod config;
pub mod correlator;
pub mod debug_log;
pub mod error;
pub mod identity;
pub mod registry;
pub mod room;
pub mod router;
pub mod session;
pub mod socket;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

pub use config::Config;
pub use error::BrokerError;

use correlator::CommandCorrelator;
use debug_log::DebugLogSink;
use identity::{HttpIdentityStore, IdentityStore, NullIdentityStore};
use registry::DeviceRegistry;
use room::RoomManager;

/// Every frame this relay ever has to buffer fully in memory before routing
/// it — large enough for a `status` frame with embedded thumbnails, small
/// enough that one misbehaving client can't exhaust the process.
const MAX_WS_MESSAGE_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: RoomManager,
    pub correlator: CommandCorrelator,
    pub registry: DeviceRegistry,
    pub identity: Arc<dyn IdentityStore>,
    pub debug_log: Arc<DebugLogSink>,
    pub live_clients: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let identity: Arc<dyn IdentityStore> = match &config.identity_store_url {
            Some(url) => Arc::new(HttpIdentityStore::new(url.clone(), config.identity_store_timeout)),
            None => Arc::new(NullIdentityStore),
        };

        if !identity.is_enabled() {
            tracing::warn!("no IDENTITY_STORE_URL configured; running without an identity store");
        }

        Self::with_identity(config, identity)
    }

    /// Injects an explicit [`IdentityStore`] rather than resolving one from
    /// `config.identity_store_url` — the dependency-injection seam §9 asks
    /// for, used by tests to exercise auth-gated paths (verified device
    /// records, `debug_enabled`) without a real external service.
    pub fn with_identity(config: Config, identity: Arc<dyn IdentityStore>) -> Self {
        let config = Arc::new(config);
        let registry = DeviceRegistry::new();
        let debug_log = Arc::new(DebugLogSink::new(identity.clone(), registry.clone()));

        Self {
            config,
            rooms: RoomManager::new(),
            correlator: CommandCorrelator::new(),
            registry,
            identity,
            debug_log,
            live_clients: Arc::new(AtomicUsize::new(0)),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    spawn_correlator_sweep(state.clone());

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), BrokerError> {
    let local_addr = listener.local_addr().map(|addr| addr.to_string()).unwrap_or_default();
    info!("pairbridge-relay listening on {}", local_addr);

    let router = build_router(state);
    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| BrokerError::Serve(err.to_string()))
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_frame_size(MAX_WS_MESSAGE_BYTES)
        .on_upgrade(move |socket| socket::handle_socket(state, socket))
}

async fn healthz_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "ok": true }))
}

/// Optional pending-command timeout sweep (§4.5, a MAY in the wire spec).
/// Runs for the lifetime of the process; there is no shutdown hook because
/// the broker has none itself — the task simply dies with the process.
fn spawn_correlator_sweep(state: AppState) {
    let sweep_interval = Duration::from_secs(5);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            let expired = state.correlator.sweep_expired(state.config.pending_command_timeout).await;
            for (code, request_id, app_session_id) in expired {
                router::emit_pending_timeout(&state, &code, &request_id, app_session_id).await;
            }
        }
    });
}
