use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use pairbridge_relay::identity::{AuthOutcome, IdentityError, IdentityStore};
use pairbridge_relay::registry::DeviceRecord;
use pairbridge_relay::{build_router, AppState, Config};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// A scripted identity store standing in for the external record store:
/// `validate_device_auth` always returns the one configured `DeviceRecord`,
/// `validate_app_token` always grants access tied to it. Lets tests exercise
/// `verified_device_id`/`pairing_code` gating without a real HTTP backend.
/// Call counters let a test assert a side-effecting call did (or didn't)
/// happen, since nothing is echoed back to the client over the wire.
struct FakeIdentityStore {
    device: DeviceRecord,
    last_seen_calls: std::sync::atomic::AtomicUsize,
    insert_log_calls: std::sync::atomic::AtomicUsize,
}

impl FakeIdentityStore {
    fn new(device: DeviceRecord) -> Self {
        Self {
            device,
            last_seen_calls: std::sync::atomic::AtomicUsize::new(0),
            insert_log_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IdentityStore for FakeIdentityStore {
    async fn validate_device_auth(&self, _serial: &str, _timestamp: &str, _signature: &str) -> Result<AuthOutcome, IdentityError> {
        Ok(AuthOutcome { valid: true, device: Some(self.device.clone()) })
    }

    async fn validate_app_token(&self, _token: &str) -> Result<AuthOutcome, IdentityError> {
        Ok(AuthOutcome { valid: true, device: Some(self.device.clone()) })
    }

    async fn update_device_last_seen(&self, _device_id: &str) {
        self.last_seen_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    async fn insert_device_log(&self, _device_id: &str, _level: &str, _message: &str, _metadata: Option<Value>, _serial_number: &str) {
        self.insert_log_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn device_record(serial: &str, pairing_code: &str, debug_enabled: bool) -> DeviceRecord {
    DeviceRecord {
        device_id: format!("dev-{serial}"),
        serial_number: serial.to_owned(),
        pairing_code: pairing_code.to_owned(),
        display_name: None,
        firmware_version: None,
        ip_address: None,
        last_seen: None,
        debug_enabled,
        is_provisioned: true,
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;
type WsRead = futures::stream::SplitStream<WsStream>;

struct TestClient {
    write: WsWrite,
    read: WsRead,
}

impl TestClient {
    async fn send(&mut self, frame: Value) {
        self.write
            .send(Message::Text(frame.to_string().into()))
            .await
            .expect("send frame");
    }

    async fn recv(&mut self, wait: Duration) -> Option<Value> {
        let next = timeout(wait, self.read.next()).await.ok()?;
        let message = next?.ok()?;
        match message {
            Message::Text(text) => serde_json::from_str(&text).ok(),
            Message::Close(_) => None,
            _ => None,
        }
    }

    /// Drains frames until one matches `type`, skipping anything unrelated
    /// (the initial `connection` frame, a peer's `joined` echo, etc.).
    async fn recv_type(&mut self, type_: &str, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
            let frame = self.recv(remaining).await?;
            if frame.get("type").and_then(Value::as_str) == Some(type_) {
                return Some(frame);
            }
        }
    }
}

async fn start_broker(config: Config) -> (String, oneshot::Sender<()>) {
    start_broker_with_state(AppState::new(config)).await
}

async fn start_broker_with_state(state: AppState) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral broker socket");
    let address = listener.local_addr().expect("broker local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, build_router(state)).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("ws://{}/ws", address), shutdown_tx)
}

async fn connect(ws_url: &str) -> TestClient {
    let (ws_stream, _) = connect_async(ws_url).await.expect("connect websocket");
    let (write, read) = ws_stream.split();
    TestClient { write, read }
}

#[tokio::test]
async fn display_and_app_pair_and_exchange_status() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut display = connect(&address).await;
    display.recv_type("connection", Duration::from_secs(1)).await.expect("connection frame");
    display.send(json!({"type": "join", "code": "abc123", "clientType": "display", "serial": "SN-1"})).await;
    let joined = display.recv_type("joined", Duration::from_secs(1)).await.expect("display joined");
    assert_eq!(joined["data"]["displayConnected"], true);
    assert_eq!(joined["data"]["appConnected"], false);

    let mut app = connect(&address).await;
    app.recv_type("connection", Duration::from_secs(1)).await.expect("connection frame");
    app.send(json!({"type": "join", "code": "ABC123", "clientType": "app"})).await;
    let joined = app.recv_type("joined", Duration::from_secs(1)).await.expect("app joined");
    assert_eq!(joined["data"]["appConnected"], true);

    let peer_connected = display.recv_type("peer_connected", Duration::from_secs(1)).await.expect("display sees app join");
    assert_eq!(peer_connected["peerType"], "app");

    display.send(json!({"type": "status", "webex_status": "InCall", "camera_on": true})).await;
    let status = app.recv(Duration::from_secs(1)).await.expect("app receives status");
    assert_eq!(status["webex_status"], "InCall");
    assert_eq!(status["camera_on"], true);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn command_round_trips_through_correlator() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut display = connect(&address).await;
    display.recv_type("connection", Duration::from_secs(1)).await;
    display.send(json!({"type": "join", "code": "room01", "clientType": "display"})).await;
    display.recv_type("joined", Duration::from_secs(1)).await;

    let mut app = connect(&address).await;
    app.recv_type("connection", Duration::from_secs(1)).await;
    app.send(json!({"type": "join", "code": "room01", "clientType": "app"})).await;
    app.recv_type("joined", Duration::from_secs(1)).await;
    display.recv_type("peer_connected", Duration::from_secs(1)).await;

    app.send(json!({"type": "command", "requestId": "r1", "command": "mute"})).await;
    let command = display.recv(Duration::from_secs(1)).await.expect("display receives command");
    assert_eq!(command["type"], "command");
    assert_eq!(command["requestId"], "r1");

    display
        .send(json!({"type": "command_response", "requestId": "r1", "success": true, "data": {"muted": true}}))
        .await;
    let response = app.recv(Duration::from_secs(1)).await.expect("app receives response");
    assert_eq!(response["type"], "command_response");
    assert_eq!(response["requestId"], "r1");
    assert_eq!(response["success"], true);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn device_auth_rejects_missing_credentials_when_required() {
    let config = Config::disabled_auth("127.0.0.1:0").with_require_device_auth(true);
    let (address, shutdown_tx) = start_broker(config).await;

    let mut display = connect(&address).await;
    display.recv_type("connection", Duration::from_secs(1)).await;
    display.send(json!({"type": "join", "code": "room02", "clientType": "display"})).await;

    let error = display.recv_type("error", Duration::from_secs(1)).await.expect("join is rejected");
    assert!(error["message"].as_str().unwrap().to_lowercase().contains("auth"));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn status_before_joining_a_room_is_rejected() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut display = connect(&address).await;
    display.recv_type("connection", Duration::from_secs(1)).await;
    display.send(json!({"type": "status", "webex_status": "InCall"})).await;

    let error = display.recv_type("error", Duration::from_secs(1)).await.expect("status rejected");
    assert_eq!(error["message"], "Not in a pairing room");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn command_with_no_display_connected_fails_immediately() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut app = connect(&address).await;
    app.recv_type("connection", Duration::from_secs(1)).await;
    app.send(json!({"type": "join", "code": "room03", "clientType": "app"})).await;
    app.recv_type("joined", Duration::from_secs(1)).await;

    app.send(json!({"type": "command", "requestId": "r9", "command": "mute"})).await;
    let response = app.recv_type("command_response", Duration::from_secs(1)).await.expect("synthetic failure");
    assert_eq!(response["success"], false);
    assert_eq!(response["error"], "Display not connected");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn second_display_join_to_occupied_room_is_rejected() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut display_a = connect(&address).await;
    display_a.recv_type("connection", Duration::from_secs(1)).await;
    display_a.send(json!({"type": "join", "code": "room04", "clientType": "display"})).await;
    display_a.recv_type("joined", Duration::from_secs(1)).await;

    let mut display_b = connect(&address).await;
    display_b.recv_type("connection", Duration::from_secs(1)).await;
    display_b.send(json!({"type": "join", "code": "room04", "clientType": "display"})).await;
    let error = display_b.recv_type("error", Duration::from_secs(1)).await.expect("second display rejected");
    assert_eq!(error["message"], "Display already connected");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn display_disconnect_notifies_app_peer() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut display = connect(&address).await;
    display.recv_type("connection", Duration::from_secs(1)).await;
    display.send(json!({"type": "join", "code": "room05", "clientType": "display"})).await;
    display.recv_type("joined", Duration::from_secs(1)).await;

    let mut app = connect(&address).await;
    app.recv_type("connection", Duration::from_secs(1)).await;
    app.send(json!({"type": "join", "code": "room05", "clientType": "app"})).await;
    app.recv_type("joined", Duration::from_secs(1)).await;
    display.recv_type("peer_connected", Duration::from_secs(1)).await;

    display.write.close().await.expect("close display socket");

    let notice = app.recv_type("peer_disconnected", Duration::from_secs(2)).await.expect("app notified");
    assert_eq!(notice["peerType"], "display");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut client = connect(&address).await;
    client.recv_type("connection", Duration::from_secs(1)).await;
    client.send(json!({"type": "ping"})).await;
    let pong = client.recv_type("pong", Duration::from_secs(1)).await;
    assert!(pong.is_some());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn get_status_and_get_config_relay_to_display() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut display = connect(&address).await;
    display.recv_type("connection", Duration::from_secs(1)).await;
    display.send(json!({"type": "join", "code": "room06", "clientType": "display"})).await;
    display.recv_type("joined", Duration::from_secs(1)).await;

    let mut app = connect(&address).await;
    app.recv_type("connection", Duration::from_secs(1)).await;
    app.send(json!({"type": "join", "code": "room06", "clientType": "app"})).await;
    app.recv_type("joined", Duration::from_secs(1)).await;
    display.recv_type("peer_connected", Duration::from_secs(1)).await;

    app.send(json!({"type": "get_status"})).await;
    let relayed = display.recv_type("get_status", Duration::from_secs(1)).await.expect("display receives get_status");
    assert_eq!(relayed["type"], "get_status");

    app.send(json!({"type": "get_config"})).await;
    let relayed = display.recv_type("get_config", Duration::from_secs(1)).await.expect("display receives get_config");
    assert_eq!(relayed["type"], "get_config");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn get_status_with_no_display_connected_errors() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut app = connect(&address).await;
    app.recv_type("connection", Duration::from_secs(1)).await;
    app.send(json!({"type": "join", "code": "room07", "clientType": "app"})).await;
    app.recv_type("joined", Duration::from_secs(1)).await;

    app.send(json!({"type": "get_config"})).await;
    let error = app.recv_type("error", Duration::from_secs(1)).await.expect("get_config rejected");
    assert_eq!(error["message"], "Display not connected");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn config_relays_from_display_to_app() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut display = connect(&address).await;
    display.recv_type("connection", Duration::from_secs(1)).await;
    display.send(json!({"type": "join", "code": "room08", "clientType": "display"})).await;
    display.recv_type("joined", Duration::from_secs(1)).await;

    let mut app = connect(&address).await;
    app.recv_type("connection", Duration::from_secs(1)).await;
    app.send(json!({"type": "join", "code": "room08", "clientType": "app"})).await;
    app.recv_type("joined", Duration::from_secs(1)).await;
    display.recv_type("peer_connected", Duration::from_secs(1)).await;

    display.send(json!({"type": "config", "display_name": "Lobby"})).await;
    let relayed = app.recv_type("config", Duration::from_secs(1)).await.expect("app receives config");
    assert_eq!(relayed["display_name"], "Lobby");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn config_with_no_app_connected_is_dropped_silently() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut display = connect(&address).await;
    display.recv_type("connection", Duration::from_secs(1)).await;
    display.send(json!({"type": "join", "code": "room09", "clientType": "display"})).await;
    display.recv_type("joined", Duration::from_secs(1)).await;

    display.send(json!({"type": "config", "display_name": "Lobby"})).await;
    // No app, no error frame to the display either — best-effort silent drop.
    let next = display.recv(Duration::from_millis(200)).await;
    assert!(next.is_none(), "display should not receive anything for a dropped config frame");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn subscribe_debug_is_rejected_as_deprecated_by_default() {
    let (address, shutdown_tx) = start_broker(Config::disabled_auth("127.0.0.1:0")).await;

    let mut client = connect(&address).await;
    client.recv_type("connection", Duration::from_secs(1)).await;
    client.send(json!({"type": "subscribe_debug"})).await;
    let error = client.recv_type("error", Duration::from_secs(1)).await.expect("subscribe_debug rejected");
    assert!(error["message"].as_str().unwrap().to_lowercase().contains("deprecated"));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn subscribe_debug_is_accepted_when_feature_flag_enabled() {
    let config = Config::disabled_auth("127.0.0.1:0").with_bridge_debug_subscribe(true);
    let (address, shutdown_tx) = start_broker(config).await;

    let mut client = connect(&address).await;
    client.recv_type("connection", Duration::from_secs(1)).await;
    client.send(json!({"type": "subscribe_debug"})).await;
    let response = client.recv_type("debug_subscribed", Duration::from_secs(1)).await;
    assert!(response.is_some());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn debug_log_is_persisted_for_error_level_even_when_debug_disabled() {
    let identity = Arc::new(FakeIdentityStore::new(device_record("SN-DBG1", "ROOM10", false)));
    let state = AppState::with_identity(Config::disabled_auth("127.0.0.1:0"), identity.clone());
    let (address, shutdown_tx) = start_broker_with_state(state).await;

    let mut display = connect(&address).await;
    display.recv_type("connection", Duration::from_secs(1)).await;
    display
        .send(json!({
            "type": "join", "code": "ROOM10", "clientType": "display",
            "serial": "SN-DBG1", "auth": {"timestamp": "123", "signature": "sig"},
        }))
        .await;
    display.recv_type("joined", Duration::from_secs(1)).await;

    display.send(json!({"type": "debug_log", "level": "error", "log_message": "boom"})).await;
    settle().await;
    assert_eq!(identity.insert_log_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    display.send(json!({"type": "debug_log", "level": "info", "log_message": "hi"})).await;
    settle().await;
    assert_eq!(
        identity.insert_log_calls.load(std::sync::atomic::Ordering::SeqCst),
        1,
        "info should be dropped since debug_enabled is false"
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn last_seen_is_only_updated_for_an_authenticated_device() {
    let identity = Arc::new(FakeIdentityStore::new(device_record("SN-DBG2", "ROOM11", true)));
    let state = AppState::with_identity(Config::disabled_auth("127.0.0.1:0"), identity.clone());
    let (address, shutdown_tx) = start_broker_with_state(state).await;

    // An unauthenticated display that merely declares a deviceId must not
    // trigger a last_seen write for a device it never proved ownership of.
    let mut anon_display = connect(&address).await;
    anon_display.recv_type("connection", Duration::from_secs(1)).await;
    anon_display
        .send(json!({"type": "join", "code": "ROOM12", "clientType": "display", "deviceId": "dev-attacker-chosen"}))
        .await;
    anon_display.recv_type("joined", Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(identity.last_seen_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    // A genuinely authenticated display does trigger it.
    let mut display = connect(&address).await;
    display.recv_type("connection", Duration::from_secs(1)).await;
    display
        .send(json!({
            "type": "join", "code": "ROOM11", "clientType": "display",
            "serial": "SN-DBG2", "auth": {"timestamp": "123", "signature": "sig"},
        }))
        .await;
    display.recv_type("joined", Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(identity.last_seen_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn join_with_mismatched_pairing_code_is_rejected() {
    let identity = Arc::new(FakeIdentityStore::new(device_record("SN-DBG3", "ROOM13", false)));
    let state = AppState::with_identity(Config::disabled_auth("127.0.0.1:0"), identity.clone());
    let (address, shutdown_tx) = start_broker_with_state(state).await;

    let mut display = connect(&address).await;
    display.recv_type("connection", Duration::from_secs(1)).await;
    display
        .send(json!({
            "type": "join", "code": "WRONGCODE", "clientType": "display",
            "serial": "SN-DBG3", "auth": {"timestamp": "123", "signature": "sig"},
        }))
        .await;
    let error = display.recv_type("error", Duration::from_secs(1)).await.expect("mismatched code rejected");
    assert_eq!(error["message"], "Pairing code does not match the authorized device");

    let _ = shutdown_tx.send(());
}
