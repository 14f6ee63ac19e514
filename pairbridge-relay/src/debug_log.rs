//! Debug Log Sink (§4.6): persists `debug_log` frames when the device opted
//! in, or unconditionally for `warn`/`error` regardless of that flag.

use std::sync::Arc;

use serde_json::Value;

use crate::identity::IdentityStore;
use crate::registry::DeviceRegistry;

const ALWAYS_PERSISTED_LEVELS: [&str; 2] = ["warn", "error"];

pub struct DebugLogSink {
    identity: Arc<dyn IdentityStore>,
    registry: DeviceRegistry,
}

impl DebugLogSink {
    pub fn new(identity: Arc<dyn IdentityStore>, registry: DeviceRegistry) -> Self {
        Self { identity, registry }
    }

    /// §5: "persistence rule" decision is synchronous (it only needs the
    /// cached registry), but the actual write is spawned off so a slow or
    /// failing record store never blocks the session's reader loop.
    pub async fn handle(
        &self,
        serial_number: &str,
        device_id: &str,
        level: &str,
        message: &str,
        metadata: Option<Value>,
    ) {
        if !self.should_persist(serial_number, level).await {
            return;
        }

        let identity = self.identity.clone();
        let device_id = device_id.to_owned();
        let level = level.to_owned();
        let message = message.to_owned();
        let serial_number = serial_number.to_owned();
        tokio::spawn(async move {
            identity.insert_device_log(&device_id, &level, &message, metadata, &serial_number).await;
        });
    }

    async fn should_persist(&self, serial_number: &str, level: &str) -> bool {
        if ALWAYS_PERSISTED_LEVELS.contains(&level) {
            return true;
        }
        self.registry
            .get_by_serial(serial_number)
            .await
            .map(|record| record.debug_enabled)
            .unwrap_or(false)
    }
}
