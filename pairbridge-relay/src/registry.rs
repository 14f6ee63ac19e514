//! Device Registry (§4.1 of the component table): an in-memory, read-mostly
//! snapshot of devices the identity store has vouched for. The external
//! store remains authoritative — this is a cache populated opportunistically
//! whenever an auth call returns a device record, consulted synchronously by
//! the Debug Log Sink and the Room Manager's join path.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// External device record (§3). The broker only ever writes `last_seen`
/// (via the identity store) and appends logs — every other field is
/// read-only from the broker's point of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub serial_number: String,
    pub pairing_code: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub debug_enabled: bool,
    #[serde(default)]
    pub is_provisioned: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<String, DeviceRecord>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches (or refreshes) a device record keyed by its serial number.
    pub async fn upsert(&self, record: DeviceRecord) {
        self.devices.write().await.insert(record.serial_number.clone(), record);
    }

    pub async fn get_by_serial(&self, serial_number: &str) -> Option<DeviceRecord> {
        self.devices.read().await.get(serial_number).cloned()
    }

    /// Operational tooling hook (§6): every device the broker currently
    /// knows about.
    pub async fn get_all_devices(&self) -> Vec<DeviceRecord> {
        self.devices.read().await.values().cloned().collect()
    }
}
