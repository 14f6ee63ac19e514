//! Admission Gate (§4.7): process-wide config, read once from the
//! environment at startup and cached for the process lifetime.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    require_device_auth: bool,
    enable_bridge_debug_subscribe: bool,
    pub bind_address: String,
    pub identity_store_url: Option<String>,
    pub identity_store_timeout: Duration,
    pub pending_command_timeout: Duration,
    pub session_idle_timeout: Duration,
}

impl Config {
    pub fn from_env(bind_address: String) -> Self {
        Self {
            require_device_auth: env_bool("REQUIRE_DEVICE_AUTH", false),
            enable_bridge_debug_subscribe: env_bool("ENABLE_BRIDGE_DEBUG_SUBSCRIBE", false),
            bind_address,
            identity_store_url: env::var("IDENTITY_STORE_URL")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            identity_store_timeout: Duration::from_millis(env_u64("IDENTITY_STORE_TIMEOUT_MS", 2_000)),
            pending_command_timeout: Duration::from_secs(env_u64("PENDING_COMMAND_TIMEOUT_SECS", 30)),
            session_idle_timeout: Duration::from_secs(env_u64("SESSION_IDLE_TIMEOUT_SECS", 90)),
        }
    }

    /// Test/embedding constructor that skips the environment entirely.
    pub fn disabled_auth(bind_address: impl Into<String>) -> Self {
        Self {
            require_device_auth: false,
            enable_bridge_debug_subscribe: false,
            bind_address: bind_address.into(),
            identity_store_url: None,
            identity_store_timeout: Duration::from_millis(2_000),
            pending_command_timeout: Duration::from_secs(30),
            session_idle_timeout: Duration::from_secs(90),
        }
    }

    pub fn require_device_auth(&self) -> bool {
        self.require_device_auth
    }

    pub fn bridge_debug_subscribe_enabled(&self) -> bool {
        self.enable_bridge_debug_subscribe
    }

    pub fn with_require_device_auth(mut self, value: bool) -> Self {
        self.require_device_auth = value;
        self
    }

    pub fn with_bridge_debug_subscribe(mut self, value: bool) -> Self {
        self.enable_bridge_debug_subscribe = value;
        self
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
