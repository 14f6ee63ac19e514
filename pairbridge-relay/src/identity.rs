//! Auth Verifier (§4.2): the narrow interface to the external identity
//! store, plus an HTTP-backed implementation. Modeled as a trait object so
//! the join path, and the tests, can inject a fake without standing up a
//! real HTTP service — the source system's globals/mocked-module pattern
//! becomes an explicit dependency here instead.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::registry::DeviceRecord;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity store request failed: {0}")]
    Transport(String),
    #[error("identity store timed out")]
    Timeout,
}

#[derive(Debug, Clone, Default)]
pub struct AuthOutcome {
    pub valid: bool,
    pub device: Option<DeviceRecord>,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn validate_device_auth(
        &self,
        serial: &str,
        timestamp: &str,
        signature: &str,
    ) -> Result<AuthOutcome, IdentityError>;

    async fn validate_app_token(&self, token: &str) -> Result<AuthOutcome, IdentityError>;

    async fn update_device_last_seen(&self, device_id: &str);

    async fn insert_device_log(
        &self,
        device_id: &str,
        level: &str,
        message: &str,
        metadata: Option<Value>,
        serial_number: &str,
    );

    /// Lets the broker detect "the external store is absent" and fall back
    /// to no-auth mode, per §6.
    fn is_enabled(&self) -> bool;
}

/// Used when `IDENTITY_STORE_URL` is unset: every auth call fails closed,
/// `is_enabled()` reports `false` so the broker is visibly running without
/// an identity store rather than silently rejecting every join.
#[derive(Debug, Default)]
pub struct NullIdentityStore;

#[async_trait]
impl IdentityStore for NullIdentityStore {
    async fn validate_device_auth(&self, _serial: &str, _timestamp: &str, _signature: &str) -> Result<AuthOutcome, IdentityError> {
        Ok(AuthOutcome::default())
    }

    async fn validate_app_token(&self, _token: &str) -> Result<AuthOutcome, IdentityError> {
        Ok(AuthOutcome::default())
    }

    async fn update_device_last_seen(&self, _device_id: &str) {}

    async fn insert_device_log(
        &self,
        _device_id: &str,
        _level: &str,
        _message: &str,
        _metadata: Option<Value>,
        _serial_number: &str,
    ) {
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

pub struct HttpIdentityStore {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpIdentityStore {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            timeout,
        }
    }
}

#[derive(Serialize)]
struct DeviceAuthRequest<'a> {
    serial: &'a str,
    timestamp: &'a str,
    signature: &'a str,
}

#[derive(Serialize)]
struct AppTokenRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    valid: bool,
    #[serde(default)]
    device: Option<DeviceRecord>,
}

#[derive(Serialize)]
struct DeviceLogRequest<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
    level: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    #[serde(rename = "serialNumber")]
    serial_number: &'a str,
}

#[async_trait]
impl IdentityStore for HttpIdentityStore {
    async fn validate_device_auth(
        &self,
        serial: &str,
        timestamp: &str,
        signature: &str,
    ) -> Result<AuthOutcome, IdentityError> {
        let response: AuthResponse = self
            .client
            .post(format!("{}/devices/validate-auth", self.base_url))
            .timeout(self.timeout)
            .json(&DeviceAuthRequest { serial, timestamp, signature })
            .send()
            .await
            .map_err(map_reqwest_err)?
            .json()
            .await
            .map_err(map_reqwest_err)?;

        Ok(AuthOutcome { valid: response.valid, device: response.device })
    }

    async fn validate_app_token(&self, token: &str) -> Result<AuthOutcome, IdentityError> {
        let response: AuthResponse = self
            .client
            .post(format!("{}/devices/validate-token", self.base_url))
            .timeout(self.timeout)
            .json(&AppTokenRequest { token })
            .send()
            .await
            .map_err(map_reqwest_err)?
            .json()
            .await
            .map_err(map_reqwest_err)?;

        Ok(AuthOutcome { valid: response.valid, device: response.device })
    }

    async fn update_device_last_seen(&self, device_id: &str) {
        let url = format!("{}/devices/{}/last-seen", self.base_url, device_id);
        if let Err(err) = self.client.post(url).timeout(self.timeout).send().await {
            tracing::warn!("failed to update last_seen for {}: {}", device_id, err);
        }
    }

    async fn insert_device_log(
        &self,
        device_id: &str,
        level: &str,
        message: &str,
        metadata: Option<Value>,
        serial_number: &str,
    ) {
        let url = format!("{}/devices/logs", self.base_url);
        let body = DeviceLogRequest { device_id, level, message, metadata, serial_number };
        if let Err(err) = self.client.post(url).timeout(self.timeout).json(&body).send().await {
            tracing::warn!("failed to persist debug log for {}: {}", device_id, err);
        }
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

fn map_reqwest_err(err: reqwest::Error) -> IdentityError {
    if err.is_timeout() {
        IdentityError::Timeout
    } else {
        IdentityError::Transport(err.to_string())
    }
}
