//! Process-level failures, distinct from the per-frame `error` wire messages
//! the router emits to clients (those live in `pairbridge_core::outbound`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker server exited: {0}")]
    Serve(String),
}
