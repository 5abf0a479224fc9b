//! Resource error types

use matterstore::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Resource already started")]
    AlreadyStarted,

    #[error("Failed to bind commissioning port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pairing code for {node}: {code}")]
    InvalidPairingCode { node: String, code: String },

    #[error("Aggregator {aggregator} has no endpoint numbers left")]
    EndpointNumbersExhausted { aggregator: String },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Other(String),
}

impl ResourceError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
