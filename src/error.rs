//! Error types for the discovery and delivery boundaries.

use std::time::Duration;

use thiserror::Error;

/// A discovery pass failed.  Never fatal once the scan loop is running.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,

    #[error("Bluetooth error: {0}")]
    Bluetooth(String),

    #[error("scan did not finish within {0:?}")]
    Timeout(Duration),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl From<btleplug::Error> for ScanError {
    fn from(e: btleplug::Error) -> Self {
        ScanError::Bluetooth(e.to_string())
    }
}

/// Send failure.  Everything except `Invalid` is connection-level and
/// worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(String),
}

/// Why a snapshot was not delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transient failure: {0}")]
    Transient(TransportError),

    #[error("request cannot be sent: {0}")]
    InvalidRequest(String),

    #[error("collector rejected snapshot with HTTP {status}")]
    Rejected { status: u16 },

    #[error("snapshot could not be serialized: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<TransportError> for DeliveryError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Invalid(msg) => DeliveryError::InvalidRequest(msg),
            other => DeliveryError::Transient(other),
        }
    }
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}
