//! Error types for VaultKV
//!
//! Provides a unified error type for server, storage and client operations.

use thiserror::Error;

/// Result type alias using VaultError
pub type Result<T> = std::result::Result<T, VaultError>;

/// Unified error type for VaultKV operations
#[derive(Debug, Error)]
pub enum VaultError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid key space path: {0}")]
    InvalidPath(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection is not open")]
    NotConnected,

    #[error("Timed out connecting to server")]
    ConnectionTimeout,

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unauthorized ({code}): {reason}")]
    Unauthorized { code: u16, reason: String },

    #[error("Connection closed by peer ({code}): {reason}")]
    Closed { code: u16, reason: String },

    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("Request {request_id} timed out")]
    RequestTimeout { request_id: String },

    #[error("Server rejected request: {0}")]
    Remote(String),

    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("Validation failed: {0}")]
    Validation(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VaultError {
    /// Whether the error came from the transport rather than the request itself
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            VaultError::Io(_)
                | VaultError::Network(_)
                | VaultError::NotConnected
                | VaultError::ConnectionTimeout
                | VaultError::ReconnectExhausted { .. }
        )
    }
}
