//! Error types for configuration and the audio sync protocol
use thiserror::Error;

/// Errors raised by the sync packet codec and its UDP transport.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Datagram length does not match the packet layout
    #[error("sync packet has {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    /// Version header did not match
    #[error("sync packet header mismatch: {0:?}")]
    BadHeader([u8; 6]),

    /// Socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or validating `AudioConfig`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
