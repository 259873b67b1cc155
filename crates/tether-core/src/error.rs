//! Error types for tether
//!
//! Only [`ConfigError`] is fatal. Transport and storage errors are
//! recovered from (reconnect) or logged and swallowed by the participants.

use thiserror::Error;

/// Invalid option shapes, raised before any channel is opened
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("options must be an object")]
    NotAnObject,

    #[error("options are not valid JSON: {0}")]
    Parse(String),

    #[error("options.persist must be an array of strings")]
    PersistNotStringArray,

    #[error("options.ignore must be an array of strings")]
    IgnoreNotStringArray,

    #[error("options.strategy must be one of ['broadcast', 'master'], got {0}")]
    InvalidStrategy(String),

    #[error("options.electionFunc must be function(registrations)")]
    ElectionNotFunction,

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("options.reconnectDelayMs must be a non-negative integer")]
    InvalidReconnectDelay,

    #[error("options.persist is set but no storage adapter was provided")]
    PersistWithoutStorage,
}

/// Frame encoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed sync frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Channel errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Channel closed")]
    Closed,

    #[error("Hub unreachable: {0}")]
    Unreachable(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Durable storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored snapshot is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Top-level tether error
#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Participant stopped")]
    ParticipantStopped,
}

/// Result type for tether operations
pub type TetherResult<T> = Result<T, TetherError>;
