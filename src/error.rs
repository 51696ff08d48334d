//! Error types for outreach.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for campaign operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Contact source error: {0}")]
    Input(#[from] InputError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Log error: {0}")]
    Log(#[from] LogError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Fatal problems with a contact source. Nothing is sent when one of these
/// is raised.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Failed to read contact source {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Contact source is empty")]
    Empty,

    #[error("Contact source has no phone column (expected Phone_E164 or Phone)")]
    MissingPhoneColumn,

    #[error("Malformed contact row {index}: {reason}")]
    MalformedRow { index: usize, reason: String },

    #[error("Duplicate recipient {key} on {channel} at rows {first} and {second}")]
    DuplicateRecipient {
        key: String,
        channel: String,
        first: usize,
        second: usize,
    },

    #[error("Unknown channel mode: {0} (expected WA, WA_TEMPLATE or SMS)")]
    UnknownMode(String),

    #[error("Unknown channel: {0} (expected WA/WhatsApp or SMS)")]
    UnknownChannel(String),
}

/// Per-recipient transport failures. Recorded in the send log, never raised
/// out of a batch.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Transport {transport} request failed: {reason}")]
    RequestFailed { transport: String, reason: String },

    #[error("Transport {transport} rejected credentials")]
    AuthFailed { transport: String },

    #[error("Transport {transport} rate limited, retry after {retry_after:?}")]
    RateLimited {
        transport: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {transport}: {reason}")]
    InvalidResponse { transport: String, reason: String },
}

/// Send/status log errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Log {path} is locked by another writer")]
    Locked { path: PathBuf },

    #[error("Log {path} has an unexpected header: {found}")]
    BadHeader { path: PathBuf, found: String },

    #[error("Failed to encode log row: {0}")]
    Encode(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LogError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
