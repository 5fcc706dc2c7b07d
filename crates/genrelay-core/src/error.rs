//! Error types for genrelay.

use std::time::Duration;

use thiserror::Error;

/// Crate-wide error type for configuration, storage and I/O.
#[derive(Error, Debug)]
pub enum GenRelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GenRelayError>;

/// Why a single provider attempt failed.
///
/// These never escape the dispatcher on their own. They are logged per
/// attempt and only the last one is attached to [`DispatchError::Exhausted`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("upstream returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response shape: {0}")]
    ResponseShape(String),
}

impl ProviderError {
    /// Log label for this failure class.
    pub fn classification(&self) -> &'static str {
        match self {
            Self::Timeout(_) | Self::Transport(_) | Self::Status { .. } => "transport-error",
            Self::ResponseShape(_) => "malformed-response",
        }
    }

    /// Whether the failure happened below the response body (network, deadline, status).
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::ResponseShape(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest does not report the configured deadline back
            Self::Timeout(Duration::ZERO)
        } else if e.is_decode() {
            Self::ResponseShape(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Terminal failure of one dispatch call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no providers configured")]
    NoProviders,

    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("all {attempts} provider(s) failed; last was {provider}: {last}")]
    Exhausted {
        attempts: usize,
        provider: String,
        last: ProviderError,
    },

    #[error("dispatch cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: usize },
}
