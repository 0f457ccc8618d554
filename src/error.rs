//! Error taxonomy shared by every client operation.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PhylumError>;

/// Errors surfaced by the client, the token provider and the lockfile adapter.
#[derive(Error, Debug)]
pub enum PhylumError {
    /// Connection failure, timeout or other network-level problem
    #[error("Transport error: {0}")]
    Transport(String),

    /// Structured error returned by the API
    #[error("API error {code}: {description}")]
    Api { code: u16, description: String },

    /// HTTP 503 carrying the upstream reset marker
    #[error("Rate limited by upstream (503)")]
    RateLimited,

    /// Token acquisition or exchange failed
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// A local file does not exist
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The lockfile could not be parsed
    #[error("Failed to parse lockfile: {0}")]
    ParseFailure(String),

    /// The lockfile tool name has no registry mapping
    #[error("Unsupported ecosystem: {0}")]
    UnsupportedEcosystem(String),

    /// Malformed input rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// A successful response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A successful response was missing data the operation depends on
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A spawned fetch task panicked or was aborted
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl PhylumError {
    /// Returns `true` for the 503 upstream-reset classification.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PhylumError::RateLimited)
    }

    /// Returns `true` when repeating the same request could plausibly succeed.
    ///
    /// The library never retries on its own; this only informs callers that
    /// want their own retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            PhylumError::Transport(_) | PhylumError::RateLimited => true,
            PhylumError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for PhylumError {
    fn from(err: reqwest::Error) -> Self {
        PhylumError::Transport(err.to_string())
    }
}
