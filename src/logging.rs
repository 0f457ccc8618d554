//! Tracing subscriber setup for binaries and integration harnesses.

use tracing_subscriber::EnvFilter;

use crate::error::{PhylumError, Result};

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence; `default_filter` (e.g. `"phylum_client=info"`)
/// applies when it is unset or unreadable.
///
/// # Errors
///
/// [`PhylumError::Validation`] if `default_filter` is not a valid directive
/// or a global subscriber is already installed.
pub fn init_logging(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| {
            PhylumError::Validation(format!("invalid log filter '{}': {}", default_filter, e))
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| {
            PhylumError::Validation(format!("failed to initialize tracing subscriber: {}", e))
        })
}
