//! Async client for the Phylum supply-chain risk analysis API.
//!
//! [`PhylumClient`] authenticates through the Phylum CLI or an explicit
//! token, lists projects across groups and fetches their details with a
//! bounded number of concurrent requests (see [`aggregate`]). Lockfiles can
//! be turned into package lists through [`lockfile::LockfileAdapter`].

pub mod aggregate;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod lockfile;
pub mod logging;
pub mod model;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export common types for convenience
pub use aggregate::{AggregateOutcome, DetailAggregator, DetailFailure, DetailSource, FanOut};
pub use client::PhylumClient;
pub use config::{ClientConfig, Credentials};
pub use error::{PhylumError, Result};
pub use lockfile::{LockfileAdapter, LockfileFormat, LockfileParser};
pub use model::*;
