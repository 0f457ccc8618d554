//! Client configuration.
//!
//! [`ClientConfig`] is immutable once handed to the client. Every field has a
//! default, builder methods override individual fields, and
//! [`ClientConfig::from_env`] layers environment variables over the defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PhylumError, Result};

/// Default API hostname.
pub const DEFAULT_API_HOST: &str = "api.phylum.io";

/// OIDC issuer used for refresh-token exchange.
pub const DEFAULT_ISSUER_URL: &str = "https://login.phylum.io/realms/phylum";

/// OAuth2 client id registered for the CLI.
pub const DEFAULT_CLIENT_ID: &str = "phylum_cli";

/// Remote lockfile parsing service.
pub const DEFAULT_PARSE_URL: &str = "https://parse.phylum.io";

/// Default bound on concurrent project-detail fetches.
pub const DEFAULT_MAX_PARALLEL: usize = 5;

/// Environment variable overriding [`ClientConfig::api_host`].
pub const API_HOST_ENV: &str = "PHYLUM_API_HOST";

/// Environment variable disabling TLS when set to `1` or `true`.
pub const API_NO_TLS_ENV: &str = "PHYLUM_API_NO_TLS";

/// Environment variable overriding [`ClientConfig::issuer_url`].
pub const ISSUER_URL_ENV: &str = "PHYLUM_ISSUER_URL";

/// Environment variable overriding [`ClientConfig::max_parallel`].
pub const MAX_PARALLEL_ENV: &str = "PHYLUM_MAX_PARALLEL";

/// Where the client gets its bearer credential from.
#[derive(Clone, Default)]
pub enum Credentials {
    /// An access token used as-is, without validation or refresh.
    AccessToken(String),

    /// A refresh token exchanged for an access token through OIDC discovery.
    RefreshToken(String),

    /// Ask the installed CLI for a refresh token, then exchange it.
    #[default]
    Cli,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
            Credentials::RefreshToken(_) => f.write_str("RefreshToken(<redacted>)"),
            Credentials::Cli => f.write_str("Cli"),
        }
    }
}

/// Immutable client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API hostname (on-prem deployments override this)
    pub api_host: String,

    /// Use `https` for the API endpoint
    pub use_tls: bool,

    /// OIDC issuer URL used for discovery
    pub issuer_url: String,

    /// OAuth2 client id
    pub client_id: String,

    /// Remote lockfile parsing endpoint
    pub parse_url: String,

    /// Maximum number of detail fetches in flight at once
    pub max_parallel: usize,

    /// Per-request timeout applied by the HTTP transport
    pub request_timeout: Duration,

    /// CLI executable used as the token delegate
    pub cli_program: String,

    /// Settings file passed to the CLI with `-c`
    pub cli_settings_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            use_tls: true,
            issuer_url: DEFAULT_ISSUER_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            parse_url: DEFAULT_PARSE_URL.to_string(),
            max_parallel: DEFAULT_MAX_PARALLEL,
            request_timeout: Duration::from_secs(30),
            cli_program: "phylum".to_string(),
            cli_settings_path: dirs::home_dir()
                .map(|home| home.join(".config/phylum/fb-settings.yaml")),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by any `PHYLUM_*` environment variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup(API_HOST_ENV) {
            config.api_host = host;
        }
        if let Some(flag) = lookup(API_NO_TLS_ENV) {
            config.use_tls = !matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true");
        }
        if let Some(issuer) = lookup(ISSUER_URL_ENV) {
            config.issuer_url = issuer;
        }
        if let Some(raw) = lookup(MAX_PARALLEL_ENV) {
            config.max_parallel = raw.trim().parse().map_err(|_| {
                PhylumError::Validation(format!(
                    "{} must be an integer, got '{}'",
                    MAX_PARALLEL_ENV, raw
                ))
            })?;
        }

        Ok(config)
    }

    pub fn with_api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = host.into();
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_issuer_url(mut self, issuer_url: impl Into<String>) -> Self {
        self.issuer_url = issuer_url.into();
        self
    }

    pub fn with_parse_url(mut self, parse_url: impl Into<String>) -> Self {
        self.parse_url = parse_url.into();
        self
    }

    /// Sets the bound on concurrent detail fetches.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_cli_program(mut self, program: impl Into<String>) -> Self {
        self.cli_program = program.into();
        self
    }

    pub fn with_cli_settings_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_settings_path = path;
        self
    }

    /// Base URL of the REST API, e.g. `https://api.phylum.io/api/v0`.
    pub fn api_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}/api/v0", scheme, self.api_host)
    }

    /// OIDC `userinfo` endpoint of the configured issuer.
    pub fn userinfo_url(&self) -> String {
        format!(
            "{}/protocol/openid-connect/userinfo",
            self.issuer_url.trim_end_matches('/')
        )
    }

    /// Rejects settings the client cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(PhylumError::Validation(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.api_host.trim().is_empty() {
            return Err(PhylumError::Validation(
                "api_host must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
