//! Token provider.
//!
//! A [`TokenCache`] hands out bearer tokens to concurrent requests. It either
//! holds a fixed access token, or a refresh token that is exchanged through
//! OIDC discovery whenever the cached access token is missing or close to
//! expiry. The refresh token itself comes from the caller or from the
//! installed CLI ([`CliTokenDelegate`]).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument, warn};

use crate::config::{ClientConfig, Credentials};
use crate::error::{PhylumError, Result};
use crate::transport::{classify_response, ApiRequest, HttpTransport, RequestBody};

/// Tokens are refreshed this long before they expire, or at half their
/// lifetime when that is shorter.
const EXPIRY_SKEW_SECS: i64 = 30;

const OIDC_SCOPES: &str = "openid profile email";

/// A bearer credential and its expiry, if the issuer reported one.
#[derive(Clone)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A token issued at `now` that lives for `expires_in` seconds.
    pub fn issued(access_token: String, expires_in: Option<i64>, now: DateTime<Utc>) -> Self {
        let (expires_at, refresh_at) = match expires_in {
            Some(secs) => {
                let secs = secs.max(0);
                let skew = EXPIRY_SKEW_SECS.min(secs / 2);
                (
                    Some(now + ChronoDuration::seconds(secs)),
                    Some(now + ChronoDuration::seconds(secs - skew)),
                )
            }
            None => (None, None),
        };
        Self {
            access_token,
            expires_at,
            refresh_at,
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.refresh_at {
            Some(at) => at > now,
            None => true,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("refresh_at", &self.refresh_at)
            .finish()
    }
}

// ============================================================================
// CLI delegate
// ============================================================================

/// Obtains a refresh token by running `<program> [-c <settings>] auth token`.
#[derive(Debug, Clone)]
pub struct CliTokenDelegate {
    program: String,
    settings_path: Option<PathBuf>,
}

impl CliTokenDelegate {
    pub fn new(program: impl Into<String>, settings_path: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            settings_path,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.cli_program.clone(), config.cli_settings_path.clone())
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.settings_path {
            args.push("-c".to_string());
            args.push(path.display().to_string());
        }
        args.push("auth".to_string());
        args.push("token".to_string());
        args
    }

    /// Runs the CLI and returns its stdout without the trailing newline.
    ///
    /// # Errors
    ///
    /// [`PhylumError::AuthFailure`] if the process cannot be started, exits
    /// non-zero, or prints nothing.
    #[instrument(skip(self), fields(program = %self.program))]
    pub async fn refresh_token(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .args(self.args())
            .output()
            .await
            .map_err(|e| {
                PhylumError::AuthFailure(format!("failed to run '{}': {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "CLI token command failed");
            return Err(PhylumError::AuthFailure(format!(
                "'{} auth token' exited with {}",
                self.program, output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = stdout.trim_end_matches(['\n', '\r']).to_string();
        if token.is_empty() {
            return Err(PhylumError::AuthFailure(
                "CLI returned an empty token".to_string(),
            ));
        }

        debug!("Obtained refresh token from CLI");
        Ok(token)
    }
}

// ============================================================================
// OIDC exchange
// ============================================================================

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    token_endpoint: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Exchanges refresh tokens for access tokens at the issuer's token endpoint.
///
/// The endpoint is discovered on first use and reused afterwards.
pub struct OidcTokenExchange {
    issuer_url: String,
    client_id: String,
    transport: Arc<dyn HttpTransport>,
    token_endpoint: OnceCell<String>,
}

impl OidcTokenExchange {
    pub fn new(
        issuer_url: impl Into<String>,
        client_id: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            transport,
            token_endpoint: OnceCell::new(),
        }
    }

    fn discovery_url(&self) -> String {
        format!(
            "{}/.well-known/openid-configuration",
            self.issuer_url.trim_end_matches('/')
        )
    }

    async fn token_endpoint(&self) -> Result<&str> {
        self.token_endpoint
            .get_or_try_init(|| self.discover())
            .await
            .map(String::as_str)
    }

    async fn discover(&self) -> Result<String> {
        let response = self
            .transport
            .send(ApiRequest::get(self.discovery_url()))
            .await
            .and_then(classify_response)
            .map_err(|e| PhylumError::AuthFailure(format!("OIDC discovery failed: {}", e)))?;

        let document: DiscoveryDocument = serde_json::from_slice(&response.body)
            .map_err(|e| PhylumError::AuthFailure(format!("bad discovery document: {}", e)))?;
        debug!(endpoint = %document.token_endpoint, "Discovered token endpoint");
        Ok(document.token_endpoint)
    }

    /// Returns the new credential and, if the issuer rotated it, the new
    /// refresh token.
    #[instrument(skip_all, fields(issuer = %self.issuer_url))]
    pub async fn exchange(&self, refresh_token: &str) -> Result<(Credential, Option<String>)> {
        let endpoint = self.token_endpoint().await?;

        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
            ("client_id".to_string(), self.client_id.clone()),
            ("scope".to_string(), OIDC_SCOPES.to_string()),
        ];
        let response = self
            .transport
            .send(ApiRequest::post(endpoint).with_body(RequestBody::Form(form)))
            .await
            .and_then(classify_response)
            .map_err(|e| PhylumError::AuthFailure(format!("token exchange failed: {}", e)))?;

        let token: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| PhylumError::AuthFailure(format!("bad token response: {}", e)))?;

        let credential = Credential::issued(token.access_token, token.expires_in, Utc::now());
        info!(expires_at = ?credential.expires_at, "Access token refreshed");

        Ok((credential, token.refresh_token))
    }
}

// ============================================================================
// Token cache
// ============================================================================

struct RefreshState {
    refresh_token: String,
    credential: Option<Credential>,
}

enum TokenSource {
    Fixed(String),
    Refreshing {
        exchange: OidcTokenExchange,
        state: Mutex<RefreshState>,
    },
}

/// Lock-guarded source of access tokens, safe to share between tasks.
pub struct TokenCache {
    source: TokenSource,
}

impl TokenCache {
    /// A cache that always returns `token`.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Fixed(token.into()),
        }
    }

    /// A cache that exchanges `refresh_token` on demand.
    pub fn refreshing(exchange: OidcTokenExchange, refresh_token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Refreshing {
                exchange,
                state: Mutex::new(RefreshState {
                    refresh_token: refresh_token.into(),
                    credential: None,
                }),
            },
        }
    }

    /// Builds a cache for `credentials` and obtains the first access token.
    ///
    /// # Errors
    ///
    /// Any CLI, discovery or exchange failure is returned as
    /// [`PhylumError::AuthFailure`]; the client cannot be built without a token.
    pub async fn acquire(
        config: &ClientConfig,
        credentials: Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let refresh_token = match credentials {
            Credentials::AccessToken(token) => return Ok(Self::fixed(token)),
            Credentials::RefreshToken(token) => token,
            Credentials::Cli => CliTokenDelegate::from_config(config).refresh_token().await?,
        };

        let exchange =
            OidcTokenExchange::new(config.issuer_url.clone(), config.client_id.clone(), transport);
        let cache = Self::refreshing(exchange, refresh_token);
        cache.access_token().await?;
        Ok(cache)
    }

    /// Returns a valid access token, refreshing it if needed.
    ///
    /// Concurrent callers serialize on the cache lock, so at most one
    /// exchange is in flight.
    pub async fn access_token(&self) -> Result<String> {
        match &self.source {
            TokenSource::Fixed(token) => Ok(token.clone()),
            TokenSource::Refreshing { exchange, state } => {
                let mut state = state.lock().await;
                if let Some(credential) = &state.credential {
                    if credential.is_fresh(Utc::now()) {
                        return Ok(credential.access_token.clone());
                    }
                    debug!("Cached access token expired");
                }

                let (credential, rotated) = exchange.exchange(&state.refresh_token).await?;
                if let Some(rotated) = rotated {
                    state.refresh_token = rotated;
                }
                let token = credential.access_token.clone();
                state.credential = Some(credential);
                Ok(token)
            }
        }
    }
}
