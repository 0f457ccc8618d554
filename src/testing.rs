//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::TokenCache;
use crate::client::PhylumClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport};

pub const API: &str = "https://api.phylum.io/api/v0";

/// Transport that answers from a table keyed by method and URL and records
/// every request it sees.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), ApiResponse>>,
    requests: Mutex<Vec<ApiRequest>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn route(&self, method: Method, url: impl Into<String>, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert((method, url.into()), ApiResponse::new(status, body));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let key = (request.method.clone(), request.url.clone());
        self.requests.lock().unwrap().push(request);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let response = self
            .routes
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| {
                ApiResponse::new(
                    404,
                    r#"{"error": {"code": 404, "description": "Not Found"}}"#,
                )
            });
        Ok(response)
    }
}

/// Client wired to `transport` with a fixed access token.
pub fn client_with(transport: Arc<MockTransport>) -> PhylumClient {
    PhylumClient::with_parts(
        ClientConfig::default(),
        transport,
        Arc::new(TokenCache::fixed("test-token")),
    )
    .unwrap()
}

pub fn summary_json(id: &str, name: &str, group: Option<&str>) -> String {
    let group = group
        .map(|g| format!("\"{}\"", g))
        .unwrap_or_else(|| "null".to_string());
    format!(
        r#"{{"id": "{id}", "name": "{name}", "group_name": {group}, "ecosystem": "npm",
            "created_at": "2023-05-01T12:00:00Z", "updated_at": "2023-05-02T12:00:00Z"}}"#
    )
}

pub fn detail_json(id: &str, name: &str) -> String {
    format!(
        r#"{{"id": "{id}", "name": "{name}", "dependencies": [],
            "issues": [], "riskScores": {{"total": 0.8}}, "totalRiskScore": 0.8}}"#
    )
}
