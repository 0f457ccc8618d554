//! HTTP request layer.
//!
//! The client never talks to `reqwest` directly. Requests are described by
//! [`ApiRequest`] and executed by an [`HttpTransport`], so tests can swap in a
//! recording transport. [`classify_response`] turns non-2xx responses into
//! the error taxonomy. Nothing in this layer retries.

use async_trait::async_trait;
use reqwest::Method;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{PhylumError, Result};
use crate::model::JsonErrorResponse;

/// Body marker the gateway emits when it sheds load.
pub const UPSTREAM_RESET_MARKER: &str =
    "upstream connect error or disconnect/reset before headers";

/// Request payload.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` pairs
    Form(Vec<(String, String)>),
    /// Single-file multipart upload
    File {
        field: String,
        file_name: String,
        content: Vec<u8>,
    },
}

/// A fully described HTTP request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            bearer: None,
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// Raw response: status code plus body bytes.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes requests. Implementations must be shareable across tasks.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends the request and returns the raw response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`PhylumError::Transport`] only for network-level failures.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("phylum-client/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        debug!(method = %request.method, url = %request.url, "Sending request");

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .header(reqwest::header::ACCEPT, "application/json");

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::File {
                field,
                file_name,
                content,
            } => {
                let part = reqwest::multipart::Part::bytes(content).file_name(file_name);
                builder.multipart(reqwest::multipart::Form::new().part(field, part))
            }
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        debug!(status, bytes = body.len(), "Received response");
        Ok(ApiResponse { status, body })
    }
}

/// Passes 2xx responses through and maps everything else to an error.
///
/// A 503 carrying [`UPSTREAM_RESET_MARKER`] is [`PhylumError::RateLimited`].
/// Other bodies are read as the `{"error": {code, description}}` envelope;
/// an unreadable envelope still yields [`PhylumError::Api`] with the HTTP
/// status and an empty description.
pub fn classify_response(response: ApiResponse) -> Result<ApiResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let body = String::from_utf8_lossy(&response.body);
    if response.status == 503 && body.contains(UPSTREAM_RESET_MARKER) {
        warn!("Upstream reset, likely rate limited");
        return Err(PhylumError::RateLimited);
    }

    match serde_json::from_slice::<JsonErrorResponse>(&response.body) {
        Ok(envelope) => Err(PhylumError::Api {
            code: envelope.error.code,
            description: envelope.error.description,
        }),
        Err(e) => {
            debug!(status = response.status, error = %e, "Unreadable error envelope");
            Err(PhylumError::Api {
                code: response.status,
                description: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A request as seen on the wire: lowercased head plus raw body.
    struct Captured {
        head: String,
        body: Vec<u8>,
    }

    /// Serves one HTTP/1.1 exchange on a local port and hands back what the
    /// client sent.
    async fn serve_once(
        status_line: &'static str,
        response_body: &'static str,
    ) -> (String, tokio::task::JoinHandle<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 4096];

            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before headers");
                raw.extend_from_slice(&chunk[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&raw[..head_end]).to_ascii_lowercase();
            let content_length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .map(|value| value.trim().parse::<usize>().unwrap())
                .unwrap_or(0);
            while raw.len() < head_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before body");
                raw.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "{}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                response_body.len(),
                response_body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();

            Captured {
                head,
                body: raw[head_end..head_end + content_length].to_vec(),
            }
        });

        (base, handle)
    }

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_reqwest_sends_bearer_and_accept() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", r#"{"response": "alive"}"#).await;

        let response = transport()
            .send(ApiRequest::get(format!("{}/api/v0/health", base)).with_bearer("tok-123"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, br#"{"response": "alive"}"#);

        let captured = server.await.unwrap();
        assert!(captured.head.starts_with("get /api/v0/health http/1.1"));
        assert!(captured.head.contains("authorization: bearer tok-123\r\n"));
        assert!(captured.head.contains("accept: application/json\r\n"));
    }

    #[tokio::test]
    async fn test_reqwest_returns_error_status_unclassified() {
        let body = r#"{"error": {"code": 404, "description": "Not Found"}}"#;
        let (base, server) = serve_once("HTTP/1.1 404 Not Found", body).await;

        let response = transport()
            .send(ApiRequest::get(format!("{}/groups", base)))
            .await
            .unwrap();

        assert_eq!(response.status, 404);
        let captured = server.await.unwrap();
        assert!(!captured.head.contains("authorization:"));
        assert!(matches!(
            classify_response(response),
            Err(PhylumError::Api { code: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_reqwest_encodes_json_body() {
        let (base, server) = serve_once("HTTP/1.1 201 Created", r#"{"id": "x"}"#).await;

        transport()
            .send(
                ApiRequest::post(format!("{}/data/projects", base))
                    .with_body(RequestBody::Json(serde_json::json!({"name": "demo"}))),
            )
            .await
            .unwrap();

        let captured = server.await.unwrap();
        assert!(captured.head.starts_with("post /data/projects"));
        assert!(captured.head.contains("content-type: application/json"));
        let sent: serde_json::Value = serde_json::from_slice(&captured.body).unwrap();
        assert_eq!(sent["name"], "demo");
    }

    #[tokio::test]
    async fn test_reqwest_encodes_form_body() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", r#"{"access_token": "a"}"#).await;

        transport()
            .send(
                ApiRequest::post(format!("{}/token", base)).with_body(RequestBody::Form(vec![
                    ("grant_type".to_string(), "refresh_token".to_string()),
                    ("scope".to_string(), "openid profile".to_string()),
                ])),
            )
            .await
            .unwrap();

        let captured = server.await.unwrap();
        assert!(captured
            .head
            .contains("content-type: application/x-www-form-urlencoded"));
        assert_eq!(
            String::from_utf8(captured.body).unwrap(),
            "grant_type=refresh_token&scope=openid+profile"
        );
    }

    #[tokio::test]
    async fn test_reqwest_encodes_multipart_file() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", "[]").await;

        transport()
            .send(ApiRequest::post(base).with_body(RequestBody::File {
                field: "lockfile".to_string(),
                file_name: "yarn.lock".to_string(),
                content: b"# yarn lockfile v1".to_vec(),
            }))
            .await
            .unwrap();

        let captured = server.await.unwrap();
        assert!(captured.head.contains("content-type: multipart/form-data; boundary="));
        let body = String::from_utf8_lossy(&captured.body);
        assert!(body.contains(r#"name="lockfile"; filename="yarn.lock""#));
        assert!(body.contains("# yarn lockfile v1"));
    }

    #[test]
    fn test_success_passes_through() {
        let response = classify_response(ApiResponse::new(200, "[]")).unwrap();
        assert_eq!(response.body, b"[]");
    }

    #[test]
    fn test_upstream_reset_is_rate_limited() {
        let body = format!("{} reset reason: overflow", UPSTREAM_RESET_MARKER);
        let err = classify_response(ApiResponse::new(503, body)).unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_plain_503_is_api_error() {
        let err = classify_response(ApiResponse::new(503, "maintenance")).unwrap_err();
        assert!(matches!(
            err,
            PhylumError::Api { code: 503, ref description } if description.is_empty()
        ));
    }

    #[test]
    fn test_error_envelope_is_parsed() {
        let body = r#"{"error": {"code": 404, "description": "Not Found",
                       "reason": "project missing",
                       "error_id": "85e3142f-efc9-41fc-b004-ca570df89af8"}}"#;
        let err = classify_response(ApiResponse::new(404, body)).unwrap_err();
        match err {
            PhylumError::Api { code, description } => {
                assert_eq!(code, 404);
                assert_eq!(description, "Not Found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_garbled_envelope_yields_empty_description() {
        let err = classify_response(ApiResponse::new(500, "<html>oops</html>")).unwrap_err();
        assert!(matches!(
            err,
            PhylumError::Api { code: 500, ref description } if description.is_empty()
        ));
    }

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::post("https://api.phylum.io/api/v0/data/jobs")
            .with_bearer("tok")
            .with_body(RequestBody::Json(serde_json::json!({"label": "main"})));
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.bearer.as_deref(), Some("tok"));
        assert!(matches!(request.body, RequestBody::Json(_)));
    }
}
