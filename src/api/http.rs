use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::types::ApiEnvelope;
use crate::error::{Error, Result};

/// JSON client for the upstream API.
///
/// Performs exactly one attempt per call; retries and fallbacks belong to the
/// orchestrator and the reconciler.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpClient {
  pub fn new(base_url: &str) -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

    Ok(Self::with_client(client, parse_base_url(base_url)?))
  }

  pub fn with_client(client: reqwest::Client, base_url: Url) -> Self {
    Self { client, base_url }
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Resolve an endpoint such as `/leads/42` against the base URL.
  pub fn url(&self, endpoint: &str) -> Result<Url> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
      return Url::parse(endpoint)
        .map_err(|e| Error::InvalidRequest(format!("invalid url {}: {}", endpoint, e)));
    }

    self
      .base_url
      .join(endpoint.trim_start_matches('/'))
      .map_err(|e| Error::InvalidRequest(format!("invalid endpoint {}: {}", endpoint, e)))
  }

  /// Send one request and unwrap the response envelope.
  ///
  /// The whole exchange (connect, send, read body) must finish within
  /// `timeout`; otherwise the attempt is abandoned with `NetworkTimeout`.
  pub async fn send(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
    token: Option<&str>,
    timeout: Duration,
  ) -> Result<ApiEnvelope> {
    let url = self.url(endpoint)?;
    debug!(%method, %url, "sending request");

    let mut request = self
      .client
      .request(method, url)
      .header(ACCEPT, "application/json");
    if let Some(token) = token {
      request = request.bearer_auth(token);
    }
    if let Some(body) = body {
      request = request.json(body);
    }

    let exchange = async {
      let response = request.send().await?;
      let status = response.status();
      let bytes = response.bytes().await?;
      Ok::<_, Error>((status, bytes))
    };

    let (status, bytes) = tokio::time::timeout(timeout, exchange)
      .await
      .map_err(|_| Error::NetworkTimeout(timeout))??;

    parse_response(status, &bytes)
  }
}

fn parse_base_url(raw: &str) -> Result<Url> {
  let mut base = raw.trim().to_string();
  // Url::join replaces the last segment unless the base ends with a slash
  if !base.ends_with('/') {
    base.push('/');
  }
  Url::parse(&base).map_err(|e| Error::Config(format!("invalid API base URL {}: {}", raw, e)))
}

fn parse_response(status: StatusCode, body: &[u8]) -> Result<ApiEnvelope> {
  if !status.is_success() {
    let message = serde_json::from_slice::<Value>(body)
      .ok()
      .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
      .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    return Err(Error::Http {
      status: status.as_u16(),
      message,
    });
  }

  if body.iter().all(u8::is_ascii_whitespace) {
    return Ok(ApiEnvelope::ok(None));
  }

  let envelope = ApiEnvelope::from_value(serde_json::from_slice(body)?);
  if !envelope.success {
    return Err(Error::Rejected(
      envelope
        .message
        .unwrap_or_else(|| "server reported failure".to_string()),
    ));
  }
  Ok(envelope)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{body_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  const TIMEOUT: Duration = Duration::from_secs(5);

  async fn setup() -> (MockServer, HttpClient) {
    let server = MockServer::start().await;
    let client = HttpClient::new(&format!("{}/api", server.uri())).unwrap();
    (server, client)
  }

  #[test]
  fn test_endpoints_join_under_base_path() {
    let client = HttpClient::new("http://localhost:5000/api").unwrap();
    assert_eq!(
      client.url("/leads/42").unwrap().as_str(),
      "http://localhost:5000/api/leads/42"
    );
    assert_eq!(
      client.url("leads").unwrap().as_str(),
      "http://localhost:5000/api/leads"
    );
  }

  #[test]
  fn test_invalid_base_url_is_config_error() {
    assert!(matches!(HttpClient::new("not a url"), Err(Error::Config(_))));
  }

  #[tokio::test]
  async fn test_send_unwraps_envelope_and_sends_token() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
      .and(path("/api/leads"))
      .and(header("authorization", "Bearer tok"))
      .and(body_json(json!({"name": "A"})))
      .respond_with(ResponseTemplate::new(201).set_body_json(json!({
        "success": true,
        "data": {"_id": "srv-1", "name": "A"},
        "message": "Lead created"
      })))
      .expect(1)
      .mount(&server)
      .await;

    let envelope = client
      .send(
        Method::POST,
        "/leads",
        Some(&json!({"name": "A"})),
        Some("tok"),
        TIMEOUT,
      )
      .await
      .unwrap();

    assert_eq!(envelope.data, Some(json!({"_id": "srv-1", "name": "A"})));
    assert_eq!(envelope.message.as_deref(), Some("Lead created"));
  }

  #[tokio::test]
  async fn test_non_2xx_is_http_error_with_server_message() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
      .and(path("/api/leads/9"))
      .respond_with(ResponseTemplate::new(404).set_body_json(json!({
        "success": false,
        "message": "Lead not found"
      })))
      .mount(&server)
      .await;

    let err = client
      .send(Method::DELETE, "/leads/9", None, None, TIMEOUT)
      .await
      .unwrap_err();

    match err {
      Error::Http { status, message } => {
        assert_eq!(status, 404);
        assert_eq!(message, "Lead not found");
      }
      other => panic!("expected Http error, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_success_false_is_rejected() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "success": false,
        "message": "quota exceeded"
      })))
      .mount(&server)
      .await;

    let err = client
      .send(Method::GET, "/leads", None, None, TIMEOUT)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Rejected(ref m) if m == "quota exceeded"));
  }

  #[tokio::test]
  async fn test_empty_body_is_success_without_data() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
      .and(path("/api/leads/1"))
      .respond_with(ResponseTemplate::new(204))
      .mount(&server)
      .await;

    let envelope = client
      .send(Method::DELETE, "/leads/1", None, None, TIMEOUT)
      .await
      .unwrap();
    assert!(envelope.success);
    assert_eq!(envelope.data, None);
  }

  #[tokio::test]
  async fn test_slow_response_times_out() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({"success": true, "data": []}))
          .set_delay(Duration::from_millis(500)),
      )
      .mount(&server)
      .await;

    let err = client
      .send(Method::GET, "/leads", None, None, Duration::from_millis(50))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::NetworkTimeout(_)));
    assert!(err.is_retryable());
  }

  #[tokio::test]
  async fn test_unreachable_server_is_network_error() {
    let client = HttpClient::new("http://127.0.0.1:9/api").unwrap();
    let err = client
      .send(Method::GET, "/leads", None, None, TIMEOUT)
      .await
      .unwrap_err();
    assert!(err.is_retryable());
  }
}
