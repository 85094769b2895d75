use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::Transport;
use crate::cache::{Method, Request};
use crate::error::ApiError;

/// Who the client is talking as. Passed in explicitly; never read from globals.
#[derive(Debug, Clone, Default)]
pub struct Session {
  /// Bearer token, if the server requires one
  pub auth_token: Option<String>,
}

impl Session {
  /// Token from `TASKSYNC_API_TOKEN`, if set.
  pub fn from_env() -> Self {
    Self {
      auth_token: std::env::var("TASKSYNC_API_TOKEN")
        .ok()
        .filter(|t| !t.is_empty()),
    }
  }
}

/// REST transport over `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: Url, session: &Session) -> Result<Self, ApiError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = &session.auth_token {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| ApiError::Fetch(format!("invalid auth token: {}", e)))?;
      headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(30))
      .build()?;

    Ok(Self { client, base_url })
  }

  fn url_for(&self, path: &str) -> Result<Url, ApiError> {
    join(&self.base_url, path)
  }
}

/// Append `path` to the base, keeping any path prefix the base already has.
fn join(base: &Url, path: &str) -> Result<Url, ApiError> {
  let joined = format!(
    "{}/{}",
    base.as_str().trim_end_matches('/'),
    path.trim_start_matches('/')
  );
  Url::parse(&joined).map_err(|e| ApiError::Fetch(format!("invalid url {}: {}", joined, e)))
}

/// Empty bodies become `null`; non-JSON bodies are kept as a string.
fn parse_body(text: &str) -> Value {
  if text.trim().is_empty() {
    return Value::Null;
  }
  serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Prefer the server's `message` field, then the raw body, then the status reason.
fn error_message(status: reqwest::StatusCode, text: &str) -> String {
  match parse_body(text) {
    Value::Object(map) => match map.get("message").and_then(Value::as_str) {
      Some(message) => message.to_string(),
      None => Value::Object(map).to_string(),
    },
    Value::String(s) => s,
    Value::Null => status
      .canonical_reason()
      .unwrap_or("request failed")
      .to_string(),
    other => other.to_string(),
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &Request) -> Result<Value, ApiError> {
    let url = self.url_for(&request.path)?;
    let builder = match request.method {
      Method::Get => self.client.get(url),
      Method::Post => self.client.post(url),
      Method::Put => self.client.put(url),
      Method::Delete => self.client.delete(url),
    };
    let builder = match &request.body {
      Some(body) => builder.json(body),
      None => builder,
    };

    let response = builder.send().await?;
    let status = response.status();
    let text = response.text().await?;
    debug!(method = %request.method, path = %request.path, status = status.as_u16(), "response");

    if !status.is_success() {
      return Err(ApiError::Server {
        status: status.as_u16(),
        message: error_message(status, &text),
      });
    }
    Ok(parse_body(&text))
  }
}
