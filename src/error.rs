//! Error types shared by the cache, the transports and the push bridge.

use crate::cache::QueryKey;

/// Failure talking to the REST API, as seen by the cache layer.
///
/// Cloneable because a failed fetch is stored on the entry and handed to
/// every waiter that shared the request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
  /// The request never produced a response (DNS, connect, timeout, ...)
  #[error("fetch failed: {0}")]
  Fetch(String),
  /// Non-2xx response
  #[error("server returned {status}: {message}")]
  Server { status: u16, message: String },
  /// The response did not match the endpoint's declared shape
  #[error("failed to decode response: {0}")]
  Decode(String),
  /// Committed server data disagreed with the optimistic value
  #[error("server data for {key} differs from the optimistic value")]
  Conflict { key: String },
}

impl ApiError {
  pub fn decode(err: impl std::fmt::Display) -> Self {
    Self::Decode(err.to_string())
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    match err.status() {
      Some(status) => Self::Server {
        status: status.as_u16(),
        message: err.to_string(),
      },
      None if err.is_decode() => Self::Decode(err.to_string()),
      None => Self::Fetch(err.to_string()),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error(transparent)]
  Api(#[from] ApiError),
  #[error("cannot evict {key}: {subscribers} active subscriber(s)")]
  InUse { key: QueryKey, subscribers: usize },
  #[error("cache store has shut down")]
  Closed,
}

/// Error returned by a mutation trigger. The optimistic patches of a failed
/// mutation have already been rolled back by the time the caller sees it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
  #[error(transparent)]
  Api(#[from] ApiError),
  #[error("cache store has shut down")]
  Closed,
}

impl MutationError {
  pub fn api(&self) -> Option<&ApiError> {
    match self {
      Self::Api(err) => Some(err),
      Self::Closed => None,
    }
  }
}

/// Push transport failure. Never leaves the push bridge.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
  #[error("failed to connect to push channel: {0}")]
  Connect(String),
  #[error("push protocol error: {0}")]
  Protocol(String),
  #[error("broker error: {0}")]
  Broker(String),
  #[error("push channel closed")]
  Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
  fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
      WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
      other => Self::Protocol(other.to_string()),
    }
  }
}
