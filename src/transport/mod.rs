//! The network boundary the cache calls into.

mod http;

pub use http::{HttpTransport, Session};

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::Request;
use crate::error::ApiError;

/// Performs one REST call and returns its JSON body.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &Request) -> Result<Value, ApiError>;
}

#[cfg(test)]
pub(crate) mod fake {
  //! Scripted transport for tests.

  use super::*;
  use std::collections::HashMap;
  use std::sync::{Arc, Mutex};
  use std::time::Duration;

  #[derive(Clone)]
  struct Reply {
    result: Result<Value, ApiError>,
    delay: Duration,
  }

  /// Routes are `"METHOD /path"`. Each route answers with its most recently
  /// scripted reply until re-scripted.
  #[derive(Default)]
  pub struct FakeTransport {
    routes: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<Request>>,
  }

  impl FakeTransport {
    pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
    }

    pub fn respond(&self, route: &str, body: Value) {
      self.script(route, Ok(body), Duration::ZERO);
    }

    pub fn respond_after(&self, route: &str, delay: Duration, body: Value) {
      self.script(route, Ok(body), delay);
    }

    pub fn fail(&self, route: &str, err: ApiError) {
      self.script(route, Err(err), Duration::ZERO);
    }

    pub fn fail_after(&self, route: &str, delay: Duration, err: ApiError) {
      self.script(route, Err(err), delay);
    }

    fn script(&self, route: &str, result: Result<Value, ApiError>, delay: Duration) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(route.to_string(), Reply { result, delay });
    }

    /// Number of calls made to `route`.
    pub fn count(&self, route: &str) -> usize {
      self
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|r| route_of(r) == route)
        .count()
    }

    pub fn calls(&self) -> Vec<Request> {
      self.calls.lock().unwrap().clone()
    }
  }

  fn route_of(request: &Request) -> String {
    format!("{} {}", request.method, request.path)
  }

  #[async_trait]
  impl Transport for FakeTransport {
    async fn send(&self, request: &Request) -> Result<Value, ApiError> {
      self.calls.lock().unwrap().push(request.clone());
      let route = route_of(request);
      let reply = self.routes.lock().unwrap().get(&route).cloned();
      let Some(reply) = reply else {
        return Err(ApiError::Server {
          status: 404,
          message: format!("no route for {}", route),
        });
      };
      if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
      }
      reply.result
    }
  }
}
