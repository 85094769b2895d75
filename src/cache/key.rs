//! Query keys: endpoint name plus canonical arguments.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Identifies one cached read.
///
/// Arguments are stored as canonical JSON (object keys sorted), so two
/// structurally equal argument values always produce equal keys.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
  endpoint: &'static str,
  args: Arc<str>,
}

impl QueryKey {
  pub fn new<A: Serialize + fmt::Debug>(endpoint: &'static str, args: &A) -> Self {
    let args = match serde_json::to_value(args) {
      Ok(value) => value.to_string(),
      Err(e) => {
        // Only reachable for args serde_json cannot represent (non-string map keys).
        tracing::warn!(endpoint, error = %e, "query args are not JSON; keying by Debug output");
        format!("{:?}", args)
      }
    };
    Self {
      endpoint,
      args: args.into(),
    }
  }

  pub fn endpoint(&self) -> &'static str {
    self.endpoint
  }

  pub fn args(&self) -> &str {
    &self.args
  }

  /// Stable, fixed-length identifier for log fields.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.endpoint.as_bytes());
    hasher.update(b":");
    hasher.update(self.args.as_bytes());
    hex::encode(&hasher.finalize()[..8])
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}({})", self.endpoint, self.args)
  }
}

impl fmt::Debug for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(self, f)
  }
}
