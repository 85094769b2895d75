//! Endpoint declarations.
//!
//! An endpoint cannot be added without stating its tags: `provides` and
//! `invalidates` are required trait items with no default.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::key::QueryKey;
use super::tag::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What the cache hands to the transport. Paths are relative to the API base.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
}

impl Request {
  pub fn get(path: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      path: path.into(),
      body: None,
    }
  }

  pub fn post(path: impl Into<String>, body: impl Serialize) -> Self {
    Self::with_body(Method::Post, path, body)
  }

  pub fn put(path: impl Into<String>, body: impl Serialize) -> Self {
    Self::with_body(Method::Put, path, body)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self {
      method: Method::Delete,
      path: path.into(),
      body: None,
    }
  }

  fn with_body(method: Method, path: impl Into<String>, body: impl Serialize) -> Self {
    let body = match serde_json::to_value(body) {
      Ok(value) => Some(value),
      Err(e) => {
        tracing::warn!(%method, error = %e, "request body is not JSON; sending without body");
        None
      }
    };
    Self {
      method,
      path: path.into(),
      body,
    }
  }
}

/// A cached read.
pub trait QueryEndpoint: Send + Sync + 'static {
  /// Endpoint name, first half of every `QueryKey` for this endpoint
  const NAME: &'static str;

  type Args: Serialize + fmt::Debug + Clone + Send + Sync + 'static;
  type Output: Serialize + DeserializeOwned + Send + 'static;

  fn request(args: &Self::Args) -> Request;

  /// Tags this result provides. Re-evaluated every time the data changes.
  fn provides(args: &Self::Args, data: &Self::Output) -> Vec<Tag>;

  fn key(args: &Self::Args) -> QueryKey {
    QueryKey::new(Self::NAME, args)
  }
}

/// A write.
pub trait MutationEndpoint: Send + Sync + 'static {
  const NAME: &'static str;

  type Args: Serialize + fmt::Debug + Clone + Send + Sync + 'static;
  type Response: DeserializeOwned + Send + 'static;

  fn request(args: &Self::Args) -> Request;

  /// Tags to invalidate once the write has succeeded.
  fn invalidates(args: &Self::Args) -> Vec<Tag>;

  /// Patches applied to cached reads before the write is sent.
  fn optimistic(_args: &Self::Args, _cx: &MutationContext) -> Vec<CacheUpdate> {
    Vec::new()
  }

  /// Authoritative updates derived from the server response.
  fn commit(
    _args: &Self::Args,
    _response: &Self::Response,
    _cx: &MutationContext,
  ) -> Vec<CacheUpdate> {
    Vec::new()
  }
}

/// Correlates optimistic placeholders with the mutation that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(pub u64);

impl MutationId {
  /// Placeholder id for entities created optimistically. Negative so it can
  /// never collide with a server-assigned id.
  pub fn placeholder_id(&self) -> i64 {
    -(self.0 as i64) - 1
  }
}

impl fmt::Display for MutationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "m{}", self.0)
  }
}

#[derive(Debug, Clone)]
pub struct MutationContext {
  pub id: MutationId,
  pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Rewrites the JSON data of one entry. Must be re-runnable: outstanding
/// patches are replayed when the data underneath them changes.
pub type Updater = Arc<dyn Fn(&mut Value) -> Result<(), serde_json::Error> + Send + Sync>;

/// A change to one cached read.
#[derive(Clone)]
pub struct CacheUpdate {
  pub key: QueryKey,
  pub apply: Updater,
}

impl CacheUpdate {
  /// Typed update of the `Q` entry for `args`.
  pub fn new<Q, F>(args: &Q::Args, f: F) -> Self
  where
    Q: QueryEndpoint,
    F: Fn(&mut Q::Output) + Send + Sync + 'static,
  {
    let apply: Updater = Arc::new(move |value: &mut Value| {
      let mut data = Q::Output::deserialize(&*value)?;
      f(&mut data);
      *value = serde_json::to_value(data)?;
      Ok(())
    });
    Self {
      key: Q::key(args),
      apply,
    }
  }

  /// Replace the `Q` entry's data wholesale.
  pub fn replace<Q>(args: &Q::Args, data: Q::Output) -> Self
  where
    Q: QueryEndpoint,
    Q::Output: Clone + Sync,
  {
    Self::new::<Q, _>(args, move |current| *current = data.clone())
  }
}

impl fmt::Debug for CacheUpdate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheUpdate")
      .field("key", &self.key)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::EntityKind;
  use serde_json::json;

  struct Numbers;

  impl QueryEndpoint for Numbers {
    const NAME: &'static str = "numbers";
    type Args = ();
    type Output = Vec<i64>;

    fn request(_args: &()) -> Request {
      Request::get("/numbers")
    }

    fn provides(_args: &(), data: &Vec<i64>) -> Vec<Tag> {
      data
        .iter()
        .map(|n| Tag::entity(EntityKind::Task, n))
        .collect()
    }
  }

  #[test]
  fn test_typed_update_rewrites_json() {
    let update = CacheUpdate::new::<Numbers, _>(&(), |numbers| numbers.push(4));
    let mut value = json!([1, 2, 3]);
    (update.apply)(&mut value).unwrap();
    assert_eq!(value, json!([1, 2, 3, 4]));
    assert_eq!(update.key, Numbers::key(&()));
  }

  #[test]
  fn test_typed_update_rejects_mismatched_data() {
    let update = CacheUpdate::new::<Numbers, _>(&(), |numbers| numbers.clear());
    let mut value = json!({"not": "a list"});
    assert!((update.apply)(&mut value).is_err());
    assert_eq!(value, json!({"not": "a list"}));
  }

  #[test]
  fn test_request_builders() {
    let req = Request::put("/api/projects/1/tasks/2/status", json!({"taskStatus": "ONGOING"}));
    assert_eq!(req.method, Method::Put);
    assert_eq!(req.body, Some(json!({"taskStatus": "ONGOING"})));
    assert_eq!(Request::delete("/x").body, None);
  }

  #[test]
  fn test_placeholder_ids_are_negative_and_distinct() {
    assert_eq!(MutationId(0).placeholder_id(), -1);
    assert_eq!(MutationId(41).placeholder_id(), -42);
  }
}
