//! Typed entry points: `use_query` and `use_mutation`.
//!
//! The rest of the application talks to the cache only through these.

use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::warn;

use super::endpoint::{MutationEndpoint, QueryEndpoint};
use super::entry::{EntrySnapshot, QuerySource, QueryStatus};
use super::invalidation::InvalidationReport;
use super::mutation::{MutationRunner, MutationTrigger};
use super::store::{CacheStore, StoreConfig, Subscription};
use super::tag::Tag;
use crate::error::{ApiError, CacheError};
use crate::transport::Transport;

/// Typed view of a query entry.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
  pub status: QueryStatus,
  /// Last good data, also present while refetching or after a failed refetch
  pub data: Option<T>,
  pub error: Option<ApiError>,
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.error.as_ref()
  }
}

impl<T: serde::de::DeserializeOwned> QueryState<T> {
  fn decode(snapshot: EntrySnapshot) -> Self {
    let EntrySnapshot {
      key,
      status,
      data,
      error,
      ..
    } = snapshot;
    match data.map(serde_json::from_value::<T>).transpose() {
      Ok(data) => Self { status, data, error },
      Err(e) => {
        warn!(key = %key, error = %e, "cached data no longer matches the endpoint output");
        Self {
          status: QueryStatus::Error,
          data: None,
          error: Some(ApiError::decode(e)),
        }
      }
    }
  }
}

/// Cache front door. Clone freely; every clone shares the same store.
#[derive(Clone)]
pub struct CacheClient {
  store: CacheStore,
  transport: Arc<dyn Transport>,
  mutations: MutationRunner,
}

impl CacheClient {
  /// Spawn a store and wrap it. Must be called inside a tokio runtime.
  pub fn new(transport: Arc<dyn Transport>, config: StoreConfig) -> Self {
    let store = CacheStore::spawn(config);
    let mutations = MutationRunner {
      store: store.clone(),
      transport: transport.clone(),
      ids: Arc::new(AtomicU64::new(0)),
    };
    Self {
      store,
      transport,
      mutations,
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Subscribe to `Q` for `args`. The subscription lives as long as the handle.
  pub async fn use_query<Q: QueryEndpoint>(&self, args: Q::Args) -> Result<QueryHandle<Q>, CacheError> {
    let source = self.source::<Q>(&args);
    let subscription = self.store.subscribe(Q::key(&args), source).await?;
    Ok(QueryHandle {
      subscription,
      _endpoint: PhantomData,
    })
  }

  /// One-off read without subscribing. Served from cache when fresh.
  pub async fn fetch<Q: QueryEndpoint>(&self, args: Q::Args) -> Result<QueryState<Q::Output>, CacheError> {
    let source = self.source::<Q>(&args);
    let snapshot = self.store.query(Q::key(&args), source, false).await?;
    Ok(QueryState::decode(snapshot))
  }

  pub fn use_mutation<M: MutationEndpoint>(&self) -> MutationTrigger<M> {
    MutationTrigger::new(self.mutations.clone())
  }

  pub async fn invalidate(&self, tags: Vec<Tag>) -> Result<InvalidationReport, CacheError> {
    self.store.invalidate(tags).await
  }

  fn source<Q: QueryEndpoint>(&self, args: &Q::Args) -> QuerySource {
    let transport = self.transport.clone();
    let request = Q::request(args);
    let tag_args = args.clone();

    QuerySource::new(
      move || {
        let transport = transport.clone();
        let request = request.clone();
        async move {
          let body = transport.send(&request).await?;
          // Round-trip through the typed output so stored data always decodes.
          let typed: Q::Output = serde_json::from_value(body).map_err(ApiError::decode)?;
          serde_json::to_value(typed).map_err(ApiError::decode)
        }
        .boxed()
      },
      move |data: &Value| match Q::Output::deserialize(data) {
        Ok(typed) => Q::provides(&tag_args, &typed),
        Err(e) => {
          warn!(endpoint = Q::NAME, error = %e, "cannot derive tags from cached data");
          Vec::new()
        }
      },
    )
  }
}

/// Live, typed subscription to one query. Dropping it unsubscribes.
pub struct QueryHandle<Q: QueryEndpoint> {
  subscription: Subscription,
  _endpoint: PhantomData<fn() -> Q>,
}

impl<Q: QueryEndpoint> QueryHandle<Q> {
  pub fn state(&self) -> QueryState<Q::Output> {
    QueryState::decode(self.subscription.snapshot())
  }

  /// Returns the new state if it changed since the last call.
  pub fn poll(&mut self) -> Option<QueryState<Q::Output>> {
    self.subscription.poll().map(QueryState::decode)
  }

  pub async fn changed(&mut self) -> Result<QueryState<Q::Output>, CacheError> {
    self.subscription.changed().await.map(QueryState::decode)
  }

  /// Wait for the current fetch, if any, to finish.
  pub async fn settled(&mut self) -> Result<QueryState<Q::Output>, CacheError> {
    self.subscription.settled().await.map(QueryState::decode)
  }

  /// Manual retry, e.g. after an error.
  pub async fn refetch(&self) -> Result<QueryState<Q::Output>, CacheError> {
    let snapshot = self.subscription.store().retry(self.subscription.key()).await?;
    Ok(snapshot.map(QueryState::decode).unwrap_or_else(|| self.state()))
  }
}
