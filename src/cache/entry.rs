//! Query entries and the snapshots handed to subscribers.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use super::endpoint::{MutationId, Updater};
use super::key::QueryKey;
use super::tag::Tag;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Registered but never fetched
  Idle,
  Loading,
  Success,
  Error,
}

/// Point-in-time view of an entry.
///
/// `data` is the last good value: it survives errors and is still present
/// while a background refetch is `Loading`.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
  pub key: QueryKey,
  pub status: QueryStatus,
  pub data: Option<Value>,
  pub error: Option<ApiError>,
  pub last_fetched_at: Option<DateTime<Utc>>,
  pub subscriber_count: usize,
}

impl EntrySnapshot {
  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  /// Loading with nothing to show yet.
  pub fn is_initial_load(&self) -> bool {
    self.is_loading() && self.data.is_none()
  }
}

pub(crate) type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync>;
pub(crate) type TagDeriver = Arc<dyn Fn(&Value) -> Vec<Tag> + Send + Sync>;

/// How to (re)load an entry and how to tag its data.
#[derive(Clone)]
pub struct QuerySource {
  pub(crate) fetcher: Fetcher,
  pub(crate) derive_tags: TagDeriver,
}

impl QuerySource {
  pub fn new<F, T>(fetcher: F, derive_tags: T) -> Self
  where
    F: Fn() -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync + 'static,
    T: Fn(&Value) -> Vec<Tag> + Send + Sync + 'static,
  {
    Self {
      fetcher: Arc::new(fetcher),
      derive_tags: Arc::new(derive_tags),
    }
  }
}

/// One outstanding optimistic change to an entry.
pub(crate) struct OptimisticPatch {
  pub mutation: MutationId,
  /// Data immediately before this patch was applied
  pub previous_snapshot: Value,
  pub apply: Updater,
  pub applied_at: DateTime<Utc>,
}

pub(crate) struct QueryEntry {
  pub key: QueryKey,
  pub status: QueryStatus,
  pub data: Option<Value>,
  pub error: Option<ApiError>,
  pub provided_tags: BTreeSet<Tag>,
  pub subscriber_count: usize,
  pub last_fetched_at: Option<DateTime<Utc>>,
  /// Monotonic twin of `last_fetched_at`, used for TTL checks
  pub fetched_at: Option<Instant>,
  /// Invalidated while nobody was watching
  pub stale: bool,
  pub source: QuerySource,
  pub in_flight: Option<u64>,
  pub waiters: Vec<oneshot::Sender<EntrySnapshot>>,
  pub watch: watch::Sender<EntrySnapshot>,
  /// Outstanding optimistic patches in application order
  pub patches: Vec<OptimisticPatch>,
  pub evict_epoch: u64,
  pub evict_when_settled: bool,
  /// Invalidated while a fetch was in flight; that fetch may predate the change
  pub refetch_when_settled: bool,
}

impl QueryEntry {
  pub fn new(key: QueryKey, source: QuerySource) -> Self {
    let initial = EntrySnapshot {
      key: key.clone(),
      status: QueryStatus::Idle,
      data: None,
      error: None,
      last_fetched_at: None,
      subscriber_count: 0,
    };
    let (watch, _) = watch::channel(initial);
    Self {
      key,
      status: QueryStatus::Idle,
      data: None,
      error: None,
      provided_tags: BTreeSet::new(),
      subscriber_count: 0,
      last_fetched_at: None,
      fetched_at: None,
      stale: false,
      source,
      in_flight: None,
      waiters: Vec::new(),
      watch,
      patches: Vec::new(),
      evict_epoch: 0,
      evict_when_settled: false,
      refetch_when_settled: false,
    }
  }

  pub fn snapshot(&self) -> EntrySnapshot {
    EntrySnapshot {
      key: self.key.clone(),
      status: self.status,
      data: self.data.clone(),
      error: self.error.clone(),
      last_fetched_at: self.last_fetched_at,
      subscriber_count: self.subscriber_count,
    }
  }

  /// Push the current state to every subscriber.
  pub fn publish(&self) {
    self.watch.send_replace(self.snapshot());
  }

  /// Whether the next subscription or query should go to the network.
  pub fn needs_fetch(&self, stale_time: Option<std::time::Duration>) -> bool {
    match self.status {
      QueryStatus::Loading => false,
      QueryStatus::Idle | QueryStatus::Error => true,
      QueryStatus::Success => self.stale || self.ttl_expired(stale_time),
    }
  }

  fn ttl_expired(&self, stale_time: Option<std::time::Duration>) -> bool {
    match (stale_time, self.fetched_at) {
      (Some(ttl), Some(at)) => at.elapsed() > ttl,
      (Some(_), None) => true,
      (None, _) => false,
    }
  }

  /// Recompute `provided_tags` from the current data. Returns the previous set.
  pub fn retag(&mut self) -> BTreeSet<Tag> {
    let tags = match &self.data {
      Some(data) => (self.source.derive_tags)(data).into_iter().collect(),
      None => BTreeSet::new(),
    };
    std::mem::replace(&mut self.provided_tags, tags)
  }
}
