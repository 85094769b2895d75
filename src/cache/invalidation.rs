//! Tag invalidation.
//!
//! Subscribed entries providing a matching tag are refetched at once, or
//! right after the fetch already in flight; the rest are only marked stale
//! and reload on their next subscription.

use tracing::{debug, info};

use super::entry::QueryStatus;
use super::key::QueryKey;
use super::store::StoreState;
use super::tag::Tag;

/// What an invalidation did, in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
  /// Entries with subscribers: refetched, or already loading and left to finish
  pub refetched: Vec<QueryKey>,
  /// Entries without subscribers, marked stale
  pub marked_stale: Vec<QueryKey>,
}

impl InvalidationReport {
  pub fn is_empty(&self) -> bool {
    self.refetched.is_empty() && self.marked_stale.is_empty()
  }
}

impl StoreState {
  pub(super) fn invalidate(&mut self, tags: &[Tag]) -> InvalidationReport {
    let mut report = InvalidationReport::default();
    if tags.is_empty() {
      return report;
    }

    for key in self.index.matching(tags) {
      let Some(entry) = self.entries.get_mut(&key) else {
        continue;
      };
      if entry.subscriber_count == 0 {
        entry.stale = true;
        report.marked_stale.push(key);
        continue;
      }
      if entry.status == QueryStatus::Loading {
        // One follow-up fetch once the current one lands, however many
        // invalidations arrive in between.
        entry.refetch_when_settled = true;
        debug!(key = %key, "invalidated while loading; refetching once it settles");
      } else {
        self.start_fetch(&key);
      }
      report.refetched.push(key);
    }

    if !report.is_empty() {
      let rendered: Vec<String> = tags.iter().map(ToString::to_string).collect();
      info!(
        tags = %rendered.join(","),
        refetched = report.refetched.len(),
        marked_stale = report.marked_stale.len(),
        "invalidated"
      );
    }
    report
  }
}

#[cfg(test)]
mod tests {
  use crate::cache::entry::QuerySource;
  use crate::cache::store::{CacheStore, StoreConfig};
  use crate::cache::{EntityKind, QueryKey, QueryStatus, Tag};
  use crate::error::ApiError;
  use futures::FutureExt;
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  /// Source that returns `data` after `delay` and tags it with `tags`.
  fn source(calls: Arc<AtomicUsize>, data: Value, tags: Vec<Tag>, delay: Duration) -> QuerySource {
    QuerySource::new(
      move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let data = data.clone();
        async move {
          tokio::time::sleep(delay).await;
          Ok::<_, ApiError>(data)
        }
        .boxed()
      },
      move |_: &Value| tags.clone(),
    )
  }

  #[tokio::test]
  async fn test_unsubscribed_entry_is_marked_stale_not_fetched() {
    let store = CacheStore::spawn(StoreConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::new("getTaskById", &42);
    let src = source(calls.clone(), json!({"id": 42}), vec![Tag::task(42)], Duration::ZERO);
    store.query(key.clone(), src.clone(), false).await.unwrap();

    let report = store.invalidate(vec![Tag::task(42)]).await.unwrap();
    assert_eq!(report.marked_stale, vec![key.clone()]);
    assert!(report.refetched.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Next use reloads.
    let mut sub = store.subscribe(key, src).await.unwrap();
    sub.settled().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_subscribed_entries_refetch_exactly_once() {
    let store = CacheStore::spawn(StoreConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::new("getTasks", &1);
    let src = source(
      calls.clone(),
      json!([{"id": 1}, {"id": 2}]),
      vec![Tag::task_list(), Tag::task(1), Tag::task(2)],
      Duration::ZERO,
    );
    let mut sub = store.subscribe(key.clone(), src).await.unwrap();
    sub.settled().await.unwrap();

    // Several matching tags in one call still mean one refetch.
    let report = store
      .invalidate(vec![Tag::task(1), Tag::task(2), Tag::task_list()])
      .await
      .unwrap();
    assert_eq!(report.refetched, vec![key]);
    sub.settled().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  /// Source answering with `responses` in order (the last one repeats).
  fn sequence(calls: Arc<AtomicUsize>, responses: Vec<Value>, delay: Duration) -> QuerySource {
    QuerySource::new(
      move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        let data = responses
          .get(n)
          .or(responses.last())
          .cloned()
          .unwrap_or(Value::Null);
        async move {
          tokio::time::sleep(delay).await;
          Ok::<_, ApiError>(data)
        }
        .boxed()
      },
      |_: &Value| vec![Tag::task_list()],
    )
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidating_a_loading_entry_refetches_once_it_settles() {
    let store = CacheStore::spawn(StoreConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::new("getTasks", &1);
    // Initial load, a refetch that started before the write, then the
    // list as it is after the write.
    let src = sequence(
      calls.clone(),
      vec![json!([]), json!([]), json!([{"id": 10}])],
      Duration::from_secs(2),
    );
    let mut sub = store.subscribe(key.clone(), src).await.unwrap();
    sub.settled().await.unwrap();

    let first = store.invalidate(vec![Tag::task_list()]).await.unwrap();
    assert_eq!(first.refetched, vec![key.clone()]);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.get(&key).await.unwrap().unwrap().status, QueryStatus::Loading);

    // Arrives mid-fetch, twice: still only one follow-up fetch.
    let second = store.invalidate(vec![Tag::task_list()]).await.unwrap();
    let third = store.invalidate(vec![Tag::task_list()]).await.unwrap();
    assert_eq!(second.refetched, vec![key.clone()]);
    assert_eq!(second, third);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let settled = sub.settled().await.unwrap();
    assert_eq!(settled.data, Some(json!([{"id": 10}])));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_loading_entry_without_subscribers_ends_up_stale() {
    let store = CacheStore::spawn(StoreConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::new("getTasks", &2);
    let src = sequence(calls.clone(), vec![json!([])], Duration::from_secs(2));
    store.query(key.clone(), src.clone(), false).await.unwrap();

    let pending = tokio::spawn({
      let store = store.clone();
      let key = key.clone();
      let src = src.clone();
      async move { store.query(key, src, true).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    let report = store.invalidate(vec![Tag::task_list()]).await.unwrap();
    assert_eq!(report.marked_stale, vec![key.clone()]);
    pending.await.unwrap().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // The forced fetch may predate the change; the next read goes out again.
    store.query(key, src, false).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_kind_wide_invalidation() {
    let store = CacheStore::spawn(StoreConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    for task in [1, 2] {
      let key = QueryKey::new("getCommentsByTask", &task);
      let src = source(calls.clone(), json!([]), vec![Tag::comments(task)], Duration::ZERO);
      store.query(key, src, false).await.unwrap();
    }
    let other = QueryKey::new("getTaskById", &1);
    store
      .query(
        other,
        source(calls.clone(), json!({"id": 1}), vec![Tag::task(1)], Duration::ZERO),
        false,
      )
      .await
      .unwrap();

    let report = store.invalidate(vec![Tag::all(EntityKind::Comment)]).await.unwrap();
    assert_eq!(report.marked_stale.len(), 2);
  }

  #[tokio::test]
  async fn test_unmatched_tags_do_nothing() {
    let store = CacheStore::spawn(StoreConfig::default());
    let report = store.invalidate(vec![Tag::project(3)]).await.unwrap();
    assert!(report.is_empty());
    assert!(store.invalidate(Vec::new()).await.unwrap().is_empty());
  }
}
