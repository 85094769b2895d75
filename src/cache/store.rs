//! The query cache store.
//!
//! All entry state lives in one task. Every operation is a `Command` sent
//! over an unbounded channel and applied to the state in full before the
//! next one is looked at, so transitions never interleave. Network calls run
//! in their own tasks and report back with another command.

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::endpoint::{CacheUpdate, MutationId, Updater};
use super::entry::{EntrySnapshot, QueryEntry, QuerySource, QueryStatus};
use super::index::TagIndex;
use super::invalidation::InvalidationReport;
use super::key::QueryKey;
use super::optimistic;
use super::tag::Tag;
use crate::error::{ApiError, CacheError};

#[derive(Debug, Clone)]
pub struct StoreConfig {
  /// Age after which successful data counts as stale. `None`: fresh until invalidated.
  pub stale_time: Option<Duration>,
  /// Grace period before an entry nobody subscribes to is evicted
  pub keep_unused_for: Duration,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      stale_time: None,
      keep_unused_for: Duration::from_secs(60),
    }
  }
}

pub(crate) enum Settlement {
  Commit {
    touched: Vec<QueryKey>,
    updates: Vec<CacheUpdate>,
  },
  Rollback {
    touched: Vec<QueryKey>,
  },
}

pub(crate) enum Command {
  Query {
    key: QueryKey,
    source: QuerySource,
    force: bool,
    reply: oneshot::Sender<EntrySnapshot>,
  },
  Retry {
    key: QueryKey,
    reply: oneshot::Sender<Option<EntrySnapshot>>,
  },
  Subscribe {
    key: QueryKey,
    source: QuerySource,
    reply: oneshot::Sender<watch::Receiver<EntrySnapshot>>,
  },
  Unsubscribe {
    key: QueryKey,
  },
  Get {
    key: QueryKey,
    reply: oneshot::Sender<Option<EntrySnapshot>>,
  },
  Patch {
    key: QueryKey,
    apply: Updater,
    reply: oneshot::Sender<bool>,
  },
  Evict {
    key: QueryKey,
    reply: oneshot::Sender<Result<(), CacheError>>,
  },
  EvictExpired {
    key: QueryKey,
    epoch: u64,
  },
  Invalidate {
    tags: Vec<Tag>,
    reply: Option<oneshot::Sender<InvalidationReport>>,
  },
  ApplyOptimistic {
    mutation: MutationId,
    updates: Vec<CacheUpdate>,
    reply: oneshot::Sender<Vec<QueryKey>>,
  },
  Settle {
    mutation: MutationId,
    settlement: Settlement,
    reply: oneshot::Sender<()>,
  },
  FetchSettled {
    key: QueryKey,
    fetch_id: u64,
    result: Result<Value, ApiError>,
  },
}

/// Handle to the store task. Cheap to clone; the task stops once every
/// handle (and every subscription) is gone.
#[derive(Clone)]
pub struct CacheStore {
  commands: mpsc::UnboundedSender<Command>,
}

impl CacheStore {
  /// Start the store task. Must be called inside a tokio runtime.
  pub fn spawn(config: StoreConfig) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut state = StoreState::new(config, tx.downgrade());

    tokio::spawn(async move {
      while let Some(command) = rx.recv().await {
        state.handle(command);
      }
      debug!("cache store stopped");
    });

    Self { commands: tx }
  }

  fn send(&self, command: Command) -> Result<(), CacheError> {
    self.commands.send(command).map_err(|_| CacheError::Closed)
  }

  async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, CacheError> {
    let (tx, rx) = oneshot::channel();
    self.send(make(tx))?;
    rx.await.map_err(|_| CacheError::Closed)
  }

  /// Return the entry for `key`, fetching it through `source` first when it
  /// has never loaded, has failed, is stale, or `force` is set. Callers that
  /// arrive while a fetch is in flight share it.
  pub async fn query(
    &self,
    key: QueryKey,
    source: QuerySource,
    force: bool,
  ) -> Result<EntrySnapshot, CacheError> {
    self
      .call(|reply| Command::Query {
        key,
        source,
        force,
        reply,
      })
      .await
  }

  /// Force a fetch of an existing entry. `None` if the key is unknown.
  pub async fn retry(&self, key: &QueryKey) -> Result<Option<EntrySnapshot>, CacheError> {
    let key = key.clone();
    self.call(|reply| Command::Retry { key, reply }).await
  }

  /// Register interest in `key`. The entry is kept (and refetched on
  /// invalidation) until the returned guard is dropped.
  pub async fn subscribe(
    &self,
    key: QueryKey,
    source: QuerySource,
  ) -> Result<Subscription, CacheError> {
    let subscribed = key.clone();
    let rx = self
      .call(|reply| Command::Subscribe { key, source, reply })
      .await?;
    Ok(Subscription {
      key: subscribed,
      store: self.clone(),
      rx,
    })
  }

  pub async fn get(&self, key: &QueryKey) -> Result<Option<EntrySnapshot>, CacheError> {
    let key = key.clone();
    self.call(|reply| Command::Get { key, reply }).await
  }

  /// Rewrite an entry's data in place (a confirmed change, not an optimistic
  /// one). Returns false when the entry has no data.
  pub async fn patch(&self, key: &QueryKey, apply: Updater) -> Result<bool, CacheError> {
    let key = key.clone();
    self.call(|reply| Command::Patch { key, apply, reply }).await
  }

  /// Remove an entry nobody subscribes to.
  pub async fn evict(&self, key: &QueryKey) -> Result<(), CacheError> {
    let key = key.clone();
    self.call(|reply| Command::Evict { key, reply }).await?
  }

  /// Refetch subscribed entries providing any of `tags`; mark the rest stale.
  pub async fn invalidate(&self, tags: Vec<Tag>) -> Result<InvalidationReport, CacheError> {
    self
      .call(|reply| Command::Invalidate {
        tags,
        reply: Some(reply),
      })
      .await
  }

  pub(crate) async fn apply_optimistic(
    &self,
    mutation: MutationId,
    updates: Vec<CacheUpdate>,
  ) -> Result<Vec<QueryKey>, CacheError> {
    self
      .call(|reply| Command::ApplyOptimistic {
        mutation,
        updates,
        reply,
      })
      .await
  }

  pub(crate) async fn settle(
    &self,
    mutation: MutationId,
    settlement: Settlement,
  ) -> Result<(), CacheError> {
    self
      .call(|reply| Command::Settle {
        mutation,
        settlement,
        reply,
      })
      .await
  }
}

/// Live view of one entry. Dropping it unsubscribes.
pub struct Subscription {
  key: QueryKey,
  store: CacheStore,
  rx: watch::Receiver<EntrySnapshot>,
}

impl Subscription {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn snapshot(&self) -> EntrySnapshot {
    self.rx.borrow().clone()
  }

  /// Wait for the next change to the entry.
  pub async fn changed(&mut self) -> Result<EntrySnapshot, CacheError> {
    self.rx.changed().await.map_err(|_| CacheError::Closed)?;
    Ok(self.rx.borrow_and_update().clone())
  }

  /// Non-blocking check for a change since the last `poll`/`changed`, for
  /// callers driving their own tick loop.
  pub fn poll(&mut self) -> Option<EntrySnapshot> {
    match self.rx.has_changed() {
      Ok(true) => Some(self.rx.borrow_and_update().clone()),
      _ => None,
    }
  }

  /// Wait until the entry is no longer loading.
  pub async fn settled(&mut self) -> Result<EntrySnapshot, CacheError> {
    let snapshot = self
      .rx
      .wait_for(|s| s.status != QueryStatus::Loading && s.status != QueryStatus::Idle)
      .await
      .map_err(|_| CacheError::Closed)?;
    Ok(snapshot.clone())
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    // Store already gone if this fails; nothing left to release.
    let _ = self.store.send(Command::Unsubscribe {
      key: self.key.clone(),
    });
  }
}

pub(crate) struct StoreState {
  pub(super) entries: HashMap<QueryKey, QueryEntry>,
  pub(super) index: TagIndex,
  config: StoreConfig,
  commands: mpsc::WeakUnboundedSender<Command>,
  next_fetch: u64,
}

impl StoreState {
  fn new(config: StoreConfig, commands: mpsc::WeakUnboundedSender<Command>) -> Self {
    Self {
      entries: HashMap::new(),
      index: TagIndex::default(),
      config,
      commands,
      next_fetch: 0,
    }
  }

  fn handle(&mut self, command: Command) {
    match command {
      Command::Query {
        key,
        source,
        force,
        reply,
      } => self.on_query(key, source, force, reply),
      Command::Retry { key, reply } => self.on_retry(key, reply),
      Command::Subscribe { key, source, reply } => self.on_subscribe(key, source, reply),
      Command::Unsubscribe { key } => self.on_unsubscribe(key),
      Command::Get { key, reply } => {
        let _ = reply.send(self.entries.get(&key).map(QueryEntry::snapshot));
      }
      Command::Patch { key, apply, reply } => {
        let _ = reply.send(self.on_patch(&key, apply));
      }
      Command::Evict { key, reply } => {
        let _ = reply.send(self.on_evict(&key));
      }
      Command::EvictExpired { key, epoch } => self.on_evict_expired(key, epoch),
      Command::Invalidate { tags, reply } => {
        let report = self.invalidate(&tags);
        if let Some(reply) = reply {
          let _ = reply.send(report);
        }
      }
      Command::ApplyOptimistic {
        mutation,
        updates,
        reply,
      } => {
        let _ = reply.send(self.on_apply_optimistic(mutation, updates));
      }
      Command::Settle {
        mutation,
        settlement,
        reply,
      } => {
        self.on_settle(mutation, settlement);
        let _ = reply.send(());
      }
      Command::FetchSettled {
        key,
        fetch_id,
        result,
      } => self.on_fetch_settled(key, fetch_id, result),
    }
  }

  fn on_query(
    &mut self,
    key: QueryKey,
    source: QuerySource,
    force: bool,
    reply: oneshot::Sender<EntrySnapshot>,
  ) {
    let stale_time = self.config.stale_time;
    let entry = self
      .entries
      .entry(key.clone())
      .or_insert_with(|| QueryEntry::new(key.clone(), source));

    if entry.status == QueryStatus::Loading {
      entry.waiters.push(reply);
      return;
    }
    if !force && !entry.needs_fetch(stale_time) {
      let _ = reply.send(entry.snapshot());
      return;
    }
    entry.waiters.push(reply);
    self.start_fetch(&key);
  }

  fn on_retry(&mut self, key: QueryKey, reply: oneshot::Sender<Option<EntrySnapshot>>) {
    let Some(entry) = self.entries.get_mut(&key) else {
      let _ = reply.send(None);
      return;
    };
    let (tx, rx) = oneshot::channel();
    entry.waiters.push(tx);
    if entry.status != QueryStatus::Loading {
      self.start_fetch(&key);
    }
    tokio::spawn(async move {
      let _ = reply.send(rx.await.ok());
    });
  }

  fn on_subscribe(
    &mut self,
    key: QueryKey,
    source: QuerySource,
    reply: oneshot::Sender<watch::Receiver<EntrySnapshot>>,
  ) {
    let stale_time = self.config.stale_time;
    let entry = self
      .entries
      .entry(key.clone())
      .or_insert_with(|| QueryEntry::new(key.clone(), source));

    entry.subscriber_count += 1;
    // Cancels any pending eviction timer.
    entry.evict_epoch += 1;
    entry.evict_when_settled = false;
    entry.publish();
    debug!(key = %key, subscribers = entry.subscriber_count, "subscribed");

    let fetch = entry.needs_fetch(stale_time);
    let _ = reply.send(entry.watch.subscribe());
    if fetch {
      self.start_fetch(&key);
    }
  }

  fn on_unsubscribe(&mut self, key: QueryKey) {
    let Some(entry) = self.entries.get_mut(&key) else {
      return;
    };
    entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
    entry.publish();
    debug!(key = %key, subscribers = entry.subscriber_count, "unsubscribed");
    if entry.subscriber_count > 0 {
      return;
    }

    self.schedule_eviction(key);
  }

  /// Arm the grace-period timer for an entry nobody subscribes to. A later
  /// subscribe or re-arm bumps the epoch and voids this timer.
  fn schedule_eviction(&mut self, key: QueryKey) {
    let Some(entry) = self.entries.get_mut(&key) else {
      return;
    };
    entry.evict_epoch += 1;
    let epoch = entry.evict_epoch;
    let delay = self.config.keep_unused_for;
    let commands = self.commands.clone();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      if let Some(commands) = commands.upgrade() {
        let _ = commands.send(Command::EvictExpired { key, epoch });
      }
    });
  }

  fn on_evict_expired(&mut self, key: QueryKey, epoch: u64) {
    let Some(entry) = self.entries.get_mut(&key) else {
      return;
    };
    if entry.subscriber_count > 0 || entry.evict_epoch != epoch {
      return;
    }
    if entry.in_flight.is_some() {
      // The call is left to finish for anyone who subscribes in the meantime.
      entry.evict_when_settled = true;
      return;
    }
    self.remove(&key);
  }

  fn on_evict(&mut self, key: &QueryKey) -> Result<(), CacheError> {
    let Some(entry) = self.entries.get_mut(key) else {
      return Ok(());
    };
    if entry.subscriber_count > 0 {
      return Err(CacheError::InUse {
        key: key.clone(),
        subscribers: entry.subscriber_count,
      });
    }
    let snapshot = entry.snapshot();
    for waiter in entry.waiters.drain(..) {
      let _ = waiter.send(snapshot.clone());
    }
    self.remove(key);
    Ok(())
  }

  fn remove(&mut self, key: &QueryKey) {
    if let Some(entry) = self.entries.remove(key) {
      self.index.remove(key, &entry.provided_tags);
      debug!(key = %key, digest = %key.digest(), "evicted");
    }
  }

  fn on_patch(&mut self, key: &QueryKey, apply: Updater) -> bool {
    let Some(entry) = self.entries.get_mut(key) else {
      return false;
    };
    if !optimistic::confirm(entry, &[apply]) {
      return false;
    }
    self.data_changed(key);
    true
  }

  fn on_apply_optimistic(&mut self, mutation: MutationId, updates: Vec<CacheUpdate>) -> Vec<QueryKey> {
    let mut touched = Vec::new();
    for update in updates {
      let Some(entry) = self.entries.get_mut(&update.key) else {
        // Never fetched: nothing to show early.
        continue;
      };
      if optimistic::apply(entry, mutation, update.apply) {
        debug!(key = %update.key, %mutation, "applied optimistic patch");
        self.data_changed(&update.key);
        if !touched.contains(&update.key) {
          touched.push(update.key);
        }
      }
    }
    touched
  }

  fn on_settle(&mut self, mutation: MutationId, settlement: Settlement) {
    match settlement {
      Settlement::Rollback { touched } => {
        for key in touched.iter().rev() {
          let Some(entry) = self.entries.get_mut(key) else {
            continue;
          };
          if optimistic::rollback(entry, mutation) {
            self.data_changed(key);
          }
        }
      }
      Settlement::Commit { touched, updates } => {
        let mut by_key: BTreeMap<QueryKey, Vec<Updater>> = BTreeMap::new();
        for update in updates {
          by_key.entry(update.key).or_default().push(update.apply);
        }
        let mut keys = touched;
        for key in by_key.keys() {
          if !keys.contains(key) {
            keys.push(key.clone());
          }
        }

        for key in keys {
          let Some(entry) = self.entries.get_mut(&key) else {
            continue;
          };
          let updates = by_key.remove(&key).unwrap_or_default();
          let optimistic_value = entry.data.clone();
          if !optimistic::commit(entry, mutation, &updates) {
            continue;
          }
          if !updates.is_empty() && entry.data != optimistic_value {
            let conflict = ApiError::Conflict {
              key: key.to_string(),
            };
            debug!(%mutation, "{}; keeping server data", conflict);
          }
          self.data_changed(&key);
        }
      }
    }
  }

  fn on_fetch_settled(&mut self, key: QueryKey, fetch_id: u64, result: Result<Value, ApiError>) {
    let Some(entry) = self.entries.get_mut(&key) else {
      return;
    };
    if entry.in_flight != Some(fetch_id) {
      return;
    }
    entry.in_flight = None;

    match result {
      Ok(data) => {
        optimistic::rebase(entry, data);
        entry.status = QueryStatus::Success;
        entry.error = None;
        entry.last_fetched_at = Some(Utc::now());
        entry.fetched_at = Some(Instant::now());
        debug!(key = %key, fetch_id, "fetch succeeded");
      }
      Err(e) => {
        // Previous data and tags stay in place.
        warn!(key = %key, fetch_id, error = %e, "fetch failed");
        entry.status = QueryStatus::Error;
        entry.error = Some(e);
      }
    }
    self.data_changed(&key);

    let Some(entry) = self.entries.get_mut(&key) else {
      return;
    };
    let snapshot = entry.snapshot();
    for waiter in entry.waiters.drain(..) {
      let _ = waiter.send(snapshot.clone());
    }

    if entry.subscriber_count > 0 {
      if std::mem::take(&mut entry.refetch_when_settled) {
        debug!(key = %key, "refetching after invalidation during fetch");
        self.start_fetch(&key);
      }
      return;
    }
    if std::mem::take(&mut entry.refetch_when_settled) {
      entry.stale = true;
    }
    if entry.evict_when_settled {
      self.remove(&key);
    } else {
      self.schedule_eviction(key);
    }
  }

  /// Re-derive tags, keep the index in step and notify subscribers.
  fn data_changed(&mut self, key: &QueryKey) {
    let Some(entry) = self.entries.get_mut(key) else {
      return;
    };
    let old = entry.retag();
    self.index.update(key, &old, &entry.provided_tags);
    entry.publish();
  }

  pub(super) fn start_fetch(&mut self, key: &QueryKey) {
    let Some(entry) = self.entries.get_mut(key) else {
      return;
    };
    let Some(commands) = self.commands.upgrade() else {
      return;
    };
    self.next_fetch += 1;
    let fetch_id = self.next_fetch;

    entry.status = QueryStatus::Loading;
    entry.in_flight = Some(fetch_id);
    entry.stale = false;
    entry.refetch_when_settled = false;
    entry.publish();
    debug!(key = %key, fetch_id, "fetching");

    let fetch = (entry.source.fetcher)();
    let key = key.clone();
    tokio::spawn(async move {
      let result = fetch.await;
      let _ = commands.send(Command::FetchSettled {
        key,
        fetch_id,
        result,
      });
    });
  }
}
