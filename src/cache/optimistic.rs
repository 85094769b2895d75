//! Optimistic patch ledger for a single entry.
//!
//! Each entry keeps its outstanding patches in application order, each with
//! the data as it was immediately before that patch. Removing a patch
//! (rollback or commit) restores its snapshot and replays the patches that
//! came after it, so a later patch is never clobbered by an earlier one
//! failing.

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use super::endpoint::{MutationId, Updater};
use super::entry::{OptimisticPatch, QueryEntry};

/// Apply `apply` to a deep copy of `value`. The original is left untouched on error.
pub(crate) fn apply_to_copy(key: &impl std::fmt::Display, value: &Value, apply: &Updater) -> Value {
  let mut next = value.clone();
  match apply(&mut next) {
    Ok(()) => next,
    Err(e) => {
      warn!(key = %key, error = %e, "cache update did not fit the cached data; skipped");
      value.clone()
    }
  }
}

/// Record and apply an optimistic patch. Returns false when there is no data
/// to patch yet.
pub(crate) fn apply(entry: &mut QueryEntry, mutation: MutationId, apply: Updater) -> bool {
  let Some(current) = entry.data.as_ref() else {
    return false;
  };
  let next = apply_to_copy(&entry.key, current, &apply);
  let previous_snapshot = std::mem::replace(&mut entry.data, Some(next)).unwrap_or(Value::Null);
  entry.patches.push(OptimisticPatch {
    mutation,
    previous_snapshot,
    apply,
    applied_at: Utc::now(),
  });
  true
}

/// Undo every patch `mutation` made to this entry, newest first.
pub(crate) fn rollback(entry: &mut QueryEntry, mutation: MutationId) -> bool {
  let mut changed = false;
  while let Some(index) = entry.patches.iter().rposition(|p| p.mutation == mutation) {
    let patch = entry.patches.remove(index);
    tracing::debug!(
      key = %entry.key,
      %mutation,
      held_for_ms = (Utc::now() - patch.applied_at).num_milliseconds(),
      "rolling back optimistic patch"
    );
    replay_from(entry, index, patch.previous_snapshot);
    changed = true;
  }
  changed
}

/// Confirm `mutation`: drop its patches and fold the authoritative `updates`
/// into the entry, including every snapshot still held by other outstanding
/// patches so a later rollback cannot lose them. With no `updates` the
/// optimistic change itself is kept until the next refetch replaces it.
pub(crate) fn commit(entry: &mut QueryEntry, mutation: MutationId, updates: &[Updater]) -> bool {
  let mut own = Vec::new();
  while let Some(index) = entry.patches.iter().position(|p| p.mutation == mutation) {
    let patch = entry.patches.remove(index);
    replay_from(entry, index, patch.previous_snapshot);
    own.push(patch.apply);
  }
  if !updates.is_empty() {
    return confirm(entry, updates);
  }
  if own.is_empty() {
    return false;
  }
  confirm(entry, &own)
}

/// Apply confirmed (non-optimistic) updates underneath any outstanding patches.
pub(crate) fn confirm(entry: &mut QueryEntry, updates: &[Updater]) -> bool {
  if entry.data.is_none() {
    return false;
  }
  if entry.patches.is_empty() {
    let Some(current) = entry.data.as_ref() else {
      return false;
    };
    let mut next = current.clone();
    for update in updates {
      next = apply_to_copy(&entry.key, &next, update);
    }
    entry.data = Some(next);
    return true;
  }

  let mut base = entry.patches[0].previous_snapshot.clone();
  for update in updates {
    base = apply_to_copy(&entry.key, &base, update);
  }
  replay_from(entry, 0, base);
  true
}

/// Server data arrived: it becomes the base under the outstanding patches.
pub(crate) fn rebase(entry: &mut QueryEntry, server: Value) {
  replay_from(entry, 0, server);
}

/// Set the data to `base` and re-apply patches `from..` on top of it,
/// refreshing their snapshots along the way.
fn replay_from(entry: &mut QueryEntry, from: usize, base: Value) {
  let mut data = base;
  for patch in entry.patches.iter_mut().skip(from) {
    let next = apply_to_copy(&entry.key, &data, &patch.apply);
    patch.previous_snapshot = std::mem::replace(&mut data, next);
  }
  entry.data = Some(data);
}
