//! Reverse index from tags to the keys that provide them.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::key::QueryKey;
use super::tag::{EntityKind, Tag, TagId};

/// kind -> id -> keys. Kept in step with every entry's `provided_tags`, so
/// invalidation costs O(matches) instead of a scan over all entries.
#[derive(Debug, Default)]
pub(crate) struct TagIndex {
  by_kind: HashMap<EntityKind, HashMap<TagId, HashSet<QueryKey>>>,
}

impl TagIndex {
  /// Move `key` from the `old` tag set to the `new` one.
  pub fn update(&mut self, key: &QueryKey, old: &BTreeSet<Tag>, new: &BTreeSet<Tag>) {
    for tag in old.difference(new) {
      self.remove_one(key, tag);
    }
    for tag in new.difference(old) {
      self
        .by_kind
        .entry(tag.kind)
        .or_default()
        .entry(tag.id.clone())
        .or_default()
        .insert(key.clone());
    }
  }

  pub fn remove(&mut self, key: &QueryKey, tags: &BTreeSet<Tag>) {
    for tag in tags {
      self.remove_one(key, tag);
    }
  }

  fn remove_one(&mut self, key: &QueryKey, tag: &Tag) {
    let Some(ids) = self.by_kind.get_mut(&tag.kind) else {
      return;
    };
    if let Some(keys) = ids.get_mut(&tag.id) {
      keys.remove(key);
      if keys.is_empty() {
        ids.remove(&tag.id);
      }
    }
    if ids.is_empty() {
      self.by_kind.remove(&tag.kind);
    }
  }

  /// Every key providing at least one of `tags`. `Kind:*` matches the whole kind.
  pub fn matching<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> BTreeSet<QueryKey> {
    let mut keys = BTreeSet::new();
    for tag in tags {
      let Some(ids) = self.by_kind.get(&tag.kind) else {
        continue;
      };
      match &tag.id {
        TagId::All => {
          for set in ids.values() {
            keys.extend(set.iter().cloned());
          }
        }
        id => {
          if let Some(set) = ids.get(id) {
            keys.extend(set.iter().cloned());
          }
        }
      }
    }
    keys
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool {
    self.by_kind.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tags(list: &[Tag]) -> BTreeSet<Tag> {
    list.iter().cloned().collect()
  }

  #[test]
  fn test_update_tracks_added_and_removed_tags() {
    let mut index = TagIndex::default();
    let list = QueryKey::new("getTasks", &1);

    index.update(&list, &BTreeSet::new(), &tags(&[Tag::task(1), Tag::task_list()]));
    assert!(index.matching(&[Tag::task(1)]).contains(&list));

    index.update(
      &list,
      &tags(&[Tag::task(1), Tag::task_list()]),
      &tags(&[Tag::task(2), Tag::task_list()]),
    );
    assert!(index.matching(&[Tag::task(1)]).is_empty());
    assert!(index.matching(&[Tag::task(2)]).contains(&list));
    assert!(index.matching(&[Tag::task_list()]).contains(&list));
  }

  #[test]
  fn test_kind_wide_tag_matches_every_id() {
    let mut index = TagIndex::default();
    let a = QueryKey::new("getCommentsByTask", &1);
    let b = QueryKey::new("getCommentsByTask", &2);
    let task = QueryKey::new("getTaskById", &1);
    index.update(&a, &BTreeSet::new(), &tags(&[Tag::comments(1)]));
    index.update(&b, &BTreeSet::new(), &tags(&[Tag::comments(2)]));
    index.update(&task, &BTreeSet::new(), &tags(&[Tag::task(1)]));

    let matched = index.matching(&[Tag::all(EntityKind::Comment)]);
    assert_eq!(matched, [a, b].into_iter().collect());
  }

  #[test]
  fn test_remove_leaves_no_residue() {
    let mut index = TagIndex::default();
    let key = QueryKey::new("getTaskById", &5);
    let provided = tags(&[Tag::task(5)]);
    index.update(&key, &BTreeSet::new(), &provided);
    index.remove(&key, &provided);
    assert!(index.is_empty());
  }
}
