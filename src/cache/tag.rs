//! Tag registry: the naming scheme that links cached reads to writes.
//!
//! Query endpoints declare the tags their data *provides*, mutation
//! endpoints declare the tags they *invalidate*. Neither side knows about
//! the other beyond these values.

use std::cmp::Ordering;
use std::fmt;

/// Every kind of entity the cache can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
  Task,
  Comment,
  UnreadCount,
  Project,
  ProjectMember,
  User,
}

impl EntityKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Task => "Task",
      Self::Comment => "Comment",
      Self::UnreadCount => "UnreadCount",
      Self::Project => "Project",
      Self::ProjectMember => "ProjectMember",
      Self::User => "User",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Which instance(s) of a kind a tag refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagId {
  /// One entity
  Id(String),
  /// Membership of the collection itself
  List,
  /// Every tag of the kind. Only meaningful when invalidating.
  All,
}

impl TagId {
  pub fn as_str(&self) -> &str {
    match self {
      Self::Id(id) => id,
      Self::List => "LIST",
      Self::All => "*",
    }
  }

  /// `"LIST"` and `"*"` name the sentinels, anything else an entity.
  pub fn parse(id: &str) -> Self {
    match id {
      "LIST" => Self::List,
      "*" => Self::All,
      other => Self::Id(other.to_string()),
    }
  }

  fn rank(&self) -> u8 {
    match self {
      Self::Id(_) => 0,
      Self::List => 1,
      Self::All => 2,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
  pub kind: EntityKind,
  pub id: TagId,
}

impl Tag {
  /// Tag for a single entity, e.g. `Task:42`. The ids `LIST` and `*` map to
  /// the list and kind-wide sentinels.
  pub fn entity(kind: EntityKind, id: impl ToString) -> Self {
    Self {
      kind,
      id: TagId::parse(&id.to_string()),
    }
  }

  /// Sentinel for "the set of `kind` may have changed", e.g. `Task:LIST`.
  pub fn list(kind: EntityKind) -> Self {
    Self {
      kind,
      id: TagId::List,
    }
  }

  /// Matches every tag of `kind` when invalidated.
  pub fn all(kind: EntityKind) -> Self {
    Self {
      kind,
      id: TagId::All,
    }
  }

  pub fn task(id: i64) -> Self {
    Self::entity(EntityKind::Task, id)
  }

  pub fn task_list() -> Self {
    Self::list(EntityKind::Task)
  }

  /// Comments are tagged by the task they belong to.
  pub fn comments(task_id: i64) -> Self {
    Self::entity(EntityKind::Comment, task_id)
  }

  pub fn unread_count(task_id: i64, recipient: &str) -> Self {
    Self::entity(EntityKind::UnreadCount, format!("{}-{}", task_id, recipient))
  }

  pub fn project(id: i64) -> Self {
    Self::entity(EntityKind::Project, id)
  }

  pub fn project_list() -> Self {
    Self::list(EntityKind::Project)
  }

  pub fn project_members(project_id: i64) -> Self {
    Self::entity(EntityKind::ProjectMember, project_id)
  }

  /// Users are keyed by email.
  pub fn user(email: &str) -> Self {
    Self::entity(EntityKind::User, email)
  }

  pub fn user_list() -> Self {
    Self::list(EntityKind::User)
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind, self.id.as_str())
  }
}

// Ordered by string form so sets of tags print predictably; the variant
// breaks ties so `Ord` agrees with `Eq`.
impl Ord for Tag {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .kind
      .as_str()
      .cmp(other.kind.as_str())
      .then_with(|| self.id.as_str().cmp(other.id.as_str()))
      .then_with(|| self.id.rank().cmp(&other.id.rank()))
  }
}

impl PartialOrd for Tag {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}
