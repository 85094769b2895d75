//! The task-management REST API as seen by the cache: wire types and
//! endpoint declarations.

pub mod comments;
pub mod projects;
pub mod tasks;
pub mod types;
pub mod users;

pub use types::{
  Comment, Project, ProjectMember, ProjectRole, Task, TaskDraft, TaskNewState, TaskStatus, User,
};

use url::form_urlencoded;

/// `name=value`, form-encoded.
pub(crate) fn query_param(name: &str, value: &str) -> String {
  form_urlencoded::Serializer::new(String::new())
    .append_pair(name, value)
    .finish()
}
