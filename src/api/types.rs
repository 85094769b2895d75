//! Wire types of the task-management REST API.
//!
//! Field names follow the server's camelCase JSON. Entities created
//! optimistically carry `pending`, the id of the mutation that made them;
//! server data never has it.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::MutationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
  Pending,
  Ongoing,
  Completed,
  Cancelled,
  Overdue,
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Pending => "Pending",
      Self::Ongoing => "Ongoing",
      Self::Completed => "Completed",
      Self::Cancelled => "Cancelled",
      Self::Overdue => "Overdue",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: i64,
  #[serde(default)]
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub due_date: Option<DateTime<Utc>>,
  /// HIGH, MEDIUM or LOW
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub task_status: Option<TaskStatus>,
  #[serde(default, alias = "new")]
  pub is_new: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_by_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub assignee_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_assigned_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_id: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pending: Option<MutationId>,
}

impl Task {
  pub fn is_pending(&self) -> bool {
    self.pending.is_some()
  }
}

/// Body of task create/update requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub task_status: Option<TaskStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assignee_id: Option<String>,
}

/// Response of the `is-new` routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNewState {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<i64>,
  #[serde(default, alias = "new")]
  pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
  pub id: i64,
  pub content: String,
  pub author_email: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub recipient_email: Option<String>,
  pub task_id: i64,
  #[serde(default, alias = "readByRecipient")]
  pub is_read_by_recipient: bool,
  /// Server local time, no offset
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<NaiveDateTime>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pending: Option<MutationId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectRole {
  ProjectAdmin,
  ProjectEmployee,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
  pub id: i64,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub owner_email: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub owner_name: Option<String>,
  #[serde(default)]
  pub member_count: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub current_user_role: Option<ProjectRole>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMember {
  pub email: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub project_role: ProjectRole,
  #[serde(default)]
  pub active_task_count: u64,
}

/// An account as the user routes return it. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub email: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  /// USER or ADMIN
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_role: Option<String>,
}

impl User {
  pub fn is_admin(&self) -> bool {
    self.user_role.as_deref() == Some("ADMIN")
  }
}
