//! Topic names and the tags each push event invalidates.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use crate::cache::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
  Comments,
  CommentUpdate,
  TaskCreated,
  TaskDeleted,
  TaskUpdated,
  TaskStatusUpdated,
  TaskNewState,
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
  #[error("payload is not JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("payload has no usable `{0}`")]
  MissingField(&'static str),
}

impl Topic {
  pub const ALL: [Topic; 7] = [
    Topic::Comments,
    Topic::CommentUpdate,
    Topic::TaskCreated,
    Topic::TaskDeleted,
    Topic::TaskUpdated,
    Topic::TaskStatusUpdated,
    Topic::TaskNewState,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Self::Comments => "comments",
      Self::CommentUpdate => "comment-update",
      Self::TaskCreated => "task-created",
      Self::TaskDeleted => "task-deleted",
      Self::TaskUpdated => "task-updated",
      Self::TaskStatusUpdated => "task-status-updated",
      Self::TaskNewState => "task-new-state",
    }
  }

  pub fn destination(&self) -> String {
    format!("/topic/{}", self.name())
  }

  /// Accepts a bare name or a `/topic/` destination.
  pub fn parse(s: &str) -> Option<Self> {
    let name = s.strip_prefix("/topic/").unwrap_or(s);
    Self::ALL.into_iter().find(|t| t.name() == name)
  }

  /// Tags to invalidate for a message on this topic.
  pub fn tags_for(&self, body: &str) -> Result<Vec<Tag>, PayloadError> {
    let message: Value = serde_json::from_str(body)?;
    let payload = unwrap_envelope(&message);

    let tags = match self {
      Self::Comments | Self::CommentUpdate => {
        let task_id = field_id(payload, "taskId").ok_or(PayloadError::MissingField("taskId"))?;
        let mut tags = vec![Tag::comments(task_id)];
        if let Some(recipient) = payload.get("recipientEmail").and_then(Value::as_str) {
          tags.push(Tag::unread_count(task_id, recipient));
        }
        tags
      }
      Self::TaskCreated | Self::TaskDeleted => vec![Tag::task_list()],
      Self::TaskUpdated => {
        let id = entity_id(payload).ok_or(PayloadError::MissingField("id"))?;
        vec![Tag::task(id), Tag::task_list()]
      }
      Self::TaskStatusUpdated | Self::TaskNewState => {
        let id = entity_id(payload).ok_or(PayloadError::MissingField("id"))?;
        vec![Tag::task(id)]
      }
    };
    Ok(tags)
  }
}

impl fmt::Display for Topic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Server notifications wrap the entity as `{eventType, payload, timestamp}`;
/// some topics send the entity bare.
fn unwrap_envelope(message: &Value) -> &Value {
  match message.get("eventType").and(message.get("payload")) {
    Some(payload) => payload,
    None => message,
  }
}

/// `id` of an entity payload, or the payload itself when it is a bare id.
fn entity_id(payload: &Value) -> Option<i64> {
  field_id(payload, "id").or_else(|| as_id(payload))
}

fn field_id(payload: &Value, field: &str) -> Option<i64> {
  payload.get(field).and_then(as_id)
}

fn as_id(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n.as_i64(),
    Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_task_updated_maps_to_task_and_list() {
    let body = r#"{"eventType":"TASK_UPDATED","payload":{"id":7,"title":"x"},"timestamp":"2024-01-01T00:00:00"}"#;
    let tags = Topic::TaskUpdated.tags_for(body).unwrap();
    assert_eq!(tags, vec![Tag::task(7), Tag::task_list()]);
  }

  #[test]
  fn test_bare_payloads() {
    assert_eq!(Topic::TaskUpdated.tags_for(r#"{"id":7}"#).unwrap()[0], Tag::task(7));
    assert_eq!(
      Topic::TaskDeleted.tags_for(r#"{"eventType":"TASK_DELETED","payload":12}"#).unwrap(),
      vec![Tag::task_list()]
    );
    assert_eq!(
      Topic::TaskStatusUpdated.tags_for(r#"{"id":"15"}"#).unwrap(),
      vec![Tag::task(15)]
    );
  }

  #[test]
  fn test_comment_event_includes_unread_count() {
    let body = r#"{"id":1,"taskId":9,"content":"hi","recipientEmail":"ben@example.com"}"#;
    let tags = Topic::Comments.tags_for(body).unwrap();
    assert_eq!(
      tags,
      vec![Tag::comments(9), Tag::unread_count(9, "ben@example.com")]
    );
  }

  #[test]
  fn test_malformed_payloads_are_errors() {
    assert!(matches!(
      Topic::TaskUpdated.tags_for("not json"),
      Err(PayloadError::Json(_))
    ));
    assert!(matches!(
      Topic::Comments.tags_for(r#"{"content":"no task"}"#),
      Err(PayloadError::MissingField("taskId"))
    ));
    assert!(matches!(
      Topic::TaskStatusUpdated.tags_for(r#"{"eventType":"X","payload":{"title":"t"}}"#),
      Err(PayloadError::MissingField("id"))
    ));
  }

  #[test]
  fn test_parse_accepts_names_and_destinations() {
    assert_eq!(Topic::parse("task-updated"), Some(Topic::TaskUpdated));
    assert_eq!(Topic::parse("/topic/comments"), Some(Topic::Comments));
    assert_eq!(Topic::parse("/topic/unknown"), None);
    for topic in Topic::ALL {
      assert_eq!(Topic::parse(&topic.destination()), Some(topic));
    }
  }
}
