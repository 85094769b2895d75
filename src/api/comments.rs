//! Comment endpoints.

use serde::de::IgnoredAny;
use serde::Serialize;

use super::types::Comment;
use crate::cache::{
  CacheUpdate, EntityKind, MutationContext, MutationEndpoint, QueryEndpoint, Request, Tag,
};

/// Comments under one task.
pub struct GetCommentsByTask;

impl QueryEndpoint for GetCommentsByTask {
  const NAME: &'static str = "getCommentsByTask";
  type Args = i64;
  type Output = Vec<Comment>;

  fn request(task_id: &i64) -> Request {
    Request::get(format!("/api/comments/task/{}", task_id))
  }

  fn provides(task_id: &i64, _: &Vec<Comment>) -> Vec<Tag> {
    vec![Tag::comments(*task_id)]
  }
}

/// Comments addressed to one user, across tasks.
pub struct GetCommentsByRecipient;

impl QueryEndpoint for GetCommentsByRecipient {
  const NAME: &'static str = "getCommentsByRecipient";
  type Args = String;
  type Output = Vec<Comment>;

  fn request(email: &String) -> Request {
    Request::get(format!("/api/comments/recipient/{}", email))
  }

  fn provides(_: &String, comments: &Vec<Comment>) -> Vec<Tag> {
    let mut tags: Vec<Tag> = comments.iter().map(|c| Tag::comments(c.task_id)).collect();
    tags.push(Tag::list(EntityKind::Comment));
    tags
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadArgs {
  pub task_id: i64,
  pub recipient_email: String,
}

pub struct CountUnreadComments;

impl QueryEndpoint for CountUnreadComments {
  const NAME: &'static str = "countUnreadComments";
  type Args = UnreadArgs;
  type Output = u64;

  fn request(args: &UnreadArgs) -> Request {
    Request::get(format!(
      "/api/comments/count-unread-by-recipient/{}/{}",
      args.task_id, args.recipient_email
    ))
  }

  fn provides(args: &UnreadArgs, _: &u64) -> Vec<Tag> {
    vec![Tag::unread_count(args.task_id, &args.recipient_email)]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
  pub task_id: i64,
  pub author_email: String,
  pub content: String,
  pub recipient_email: Option<String>,
}

/// Shows the comment at once; on success the server's comment replaces the
/// placeholder this call created, found by its correlation id.
pub struct AddComment;

impl MutationEndpoint for AddComment {
  const NAME: &'static str = "addComment";
  type Args = NewComment;
  type Response = Comment;

  fn request(args: &NewComment) -> Request {
    Request::post(
      format!("/api/comments/task/{}", args.task_id),
      serde_json::json!({
        "authorEmail": args.author_email,
        "content": args.content,
        "recipientEmail": args.recipient_email,
      }),
    )
  }

  fn invalidates(args: &NewComment) -> Vec<Tag> {
    vec![Tag::comments(args.task_id)]
  }

  fn optimistic(args: &NewComment, cx: &MutationContext) -> Vec<CacheUpdate> {
    let placeholder = Comment {
      id: cx.id.placeholder_id(),
      content: args.content.clone(),
      author_email: args.author_email.clone(),
      recipient_email: args.recipient_email.clone(),
      task_id: args.task_id,
      is_read_by_recipient: false,
      created_at: Some(cx.started_at.naive_utc()),
      pending: Some(cx.id),
    };
    vec![CacheUpdate::new::<GetCommentsByTask, _>(&args.task_id, move |comments| {
      comments.push(placeholder.clone())
    })]
  }

  fn commit(args: &NewComment, saved: &Comment, cx: &MutationContext) -> Vec<CacheUpdate> {
    let saved = saved.clone();
    let mutation = cx.id;
    vec![CacheUpdate::new::<GetCommentsByTask, _>(&args.task_id, move |comments| {
      match comments.iter().position(|c| c.pending == Some(mutation)) {
        Some(i) => comments[i] = saved.clone(),
        None if comments.iter().all(|c| c.id != saved.id) => comments.push(saved.clone()),
        None => {}
      }
    })]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkCommentsAsReadArgs {
  pub task_id: i64,
  pub recipient_email: String,
}

/// Marks every comment on a task as read by the recipient.
pub struct MarkCommentsAsRead;

impl MutationEndpoint for MarkCommentsAsRead {
  const NAME: &'static str = "markCommentsAsRead";
  type Args = MarkCommentsAsReadArgs;
  type Response = IgnoredAny;

  fn request(args: &MarkCommentsAsReadArgs) -> Request {
    Request::post(
      format!("/api/comments/mark-as-read-by-recipient/{}", args.task_id),
      serde_json::json!({ "recipientEmail": args.recipient_email }),
    )
  }

  fn invalidates(args: &MarkCommentsAsReadArgs) -> Vec<Tag> {
    vec![
      Tag::comments(args.task_id),
      Tag::unread_count(args.task_id, &args.recipient_email),
    ]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkCommentAsReadArgs {
  pub comment_id: i64,
  pub user_email: String,
}

/// The task is not known from a comment id alone, so every comment list and
/// unread count is invalidated.
pub struct MarkCommentAsRead;

impl MutationEndpoint for MarkCommentAsRead {
  const NAME: &'static str = "markCommentAsRead";
  type Args = MarkCommentAsReadArgs;
  type Response = IgnoredAny;

  fn request(args: &MarkCommentAsReadArgs) -> Request {
    Request::post(
      format!("/api/comments/mark-as-read/{}", args.comment_id),
      serde_json::json!({ "userEmail": args.user_email }),
    )
  }

  fn invalidates(_: &MarkCommentAsReadArgs) -> Vec<Tag> {
    vec![
      Tag::all(EntityKind::Comment),
      Tag::all(EntityKind::UnreadCount),
    ]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCommentArgs {
  pub comment_id: i64,
  pub task_id: i64,
  pub content: String,
}

pub struct UpdateComment;

impl MutationEndpoint for UpdateComment {
  const NAME: &'static str = "updateComment";
  type Args = UpdateCommentArgs;
  type Response = IgnoredAny;

  fn request(args: &UpdateCommentArgs) -> Request {
    Request::put(
      format!("/api/comments/{}", args.comment_id),
      serde_json::json!({ "content": args.content }),
    )
  }

  fn invalidates(args: &UpdateCommentArgs) -> Vec<Tag> {
    vec![Tag::comments(args.task_id)]
  }

  fn optimistic(args: &UpdateCommentArgs, _: &MutationContext) -> Vec<CacheUpdate> {
    let id = args.comment_id;
    let content = args.content.clone();
    vec![CacheUpdate::new::<GetCommentsByTask, _>(&args.task_id, move |comments| {
      if let Some(comment) = comments.iter_mut().find(|c| c.id == id) {
        comment.content = content.clone();
      }
    })]
  }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCommentArgs {
  pub comment_id: i64,
  pub task_id: i64,
}

pub struct DeleteComment;

impl MutationEndpoint for DeleteComment {
  const NAME: &'static str = "deleteComment";
  type Args = DeleteCommentArgs;
  type Response = IgnoredAny;

  fn request(args: &DeleteCommentArgs) -> Request {
    Request::delete(format!("/api/comments/{}", args.comment_id))
  }

  fn invalidates(args: &DeleteCommentArgs) -> Vec<Tag> {
    vec![Tag::comments(args.task_id)]
  }

  fn optimistic(args: &DeleteCommentArgs, _: &MutationContext) -> Vec<CacheUpdate> {
    let id = args.comment_id;
    vec![CacheUpdate::new::<GetCommentsByTask, _>(&args.task_id, move |comments| {
      comments.retain(|c| c.id != id)
    })]
  }
}
