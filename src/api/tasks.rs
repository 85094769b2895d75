//! Task endpoints, scoped to a project.

use chrono::Utc;
use serde::de::IgnoredAny;
use serde::Serialize;

use super::types::{Task, TaskDraft, TaskNewState, TaskStatus};
use crate::cache::{CacheUpdate, MutationContext, MutationEndpoint, QueryEndpoint, Request, Tag};

fn tasks_path(project_id: i64) -> String {
  format!("/api/projects/{}/tasks", project_id)
}

fn task_path(task: &TaskRef) -> String {
  format!("{}/{}", tasks_path(task.project_id), task.id)
}

/// One task within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
  pub project_id: i64,
  pub id: i64,
}

/// All tasks of a project visible to the caller.
pub struct GetTasks;

impl QueryEndpoint for GetTasks {
  const NAME: &'static str = "getTasks";
  type Args = i64;
  type Output = Vec<Task>;

  fn request(project_id: &i64) -> Request {
    Request::get(tasks_path(*project_id))
  }

  fn provides(_: &i64, tasks: &Vec<Task>) -> Vec<Tag> {
    let mut tags: Vec<Tag> = tasks.iter().map(|t| Tag::task(t.id)).collect();
    tags.push(Tag::task_list());
    tags
  }
}

pub struct GetTaskById;

impl QueryEndpoint for GetTaskById {
  const NAME: &'static str = "getTaskById";
  type Args = TaskRef;
  type Output = Task;

  fn request(task: &TaskRef) -> Request {
    Request::get(task_path(task))
  }

  fn provides(task: &TaskRef, _: &Task) -> Vec<Tag> {
    vec![Tag::task(task.id)]
  }
}

pub struct GetTaskNewState;

impl QueryEndpoint for GetTaskNewState {
  const NAME: &'static str = "getTaskNewState";
  type Args = TaskRef;
  type Output = TaskNewState;

  fn request(task: &TaskRef) -> Request {
    Request::get(format!("{}/is-new", task_path(task)))
  }

  fn provides(task: &TaskRef, _: &TaskNewState) -> Vec<Tag> {
    vec![Tag::task(task.id)]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskArgs {
  pub project_id: i64,
  pub task: TaskDraft,
}

/// Appends a placeholder to the project's task list while the request is in
/// flight; the server's task takes its place on success.
pub struct CreateTask;

impl MutationEndpoint for CreateTask {
  const NAME: &'static str = "createTask";
  type Args = CreateTaskArgs;
  type Response = Task;

  fn request(args: &CreateTaskArgs) -> Request {
    Request::post(tasks_path(args.project_id), &args.task)
  }

  fn invalidates(_: &CreateTaskArgs) -> Vec<Tag> {
    vec![Tag::task_list()]
  }

  fn optimistic(args: &CreateTaskArgs, cx: &MutationContext) -> Vec<CacheUpdate> {
    let draft = &args.task;
    let placeholder = Task {
      id: cx.id.placeholder_id(),
      title: draft.title.clone(),
      description: draft.description.clone(),
      due_date: draft.due_date,
      priority: draft.priority.clone(),
      task_status: Some(draft.task_status.unwrap_or(TaskStatus::Pending)),
      is_new: true,
      created_by_id: None,
      assignee_id: draft.assignee_id.clone(),
      created_at: Some(cx.started_at),
      last_assigned_at: None,
      project_id: Some(args.project_id),
      pending: Some(cx.id),
    };
    vec![CacheUpdate::new::<GetTasks, _>(&args.project_id, move |tasks| {
      tasks.push(placeholder.clone())
    })]
  }

  fn commit(args: &CreateTaskArgs, created: &Task, cx: &MutationContext) -> Vec<CacheUpdate> {
    let created = created.clone();
    let mutation = cx.id;
    vec![CacheUpdate::new::<GetTasks, _>(&args.project_id, move |tasks| {
      // Matched by correlation id, never by position.
      match tasks.iter().position(|t| t.pending == Some(mutation)) {
        Some(i) => tasks[i] = created.clone(),
        None if tasks.iter().all(|t| t.id != created.id) => tasks.push(created.clone()),
        None => {}
      }
    })]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskArgs {
  pub project_id: i64,
  pub id: i64,
  pub task: TaskDraft,
}

pub struct UpdateTask;

impl MutationEndpoint for UpdateTask {
  const NAME: &'static str = "updateTask";
  type Args = UpdateTaskArgs;
  type Response = Task;

  fn request(args: &UpdateTaskArgs) -> Request {
    let task = TaskRef {
      project_id: args.project_id,
      id: args.id,
    };
    Request::put(task_path(&task), &args.task)
  }

  fn invalidates(args: &UpdateTaskArgs) -> Vec<Tag> {
    vec![Tag::task(args.id), Tag::task_list()]
  }

  fn commit(args: &UpdateTaskArgs, updated: &Task, _: &MutationContext) -> Vec<CacheUpdate> {
    let task = TaskRef {
      project_id: args.project_id,
      id: args.id,
    };
    vec![CacheUpdate::replace::<GetTaskById>(&task, updated.clone())]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskStatusArgs {
  pub project_id: i64,
  pub id: i64,
  pub task_status: TaskStatus,
}

impl UpdateTaskStatusArgs {
  fn task(&self) -> TaskRef {
    TaskRef {
      project_id: self.project_id,
      id: self.id,
    }
  }
}

/// Shows the new status on the task detail immediately.
pub struct UpdateTaskStatus;

impl MutationEndpoint for UpdateTaskStatus {
  const NAME: &'static str = "updateTaskStatus";
  type Args = UpdateTaskStatusArgs;
  type Response = Task;

  fn request(args: &UpdateTaskStatusArgs) -> Request {
    Request::put(
      format!("{}/status", task_path(&args.task())),
      serde_json::json!({ "taskStatus": args.task_status }),
    )
  }

  fn invalidates(args: &UpdateTaskStatusArgs) -> Vec<Tag> {
    vec![Tag::task(args.id)]
  }

  fn optimistic(args: &UpdateTaskStatusArgs, _: &MutationContext) -> Vec<CacheUpdate> {
    let status = args.task_status;
    vec![CacheUpdate::new::<GetTaskById, _>(&args.task(), move |task| {
      task.task_status = Some(status)
    })]
  }

  fn commit(args: &UpdateTaskStatusArgs, updated: &Task, _: &MutationContext) -> Vec<CacheUpdate> {
    vec![CacheUpdate::replace::<GetTaskById>(&args.task(), updated.clone())]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskNewStateArgs {
  pub project_id: i64,
  pub id: i64,
  pub is_new: bool,
}

pub struct UpdateTaskNewState;

impl MutationEndpoint for UpdateTaskNewState {
  const NAME: &'static str = "updateTaskNewState";
  type Args = UpdateTaskNewStateArgs;
  type Response = TaskNewState;

  fn request(args: &UpdateTaskNewStateArgs) -> Request {
    let task = TaskRef {
      project_id: args.project_id,
      id: args.id,
    };
    Request::put(
      format!("{}/is-new", task_path(&task)),
      serde_json::json!({ "isNew": args.is_new }),
    )
  }

  fn invalidates(args: &UpdateTaskNewStateArgs) -> Vec<Tag> {
    vec![Tag::task(args.id)]
  }
}

/// Removes the task from the list while the delete is in flight.
pub struct DeleteTask;

impl MutationEndpoint for DeleteTask {
  const NAME: &'static str = "deleteTask";
  type Args = TaskRef;
  type Response = IgnoredAny;

  fn request(task: &TaskRef) -> Request {
    Request::delete(task_path(task))
  }

  fn invalidates(_: &TaskRef) -> Vec<Tag> {
    vec![Tag::task_list()]
  }

  fn optimistic(task: &TaskRef, _: &MutationContext) -> Vec<CacheUpdate> {
    let id = task.id;
    vec![CacheUpdate::new::<GetTasks, _>(&task.project_id, move |tasks| {
      tasks.retain(|t| t.id != id)
    })]
  }
}

/// Whether a task's due date has passed while it is still open.
pub fn is_overdue(task: &Task) -> bool {
  let open = matches!(
    task.task_status,
    Some(TaskStatus::Pending) | Some(TaskStatus::Ongoing) | None
  );
  open && task.due_date.is_some_and(|due| due < Utc::now())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheClient, MutationId, QueryEndpoint, StoreConfig};
  use crate::error::{ApiError, MutationError};
  use crate::transport::fake::FakeTransport;
  use serde_json::json;
  use std::time::Duration;

  fn client(transport: &std::sync::Arc<FakeTransport>) -> CacheClient {
    CacheClient::new(transport.clone(), StoreConfig::default())
  }

  #[test]
  fn test_list_provides_each_task_and_the_list() {
    let tasks: Vec<Task> =
      serde_json::from_value(json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}])).unwrap();
    let tags = GetTasks::provides(&5, &tasks);
    assert_eq!(tags, vec![Tag::task(1), Tag::task(2), Tag::task_list()]);
  }

  #[test]
  fn test_routes_are_project_scoped() {
    let task = TaskRef {
      project_id: 3,
      id: 42,
    };
    assert_eq!(GetTaskById::request(&task).path, "/api/projects/3/tasks/42");
    assert_eq!(GetTaskNewState::request(&task).path, "/api/projects/3/tasks/42/is-new");
    let status = UpdateTaskStatusArgs {
      project_id: 3,
      id: 42,
      task_status: TaskStatus::Completed,
    };
    let req = UpdateTaskStatus::request(&status);
    assert_eq!(req.path, "/api/projects/3/tasks/42/status");
    assert_eq!(req.body, Some(json!({"taskStatus": "COMPLETED"})));
  }

  #[test]
  fn test_commit_replaces_only_its_own_placeholder() {
    let cx = |id| MutationContext {
      id: MutationId(id),
      started_at: Utc::now(),
    };
    let args = CreateTaskArgs {
      project_id: 1,
      task: TaskDraft::default(),
    };
    let mut list = json!([]);
    for id in [3, 4] {
      (CreateTask::optimistic(&args, &cx(id))[0].apply)(&mut list).unwrap();
    }

    let created: Task = serde_json::from_value(json!({"id": 50, "title": "saved"})).unwrap();
    (CreateTask::commit(&args, &created, &cx(4))[0].apply)(&mut list).unwrap();
    let tasks: Vec<Task> = serde_json::from_value(list.clone()).unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].pending, Some(MutationId(3)));
    assert_eq!(tasks[1].id, 50);
    assert!(!tasks[1].is_pending());

    // Already in the list and no placeholder left for this id: nothing to add.
    (CreateTask::commit(&args, &created, &cx(9))[0].apply)(&mut list).unwrap();
    let tasks: Vec<Task> = serde_json::from_value(list).unwrap();
    assert_eq!(tasks.len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_status_change_restores_task() {
    let transport = FakeTransport::new();
    let task = TaskRef {
      project_id: 1,
      id: 42,
    };
    transport.respond(
      "GET /api/projects/1/tasks/42",
      json!({"id": 42, "title": "t", "taskStatus": "PENDING"}),
    );
    transport.fail_after(
      "PUT /api/projects/1/tasks/42/status",
      Duration::from_millis(100),
      ApiError::Server {
        status: 500,
        message: "boom".into(),
      },
    );
    let client = client(&transport);
    let mut detail = client.use_query::<GetTaskById>(task).await.unwrap();
    let before = detail.settled().await.unwrap().data.unwrap();

    let trigger = client.use_mutation::<UpdateTaskStatus>();
    let pending = tokio::spawn(async move {
      trigger
        .trigger(UpdateTaskStatusArgs {
          project_id: 1,
          id: 42,
          task_status: TaskStatus::Ongoing,
        })
        .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
      detail.state().data.unwrap().task_status,
      Some(TaskStatus::Ongoing)
    );

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, MutationError::Api(ApiError::Server { .. })));
    assert_eq!(detail.state().data.unwrap(), before);
    // Failed writes never invalidate.
    assert_eq!(transport.count("GET /api/projects/1/tasks/42"), 1);
  }

  #[tokio::test]
  async fn test_create_refetches_subscribed_list_once() {
    let transport = FakeTransport::new();
    transport.respond("GET /api/projects/1/tasks", json!([{"id": 1, "title": "old"}]));
    transport.respond("POST /api/projects/1/tasks", json!({"id": 2, "title": "new"}));
    let client = client(&transport);

    let mut first = client.use_query::<GetTasks>(1).await.unwrap();
    let mut second = client.use_query::<GetTasks>(1).await.unwrap();
    first.settled().await.unwrap();
    second.settled().await.unwrap();

    transport.respond(
      "GET /api/projects/1/tasks",
      json!([{"id": 1, "title": "old"}, {"id": 2, "title": "new"}]),
    );
    let created = client
      .use_mutation::<CreateTask>()
      .trigger(CreateTaskArgs {
        project_id: 1,
        task: TaskDraft {
          title: "new".into(),
          ..TaskDraft::default()
        },
      })
      .await
      .unwrap();
    assert_eq!(created.id, 2);

    let state = first.settled().await.unwrap();
    let ids: Vec<i64> = state.data.unwrap().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(second.state().data.unwrap().len(), 2);
    assert_eq!(transport.count("GET /api/projects/1/tasks"), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_create_swaps_placeholder_by_correlation_id() {
    let transport = FakeTransport::new();
    transport.respond("GET /api/projects/1/tasks", json!([]));
    transport.respond_after(
      "POST /api/projects/1/tasks",
      Duration::from_millis(50),
      json!({"id": 77, "title": "a"}),
    );
    let client = client(&transport);
    let mut list = client.use_query::<GetTasks>(1).await.unwrap();
    list.settled().await.unwrap();

    let create = client.use_mutation::<CreateTask>();
    let draft = |title: &str| CreateTaskArgs {
      project_id: 1,
      task: TaskDraft {
        title: title.into(),
        ..TaskDraft::default()
      },
    };
    let a = tokio::spawn({
      let create = create.clone();
      let args = draft("a");
      async move { create.trigger(args).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let b = tokio::spawn({
      let create = create.clone();
      let args = draft("b");
      async move { create.trigger(args).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let shown = list.state().data.unwrap();
    assert_eq!(shown.len(), 2);
    assert!(shown.iter().all(Task::is_pending));

    // Keep the refetch from replacing what the commit wrote.
    transport.fail("GET /api/projects/1/tasks", ApiError::Fetch("offline".into()));
    a.await.unwrap().unwrap();
    list.settled().await.unwrap();

    let shown = list.state().data.unwrap();
    assert_eq!(shown[0].id, 77);
    assert!(!shown[0].is_pending());
    assert_eq!(shown[1].title, "b");
    assert!(shown[1].is_pending());

    b.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_delete_rolls_back_on_failure() {
    let transport = FakeTransport::new();
    transport.respond(
      "GET /api/projects/1/tasks",
      json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]),
    );
    transport.fail(
      "DELETE /api/projects/1/tasks/2",
      ApiError::Server {
        status: 403,
        message: "not allowed".into(),
      },
    );
    let client = client(&transport);
    let mut list = client.use_query::<GetTasks>(1).await.unwrap();
    let before = list.settled().await.unwrap().data.unwrap();

    let result = client
      .use_mutation::<DeleteTask>()
      .trigger(TaskRef {
        project_id: 1,
        id: 2,
      })
      .await;
    assert!(result.is_err());
    assert_eq!(list.state().data.unwrap(), before);
  }

  #[test]
  fn test_overdue_only_for_open_tasks() {
    let mut task: Task = serde_json::from_value(json!({
      "id": 1,
      "title": "t",
      "dueDate": "2000-01-01T00:00:00.000Z",
      "taskStatus": "ONGOING"
    }))
    .unwrap();
    assert!(is_overdue(&task));
    task.task_status = Some(TaskStatus::Completed);
    assert!(!is_overdue(&task));
  }
}
