use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use tasksync::api::tasks::{GetTaskById, GetTasks, TaskRef};
use tasksync::api::Task;
use tasksync::config::Config;
use tasksync::push::{PushBridge, StompChannel};
use tasksync::transport::{HttpTransport, Session};
use tasksync::{CacheClient, CacheError, QueryHandle, QueryState};

#[derive(Parser, Debug)]
#[command(name = "tasksync")]
#[command(about = "Watch a project's tasks through the sync cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $TASKSYNC_CONFIG, then $XDG_CONFIG_HOME/tasksync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Project id whose task list to watch
  #[arg(short, long)]
  project: i64,

  /// Also watch a single task of the project
  #[arg(short, long)]
  task: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = tasksync::logging::init(&config.log)?;

  let session = Session::from_env();
  let transport = HttpTransport::new(config.api.base_url.clone(), &session)?;
  let client = CacheClient::new(Arc::new(transport), config.cache.store_config());

  let bridge = config.push.as_ref().map(|push| {
    let channel = StompChannel::new(push.url.clone(), &session);
    PushBridge::spawn(channel, client.store().clone(), push.push_config())
  });
  if bridge.is_none() {
    warn!("no push section configured, data refreshes only on local writes");
  }

  let mut tasks = client.use_query::<GetTasks>(args.project).await?;
  let mut task = match args.task {
    Some(id) => {
      let task = TaskRef {
        project_id: args.project,
        id,
      };
      Some(client.use_query::<GetTaskById>(task).await?)
    }
    None => None,
  };
  report_tasks(&tasks.state());

  let shutdown = tokio::signal::ctrl_c();
  tokio::pin!(shutdown);

  loop {
    tokio::select! {
      _ = &mut shutdown => break,
      state = tasks.changed() => match state {
        Ok(state) => report_tasks(&state),
        Err(e) => {
          error!(error = %e, "task list subscription ended");
          break;
        }
      },
      state = next_change(&mut task) => match state {
        Ok(state) => report_task(&state),
        Err(e) => {
          error!(error = %e, "task subscription ended");
          break;
        }
      },
    }
  }

  info!("shutting down");
  if let Some(bridge) = bridge {
    bridge.shutdown().await;
  }
  Ok(())
}

async fn next_change(
  handle: &mut Option<QueryHandle<GetTaskById>>,
) -> Result<QueryState<Task>, CacheError> {
  match handle {
    Some(handle) => handle.changed().await,
    None => futures::future::pending().await,
  }
}

fn report_tasks(state: &QueryState<Vec<Task>>) {
  if let Some(e) = state.error() {
    warn!(error = %e, "task list refresh failed");
  }
  match state.data() {
    Some(tasks) => {
      let pending = tasks.iter().filter(|t| t.is_pending()).count();
      info!(status = ?state.status, count = tasks.len(), pending, "tasks");
      for task in tasks {
        let status = task.task_status.map(|s| s.to_string()).unwrap_or_default();
        info!(id = task.id, %status, "  {}", task.title);
      }
    }
    None => info!(status = ?state.status, "tasks"),
  }
}

fn report_task(state: &QueryState<Task>) {
  if let Some(e) = state.error() {
    warn!(error = %e, "task refresh failed");
  }
  if let Some(task) = state.data() {
    let overdue = tasksync::api::tasks::is_overdue(task);
    info!(id = task.id, status = ?task.task_status, overdue, "task {}", task.title);
  }
}
