use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::topics::Topic;
use super::{PushChannel, PushMessage};
use crate::cache::CacheStore;
use crate::error::ChannelError;

#[derive(Debug, Clone)]
pub struct PushConfig {
  /// Fixed wait between a lost connection and the next attempt
  pub reconnect_delay: Duration,
  pub topics: Vec<Topic>,
}

impl Default for PushConfig {
  fn default() -> Self {
    Self {
      reconnect_delay: Duration::from_secs(5),
      topics: Topic::ALL.to_vec(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
  #[default]
  Connecting,
  Connected,
  Disconnected,
  Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStatus {
  pub state: BridgeState,
  /// Sessions that got as far as subscribing every topic
  pub connects: u64,
  /// Messages turned into an invalidation
  pub dispatched: u64,
  /// Messages dropped for an unknown topic or a bad payload
  pub dropped: u64,
}

/// Runs a push channel in the background and invalidates the cache for every
/// message it receives. Dropping the bridge stops it.
pub struct PushBridge {
  status: watch::Receiver<BridgeStatus>,
  shutdown: oneshot::Sender<()>,
  task: JoinHandle<()>,
}

impl PushBridge {
  pub fn spawn<C: PushChannel + 'static>(channel: C, store: CacheStore, config: PushConfig) -> Self {
    let (status_tx, status) = watch::channel(BridgeStatus::default());
    let (shutdown, shutdown_rx) = oneshot::channel();
    let worker = Worker {
      channel,
      store,
      config,
      status: status_tx,
    };
    let task = tokio::spawn(worker.run(shutdown_rx));
    Self {
      status,
      shutdown,
      task,
    }
  }

  pub fn status(&self) -> BridgeStatus {
    self.status.borrow().clone()
  }

  pub fn watch(&self) -> watch::Receiver<BridgeStatus> {
    self.status.clone()
  }

  /// Stop reconnecting, close the current session and wait for the task.
  pub async fn shutdown(self) {
    let _ = self.shutdown.send(());
    let _ = self.task.await;
  }
}

enum SessionEnd {
  Channel(ChannelError),
  StoreClosed,
}

impl From<ChannelError> for SessionEnd {
  fn from(err: ChannelError) -> Self {
    Self::Channel(err)
  }
}

struct Worker<C> {
  channel: C,
  store: CacheStore,
  config: PushConfig,
  status: watch::Sender<BridgeStatus>,
}

impl<C: PushChannel> Worker<C> {
  async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
    loop {
      let outcome = tokio::select! {
        _ = &mut shutdown => break,
        outcome = self.session() => outcome,
      };

      match outcome {
        Ok(()) => info!("push channel closed"),
        Err(SessionEnd::Channel(e)) => warn!(error = %e, "push channel lost"),
        Err(SessionEnd::StoreClosed) => {
          debug!("cache store closed, stopping push bridge");
          break;
        }
      }
      self.update(|s| s.state = BridgeState::Disconnected);

      tokio::select! {
        _ = &mut shutdown => break,
        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
      }
    }
    self.update(|s| s.state = BridgeState::Stopped);
  }

  /// One connection: subscribe to every topic, then dispatch until it ends.
  /// Nothing is dispatched before all subscriptions are in place.
  async fn session(&mut self) -> Result<(), SessionEnd> {
    self.update(|s| s.state = BridgeState::Connecting);
    self.channel.connect().await?;
    for topic in &self.config.topics {
      self.channel.subscribe(&topic.destination()).await?;
    }
    self.update(|s| {
      s.state = BridgeState::Connected;
      s.connects += 1;
    });
    info!(topics = self.config.topics.len(), "push channel connected");

    while let Some(message) = self.channel.next_message().await {
      self.dispatch(message?).await?;
    }
    Ok(())
  }

  async fn dispatch(&mut self, message: PushMessage) -> Result<(), SessionEnd> {
    let Some(topic) = Topic::parse(&message.destination) else {
      warn!(destination = %message.destination, "push message on unknown topic dropped");
      self.update(|s| s.dropped += 1);
      return Ok(());
    };

    let tags = match topic.tags_for(&message.body) {
      Ok(tags) => tags,
      Err(e) => {
        warn!(%topic, error = %e, "malformed push payload dropped");
        self.update(|s| s.dropped += 1);
        return Ok(());
      }
    };

    let report = self
      .store
      .invalidate(tags)
      .await
      .map_err(|_| SessionEnd::StoreClosed)?;
    debug!(
      %topic,
      refetched = report.refetched.len(),
      marked_stale = report.marked_stale.len(),
      "push invalidation"
    );
    self.update(|s| s.dispatched += 1);
    Ok(())
  }

  fn update(&self, change: impl FnOnce(&mut BridgeStatus)) {
    self.status.send_modify(change);
  }
}
