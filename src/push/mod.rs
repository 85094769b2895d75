//! Server push: the channel boundary, topic mapping and the bridge that turns
//! push events into cache invalidations.

mod bridge;
mod stomp;
mod topics;

pub use bridge::{BridgeState, BridgeStatus, PushBridge, PushConfig};
pub use stomp::StompChannel;
pub use topics::{PayloadError, Topic};

use async_trait::async_trait;

use crate::error::ChannelError;

/// One inbound message: where it was published and its raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
  pub destination: String,
  pub body: String,
}

/// A push connection. The bridge drives it: `connect`, one `subscribe` per
/// topic, then `next_message` until it returns `None` or an error, after
/// which it calls `connect` again.
#[async_trait]
pub trait PushChannel: Send {
  async fn connect(&mut self) -> Result<(), ChannelError>;

  async fn subscribe(&mut self, destination: &str) -> Result<(), ChannelError>;

  /// `None` once the connection has closed.
  async fn next_message(&mut self) -> Option<Result<PushMessage, ChannelError>>;
}
