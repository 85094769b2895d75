//! Client-side data layer for a task-management service: a tag-based
//! query/mutation cache over the REST API, kept fresh by STOMP server push.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod push;
pub mod transport;

pub use cache::{CacheClient, CacheStore, QueryHandle, QueryState, StoreConfig, Tag};
pub use error::{ApiError, CacheError, ChannelError, MutationError};
