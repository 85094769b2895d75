//! Tag-based query/mutation cache.
//!
//! This module keeps client-side copies of server entities consistent:
//! - Reads are cached per `QueryKey` and tagged with what they contain
//! - Concurrent reads of the same key share one network call
//! - Writes patch cached reads optimistically, then commit or roll back
//! - Successful writes and server push events invalidate by tag; entries in
//!   use refetch, the rest are marked stale
//!
//! All state lives in a single store task (see `store`); everything else
//! talks to it through `CacheClient`.

mod client;
mod endpoint;
mod entry;
mod index;
mod invalidation;
mod key;
mod mutation;
mod optimistic;
mod store;
mod tag;

pub use client::{CacheClient, QueryHandle, QueryState};
pub use endpoint::{
  CacheUpdate, Method, MutationContext, MutationEndpoint, MutationId, QueryEndpoint, Request,
  Updater,
};
pub use entry::{EntrySnapshot, QuerySource, QueryStatus};
pub use invalidation::InvalidationReport;
pub use key::QueryKey;
pub use mutation::MutationTrigger;
pub use store::{CacheStore, StoreConfig, Subscription};
pub use tag::{EntityKind, Tag, TagId};
