//! Mutation execution: optimistic apply, send, then commit or roll back.

use chrono::Utc;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::endpoint::{MutationContext, MutationEndpoint, MutationId};
use super::store::{CacheStore, Settlement};
use crate::error::{ApiError, CacheError, MutationError};
use crate::transport::Transport;

impl From<CacheError> for MutationError {
  fn from(err: CacheError) -> Self {
    match err {
      CacheError::Api(e) => Self::Api(e),
      CacheError::InUse { .. } | CacheError::Closed => Self::Closed,
    }
  }
}

/// Everything a mutation needs besides its arguments.
#[derive(Clone)]
pub(crate) struct MutationRunner {
  pub store: CacheStore,
  pub transport: Arc<dyn Transport>,
  pub ids: Arc<AtomicU64>,
}

impl MutationRunner {
  /// Run one mutation to completion.
  ///
  /// Optimistic patches land before the request is sent. On success the
  /// patches are committed and then the declared tags are invalidated, so a
  /// refetch never races the commit. On failure every patch this mutation
  /// made is rolled back and nothing is invalidated.
  pub async fn run<M: MutationEndpoint>(&self, args: M::Args) -> Result<M::Response, MutationError> {
    let cx = MutationContext {
      id: MutationId(self.ids.fetch_add(1, Ordering::Relaxed)),
      started_at: Utc::now(),
    };
    let mutation = cx.id;

    let touched = self
      .store
      .apply_optimistic(mutation, M::optimistic(&args, &cx))
      .await?;

    let request = M::request(&args);
    debug!(endpoint = M::NAME, %mutation, method = %request.method, path = %request.path, "sending mutation");
    let result = self
      .transport
      .send(&request)
      .await
      .and_then(|body| decode::<M>(body));

    match result {
      Ok(response) => {
        let updates = M::commit(&args, &response, &cx);
        self
          .store
          .settle(mutation, Settlement::Commit { touched, updates })
          .await?;
        self.store.invalidate(M::invalidates(&args)).await?;
        Ok(response)
      }
      Err(e) => {
        warn!(endpoint = M::NAME, %mutation, error = %e, "mutation failed; rolling back");
        self
          .store
          .settle(mutation, Settlement::Rollback { touched })
          .await?;
        Err(MutationError::Api(e))
      }
    }
  }
}

fn decode<M: MutationEndpoint>(body: Value) -> Result<M::Response, ApiError> {
  serde_json::from_value(body).map_err(ApiError::decode)
}

/// Typed trigger for one mutation endpoint.
pub struct MutationTrigger<M: MutationEndpoint> {
  runner: MutationRunner,
  _endpoint: PhantomData<fn() -> M>,
}

impl<M: MutationEndpoint> MutationTrigger<M> {
  pub(crate) fn new(runner: MutationRunner) -> Self {
    Self {
      runner,
      _endpoint: PhantomData,
    }
  }

  pub async fn trigger(&self, args: M::Args) -> Result<M::Response, MutationError> {
    self.runner.run::<M>(args).await
  }
}

impl<M: MutationEndpoint> Clone for MutationTrigger<M> {
  fn clone(&self) -> Self {
    Self::new(self.runner.clone())
  }
}
