//! Run registry: which run is live, and purging the ones that are not.

use tianguis_core::{run::Run, store::PriceStore};
use uuid::Uuid;

use crate::{retry::RetryPolicy, Error, Result};

/// Determines the single active run and deletes stale projection rows.
pub struct RunRegistry<'a, S> {
  store: &'a S,
  retry: &'a RetryPolicy,
}

impl<'a, S: PriceStore> RunRegistry<'a, S> {
  pub fn new(store: &'a S, retry: &'a RetryPolicy) -> Self {
    Self { store, retry }
  }

  /// The run with the most recent recorded timestamp.
  pub async fn active_run(&self) -> Result<Run> {
    self
      .retry
      .run(|| self.store.latest_run())
      .await
      .map_err(Error::store)?
      .ok_or(Error::NoRunsFound)
  }

  /// Delete every projection row that does not belong to `active_run_id`.
  ///
  /// At-least-once: deleting is idempotent, so a retried or repeated purge
  /// converges. Observation history is never touched.
  pub async fn purge_stale(&self, active_run_id: Uuid) -> Result<u64> {
    let deleted = self
      .retry
      .run(|| self.store.delete_projection_except(active_run_id))
      .await
      .map_err(Error::store)?;

    if deleted > 0 {
      tracing::info!(run_id = %active_run_id, deleted, "purged stale projection rows");
    }
    Ok(deleted)
  }
}
