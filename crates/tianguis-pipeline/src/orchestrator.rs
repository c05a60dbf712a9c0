//! Runs the three stages of a pipeline cycle in order.

use tianguis_core::store::PriceStore;
use uuid::Uuid;

use crate::{
  config::PipelineConfig,
  hotness::{HotnessReport, HotnessScorer},
  reconciler::{ReconcileReport, Reconciler},
  registry::RunRegistry,
  retry::RetryPolicy,
  validator::{ValidationReport, Validator},
  Result,
};

/// Outcome of one full cycle over a run.
#[derive(Debug)]
pub struct PipelineReport {
  pub run_id:     Uuid,
  pub validation: ValidationReport,
  /// Hotness scoring is best-effort; a failure is recorded here and the
  /// cycle continues without marks.
  pub hotness:    Result<HotnessReport>,
  pub reconcile:  ReconcileReport,
}

/// Composes validator, scorer, and reconciler over one store.
pub struct Pipeline<'a, S> {
  store:  &'a S,
  config: &'a PipelineConfig,
  retry:  RetryPolicy,
}

impl<'a, S: PriceStore> Pipeline<'a, S> {
  pub fn new(store: &'a S, config: &'a PipelineConfig) -> Self {
    let retry = RetryPolicy::from_config(config);
    Self { store, config, retry }
  }

  /// Run a full cycle against the active run.
  pub async fn run_cycle(&self) -> Result<PipelineReport> {
    let run = RunRegistry::new(self.store, &self.retry).active_run().await?;
    self.run_cycle_for(run.run_id).await
  }

  /// Run a full cycle against a specific run.
  ///
  /// Validation failures abort the cycle: the later stages are only defined
  /// over a fully classified run. A scoring failure is logged and recorded
  /// but does not stop reconciliation — a projection without hot marks beats
  /// no projection at all.
  pub async fn run_cycle_for(&self, run_id: Uuid) -> Result<PipelineReport> {
    let validation = Validator::new(self.store, self.config, &self.retry)
      .classify_run(run_id)
      .await?;

    let hotness = HotnessScorer::new(self.store, self.config, &self.retry)
      .score_run(run_id)
      .await;
    if let Err(err) = &hotness {
      tracing::error!(run_id = %run_id, error = %err, "hotness scoring failed; continuing");
    }

    let reconcile = Reconciler::new(self.store, self.config, &self.retry)
      .reconcile_run(run_id)
      .await?;

    Ok(PipelineReport { run_id, validation, hotness, reconcile })
  }
}
