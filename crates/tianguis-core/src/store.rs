//! The `PriceStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `tianguis-store-sqlite`).
//! Pipeline components depend on this abstraction, not on any concrete
//! backend, and consume only the narrow filtered/ordered/batched surface
//! defined here.

use std::future::Future;

use uuid::Uuid;

use crate::{
  catalog::{Product, Retailer, RelevanceTier},
  observation::{Classification, HotMark, NewObservation, PriceObservation},
  projection::ProjectionRecord,
  run::Run,
};

// ─── Error classification ────────────────────────────────────────────────────

/// Errors that can self-report whether a retry is worthwhile.
///
/// Implemented by store and search-client error types alike so one retry
/// policy serves every suspension point in the pipeline.
pub trait Transient {
  /// Timeouts, rate limits, lock contention, connection loss.
  fn is_transient(&self) -> bool;
}

/// Classification hooks every backend error type must provide.
///
/// The retry policy keys off [`Transient::is_transient`]; the reconciler's
/// per-item upsert fallback keys off
/// [`is_constraint_violation`](StoreError::is_constraint_violation).
pub trait StoreError:
  std::error::Error + Transient + Send + Sync + 'static
{
  /// A unique-constraint violation on insert or upsert.
  fn is_constraint_violation(&self) -> bool;
}

// ─── Query types ─────────────────────────────────────────────────────────────

/// Row filter for observation scans.
#[derive(Debug, Clone)]
pub struct ObservationFilter {
  pub run_id:         Uuid,
  /// Restrict to one classification; `None` scans every row of the run.
  pub classification: Option<Classification>,
}

/// Keyset cursor for the reconciliation scan, which is ordered by
/// (product_id, retailer_id, price, price_id). The trailing `price_id`
/// makes the sort key unique, so paging is exact even if the table is
/// written to mid-scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyCursor {
  pub product_id:  i64,
  pub retailer_id: i64,
  pub price:       f64,
  pub price_id:    i64,
}

impl KeyCursor {
  /// Cursor pointing at an already-fetched row; the next page starts
  /// strictly after it.
  pub fn from_observation(obs: &PriceObservation) -> Option<Self> {
    Some(Self {
      product_id:  obs.product_id?,
      retailer_id: obs.retailer_id?,
      price:       obs.price?,
      price_id:    obs.price_id,
    })
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the pipeline's backing store.
///
/// Observations are append-only except for the two pipeline-owned mutations:
/// classification (validator) and hot fields (scorer). The projection table
/// is the only table the pipeline deletes from.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait PriceStore: Send + Sync {
  type Error: StoreError;

  // ── Runs ──────────────────────────────────────────────────────────────

  /// Create and persist a new run stamped with the current time.
  fn begin_run(
    &self,
  ) -> impl Future<Output = Result<Run, Self::Error>> + Send + '_;

  /// The run with the most recent `started_at`, or `None` if the table is
  /// empty.
  fn latest_run(
    &self,
  ) -> impl Future<Output = Result<Option<Run>, Self::Error>> + Send + '_;

  // ── Observations ──────────────────────────────────────────────────────

  /// Append a batch of observations; returns the number inserted.
  fn insert_observations(
    &self,
    batch: Vec<NewObservation>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Exact count of observations matching `filter`.
  fn count_observations<'a>(
    &'a self,
    filter: &'a ObservationFilter,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// One page of observations matching `filter`, ordered by `price_id`,
  /// starting strictly after `after` (or at the beginning for `None`).
  fn observations_after<'a>(
    &'a self,
    filter: &'a ObservationFilter,
    after: Option<i64>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<PriceObservation>, Self::Error>> + Send + 'a;

  /// One page of `Valid` observations of `run_id` with all key fields
  /// present, ordered by (product_id, retailer_id, price, price_id),
  /// starting strictly after `after`.
  fn valid_observations_after(
    &self,
    run_id: Uuid,
    after: Option<KeyCursor>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<PriceObservation>, Self::Error>> + Send + '_;

  /// Write terminal classifications for the given observations.
  fn update_classifications<'a>(
    &'a self,
    updates: &'a [(i64, Classification)],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Clear `is_hot` and `hotness_score` on every observation of `run_id`;
  /// returns the number of rows touched.
  fn reset_hot_fields(
    &self,
    run_id: Uuid,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Set `is_hot = true` and the given score on each marked observation.
  fn mark_hot<'a>(
    &'a self,
    marks: &'a [HotMark],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Reference data ────────────────────────────────────────────────────

  /// Batch-fetch products by ID; missing IDs are silently absent from the
  /// result.
  fn products_by_ids<'a>(
    &'a self,
    ids: &'a [i64],
  ) -> impl Future<Output = Result<Vec<Product>, Self::Error>> + Send + 'a;

  /// All products with `is_active = true` (the ingestion work list).
  fn active_products(
    &self,
  ) -> impl Future<Output = Result<Vec<Product>, Self::Error>> + Send + '_;

  /// Batch-fetch retailers by ID; missing IDs are silently absent.
  fn retailers_by_ids<'a>(
    &'a self,
    ids: &'a [i64],
  ) -> impl Future<Output = Result<Vec<Retailer>, Self::Error>> + Send + 'a;

  /// Every known retailer.
  fn list_retailers(
    &self,
  ) -> impl Future<Output = Result<Vec<Retailer>, Self::Error>> + Send + '_;

  /// Register a new retailer under `name` with the given starting tier.
  fn insert_retailer<'a>(
    &'a self,
    name: &'a str,
    tier: RelevanceTier,
  ) -> impl Future<Output = Result<Retailer, Self::Error>> + Send + 'a;

  // ── Projection ────────────────────────────────────────────────────────

  /// Delete every projection row whose run_id differs from `run_id`;
  /// returns the number deleted. Safe to retry.
  fn delete_projection_except(
    &self,
    run_id: Uuid,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Delete every projection row belonging to `run_id`.
  fn delete_projection_for_run(
    &self,
    run_id: Uuid,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Upsert a batch of projection rows atomically. A unique-constraint
  /// violation fails the whole batch; the caller falls back to
  /// [`insert_projection_row`](Self::insert_projection_row).
  fn upsert_projection_batch<'a>(
    &'a self,
    batch: &'a [ProjectionRecord],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Insert a single projection row.
  fn insert_projection_row<'a>(
    &'a self,
    record: &'a ProjectionRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Exact projection row count, optionally restricted to one run.
  fn count_projection(
    &self,
    run_id: Option<Uuid>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Distinct run IDs present in the projection table.
  fn projection_run_ids(
    &self,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  /// All projection rows for `run_id`, ordered by
  /// (product_id, retailer_id, price).
  fn projection_for_run(
    &self,
    run_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ProjectionRecord>, Self::Error>> + Send + '_;
}
