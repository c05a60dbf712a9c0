//! End-to-end pipeline tests against the in-memory sqlite store.

use std::{
  sync::atomic::{AtomicBool, Ordering},
  time::Duration,
};

use tianguis_core::{
  catalog::{Condition, Product, Retailer, RelevanceTier},
  observation::{Classification, HotMark, NewObservation, PriceObservation},
  projection::ProjectionRecord,
  run::Run,
  store::{KeyCursor, ObservationFilter, PriceStore, StoreError, Transient},
};
use tianguis_pipeline::{
  ingest::{RawListing, SearchClient, SearchError},
  Error, HotnessScorer, Ingestor, Pipeline, PipelineConfig, Reconciler,
  RetryPolicy, RunRegistry, Validator,
};
use tianguis_store_sqlite::{Error as SqliteError, SqliteStore};
use uuid::Uuid;

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// Wide absolute bounds and tiny page/batch sizes so every test exercises
/// paging and batching.
fn test_config() -> PipelineConfig {
  PipelineConfig {
    min_price_threshold: 0.0,
    max_price_threshold: 1_000_000.0,
    page_size: 3,
    batch_size: 2,
    retry_base_delay: Duration::from_millis(1),
    retry_max_delay: Duration::from_millis(2),
    ..PipelineConfig::default()
  }
}

fn product(id: i64) -> Product {
  Product {
    product_id:    id,
    brand:         "Acme".into(),
    model:         format!("Fone {id}"),
    color_variant: Some("black".into()),
    ram_variant:   Some("8GB".into()),
    rom_variant:   Some("256GB".into()),
    variant_rank:  Some(id),
    os:            Some("android".into()),
    condition:     Condition::New,
    search_query:  format!("acme fone {id}"),
    is_active:     true,
  }
}

fn obs(run_id: Uuid, product_id: i64, retailer_id: i64, price: f64) -> NewObservation {
  NewObservation {
    run_id,
    product_id: Some(product_id),
    retailer_id: Some(retailer_id),
    price: Some(price),
    currency: "MXN".into(),
    source_url: None,
  }
}

async fn store_with_product() -> SqliteStore {
  let store = SqliteStore::open_in_memory().await.unwrap();
  store.insert_product(&product(1)).await.unwrap();
  store
}

async fn two_retailers(store: &SqliteStore) -> (i64, i64) {
  let a = store
    .insert_retailer("MegaTienda", RelevanceTier::Verified)
    .await
    .unwrap();
  let b = store
    .insert_retailer("TelcoShop", RelevanceTier::Active)
    .await
    .unwrap();
  (a.retailer_id, b.retailer_id)
}

async fn classifications(
  store: &SqliteStore,
  run_id: Uuid,
) -> Vec<(Option<f64>, Classification)> {
  let filter = ObservationFilter { run_id, classification: None };
  store
    .observations_after(&filter, None, 1000)
    .await
    .unwrap()
    .into_iter()
    .map(|o| (o.price, o.classification))
    .collect()
}

// ─── Validation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn validator_is_exhaustive() {
  let store = store_with_product().await;
  let (r1, _) = two_retailers(&store).await;
  let run = store.begin_run().await.unwrap();

  let mut batch = vec![
    // Null price.
    NewObservation { price: None, ..obs(run.run_id, 1, r1, 0.0) },
    // Null reference.
    NewObservation { retailer_id: None, ..obs(run.run_id, 1, r1, 5_000.0) },
    // Foreign currency: exempt from bounds, ends Valid.
    NewObservation { currency: "USD".into(), ..obs(run.run_id, 1, r1, 2.0) },
  ];
  batch.extend([1_000.0, 2_000.0, 3_000.0].map(|p| obs(run.run_id, 1, r1, p)));
  store.insert_observations(batch).await.unwrap();

  let config = test_config();
  let retry = RetryPolicy::from_config(&config);
  let report = Validator::new(&store, &config, &retry)
    .classify_run(run.run_id)
    .await
    .unwrap();

  assert_eq!(report.total, 6);
  assert_eq!(report.classified(), report.total);
  assert_eq!(report.null_price, 1);
  assert_eq!(report.null_reference, 1);
  assert_eq!(report.valid, 4);

  let unclassified = ObservationFilter {
    run_id:         run.run_id,
    classification: Some(Classification::Unclassified),
  };
  assert_eq!(store.count_observations(&unclassified).await.unwrap(), 0);
}

#[tokio::test]
async fn validator_flags_absolute_extremes_in_configured_currency_only() {
  let store = store_with_product().await;
  let (r1, _) = two_retailers(&store).await;
  let run = store.begin_run().await.unwrap();

  store
    .insert_observations(vec![
      obs(run.run_id, 1, r1, 500.0),    // below 1000
      obs(run.run_id, 1, r1, 70_000.0), // above 60000
      obs(run.run_id, 1, r1, 5_000.0),
      NewObservation { currency: "USD".into(), ..obs(run.run_id, 1, r1, 500.0) },
    ])
    .await
    .unwrap();

  // Production bounds.
  let config = PipelineConfig {
    page_size: 3,
    batch_size: 2,
    retry_base_delay: Duration::from_millis(1),
    retry_max_delay: Duration::from_millis(2),
    ..PipelineConfig::default()
  };
  let retry = RetryPolicy::from_config(&config);
  let report = Validator::new(&store, &config, &retry)
    .classify_run(run.run_id)
    .await
    .unwrap();

  assert_eq!(report.extreme_price, 2);
  assert_eq!(report.valid, 2);

  for (price, class) in classifications(&store, run.run_id).await {
    match (price, class) {
      (Some(p), Classification::ExtremePrice) => assert!(!(1_000.0..=60_000.0).contains(&p)),
      (_, Classification::Valid) => {}
      other => panic!("unexpected state: {other:?}"),
    }
  }
}

#[tokio::test]
async fn deviation_check_uses_median_window() {
  let store = store_with_product().await;
  store.insert_product(&product(2)).await.unwrap();
  store.insert_product(&product(3)).await.unwrap();
  let (r1, _) = two_retailers(&store).await;
  let run = store.begin_run().await.unwrap();

  // Product 1: [10, 20, 30, 40, 50] — window average 30, allowed [15, 60].
  let mut batch: Vec<_> = [10.0, 20.0, 30.0, 40.0, 50.0]
    .iter()
    .map(|p| obs(run.run_id, 1, r1, *p))
    .collect();
  // Product 2: four observations with a wild outlier — exempt, all Valid.
  batch.extend([10.0, 10.0, 10.0, 10_000.0].map(|p| obs(run.run_id, 2, r1, p)));
  // Product 3: window average 20, allowed [10, 40]; both extremes sit
  // exactly on a bound — inclusive, so nothing is flagged.
  batch.extend([10.0, 10.0, 15.0, 25.0, 40.0].map(|p| obs(run.run_id, 3, r1, p)));
  store.insert_observations(batch).await.unwrap();

  let config = test_config();
  let retry = RetryPolicy::from_config(&config);
  let report = Validator::new(&store, &config, &retry)
    .classify_run(run.run_id)
    .await
    .unwrap();

  assert_eq!(report.too_low, 1);
  assert_eq!(report.too_high, 0);
  assert_eq!(report.valid, 13);

  for (price, class) in classifications(&store, run.run_id).await {
    if price == Some(10.0) && class == Classification::TooLow {
      continue; // the product-1 outlier
    }
    assert_eq!(class, Classification::Valid, "price {price:?}");
  }
}

// ─── Hotness ─────────────────────────────────────────────────────────────────

async fn validated_run(
  store: &SqliteStore,
  config: &PipelineConfig,
  batch: Vec<NewObservation>,
) -> Uuid {
  let run_id = batch[0].run_id;
  store.insert_observations(batch).await.unwrap();
  let retry = RetryPolicy::from_config(config);
  Validator::new(store, config, &retry)
    .classify_run(run_id)
    .await
    .unwrap();
  run_id
}

#[tokio::test]
async fn hotness_gate_stays_closed_without_a_real_discount() {
  let store = store_with_product().await;
  let (r1, r2) = two_retailers(&store).await;
  let config = test_config();
  let run = store.begin_run().await.unwrap();

  // Average of top 5 is 112; threshold 95.2; nothing qualifies.
  let run_id = validated_run(
    &store,
    &config,
    vec![
      obs(run.run_id, 1, r1, 100.0),
      obs(run.run_id, 1, r2, 100.0),
      obs(run.run_id, 1, r1, 110.0),
      obs(run.run_id, 1, r2, 120.0),
      obs(run.run_id, 1, r1, 130.0),
    ],
  )
  .await;

  let retry = RetryPolicy::from_config(&config);
  let report = HotnessScorer::new(&store, &config, &retry)
    .score_run(run_id)
    .await
    .unwrap();

  assert_eq!(report.groups, 1);
  assert_eq!(report.gated_open, 1);
  assert_eq!(report.marked, 0);
}

#[tokio::test]
async fn hotness_marks_discounts_below_the_threshold() {
  let store = store_with_product().await;
  let (r1, r2) = two_retailers(&store).await;
  let config = test_config();
  let run = store.begin_run().await.unwrap();

  // Average of top 5 is 104; threshold 88.4; only the 60 qualifies.
  let run_id = validated_run(
    &store,
    &config,
    vec![
      obs(run.run_id, 1, r1, 60.0),
      obs(run.run_id, 1, r2, 100.0),
      obs(run.run_id, 1, r1, 110.0),
      obs(run.run_id, 1, r2, 120.0),
      obs(run.run_id, 1, r1, 130.0),
    ],
  )
  .await;

  let retry = RetryPolicy::from_config(&config);
  let report = HotnessScorer::new(&store, &config, &retry)
    .score_run(run_id)
    .await
    .unwrap();
  assert_eq!(report.marked, 1);

  let filter = ObservationFilter { run_id, classification: None };
  let rows = store.observations_after(&filter, None, 100).await.unwrap();
  let hot: Vec<_> = rows.iter().filter(|o| o.is_hot).collect();
  assert_eq!(hot.len(), 1);
  assert_eq!(hot[0].price, Some(60.0));
  // (104 - 60) / 104 * 100, rounded to 2 decimals.
  assert_eq!(hot[0].hotness_score, Some(42.31));
}

#[tokio::test]
async fn hotness_ignores_untrusted_retailers_and_is_idempotent() {
  let store = store_with_product().await;
  let (r1, r2) = two_retailers(&store).await;
  let shady = store
    .insert_retailer("Baratija", RelevanceTier::Suspicious)
    .await
    .unwrap();
  let config = test_config();
  let run = store.begin_run().await.unwrap();

  // The suspicious retailer's 10 would dominate any group it joined.
  let run_id = validated_run(
    &store,
    &config,
    vec![
      obs(run.run_id, 1, shady.retailer_id, 10.0),
      obs(run.run_id, 1, r1, 60.0),
      obs(run.run_id, 1, r2, 100.0),
      obs(run.run_id, 1, r1, 110.0),
      obs(run.run_id, 1, r2, 120.0),
      obs(run.run_id, 1, r1, 130.0),
    ],
  )
  .await;

  let retry = RetryPolicy::from_config(&config);
  let scorer = HotnessScorer::new(&store, &config, &retry);
  let first = scorer.score_run(run_id).await.unwrap();
  assert_eq!(first.eligible, 5);
  assert_eq!(first.marked, 1);

  // Recompute resets the previous marks before rewriting them.
  let second = scorer.score_run(run_id).await.unwrap();
  assert_eq!(second.reset, 6);
  assert_eq!(second.marked, 1);
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn reconciler_rejects_unvalidated_runs() {
  let store = store_with_product().await;
  let (r1, _) = two_retailers(&store).await;
  let run = store.begin_run().await.unwrap();
  store
    .insert_observations(vec![obs(run.run_id, 1, r1, 5_000.0)])
    .await
    .unwrap();

  let config = test_config();
  let retry = RetryPolicy::from_config(&config);
  let err = Reconciler::new(&store, &config, &retry)
    .reconcile_run(run.run_id)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::RunNotValidated(id) if id == run.run_id));
}

#[tokio::test]
async fn reconciler_projects_joins_and_dedups() {
  let store = store_with_product().await;
  let (r1, r2) = two_retailers(&store).await;
  let config = test_config();
  let run = store.begin_run().await.unwrap();

  let run_id = validated_run(
    &store,
    &config,
    vec![
      NewObservation {
        source_url: Some("https://tienda.mx/item/1?utm_source=feed".into()),
        ..obs(run.run_id, 1, r1, 5_000.0)
      },
      // Same (product, retailer, price): dropped as a duplicate.
      obs(run.run_id, 1, r1, 5_000.0),
      NewObservation {
        source_url: Some("not a url".into()),
        ..obs(run.run_id, 1, r2, 6_000.0)
      },
      obs(run.run_id, 1, r2, 7_000.0),
    ],
  )
  .await;

  let retry = RetryPolicy::from_config(&config);
  let report = Reconciler::new(&store, &config, &retry)
    .reconcile_run(run_id)
    .await
    .unwrap();

  assert_eq!(report.processed, 4);
  assert_eq!(report.duplicates, 1);
  assert_eq!(report.skipped, 1); // the bad URL
  assert_eq!(report.succeeded, 2);

  let rows = store.projection_for_run(run_id).await.unwrap();
  assert_eq!(rows.len(), 2);

  // First row of the key group wins; its query string is stripped.
  assert_eq!(rows[0].price, 5_000.0);
  assert_eq!(rows[0].product_url.as_deref(), Some("https://tienda.mx/item/1"));
  assert_eq!(rows[0].brand, "Acme");
  assert_eq!(rows[0].retailer_name, "MegaTienda");
  assert_eq!(rows[1].price, 7_000.0);
}

#[tokio::test]
async fn reconciler_is_idempotent() {
  let store = store_with_product().await;
  let (r1, r2) = two_retailers(&store).await;
  let config = test_config();
  let run = store.begin_run().await.unwrap();

  let run_id = validated_run(
    &store,
    &config,
    vec![
      obs(run.run_id, 1, r1, 5_000.0),
      obs(run.run_id, 1, r2, 6_000.0),
      obs(run.run_id, 1, r2, 7_000.0),
    ],
  )
  .await;

  let retry = RetryPolicy::from_config(&config);
  let reconciler = Reconciler::new(&store, &config, &retry);
  let first = reconciler.reconcile_run(run_id).await.unwrap();
  let second = reconciler.reconcile_run(run_id).await.unwrap();

  assert_eq!(first.succeeded, 3);
  assert_eq!(second.succeeded, 3);
  assert_eq!(store.count_projection(None).await.unwrap(), 3);
}

#[tokio::test]
async fn projection_only_ever_holds_the_active_run() {
  let store = store_with_product().await;
  let (r1, _) = two_retailers(&store).await;
  let config = test_config();
  let retry = RetryPolicy::from_config(&config);
  let reconciler = Reconciler::new(&store, &config, &retry);

  let old = store.begin_run().await.unwrap();
  let old_id =
    validated_run(&store, &config, vec![obs(old.run_id, 1, r1, 5_000.0)]).await;
  reconciler.reconcile_run(old_id).await.unwrap();

  tokio::time::sleep(Duration::from_millis(5)).await;
  let new = store.begin_run().await.unwrap();
  let new_id =
    validated_run(&store, &config, vec![obs(new.run_id, 1, r1, 6_000.0)]).await;
  reconciler.reconcile_run(new_id).await.unwrap();

  let registry = RunRegistry::new(&store, &retry);
  assert_eq!(registry.active_run().await.unwrap().run_id, new_id);
  registry.purge_stale(new_id).await.unwrap();

  assert_eq!(store.projection_run_ids().await.unwrap(), vec![new_id]);
  // Observation history survives the purge.
  let old_filter = ObservationFilter { run_id: old_id, classification: None };
  assert_eq!(store.count_observations(&old_filter).await.unwrap(), 1);
}

// ─── Full cycle ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_cycle_produces_a_hot_marked_projection() {
  let store = store_with_product().await;
  let (r1, r2) = two_retailers(&store).await;
  let config = test_config();
  let run = store.begin_run().await.unwrap();

  store
    .insert_observations(vec![
      obs(run.run_id, 1, r1, 60.0),
      obs(run.run_id, 1, r2, 100.0),
      obs(run.run_id, 1, r1, 110.0),
      obs(run.run_id, 1, r2, 120.0),
      obs(run.run_id, 1, r1, 130.0),
      NewObservation { price: None, ..obs(run.run_id, 1, r1, 0.0) },
    ])
    .await
    .unwrap();

  let report = Pipeline::new(&store, &config).run_cycle().await.unwrap();

  assert_eq!(report.run_id, run.run_id);
  assert_eq!(report.validation.total, 6);
  assert_eq!(report.validation.valid, 5);
  assert_eq!(report.hotness.as_ref().unwrap().marked, 1);
  assert_eq!(report.reconcile.succeeded, 5);

  let rows = store.projection_for_run(run.run_id).await.unwrap();
  let hot: Vec<_> = rows.iter().filter(|r| r.is_hot).collect();
  assert_eq!(hot.len(), 1);
  assert_eq!(hot[0].price, 60.0);
  assert_eq!(hot[0].hotness_score, Some(42.31));
}

#[tokio::test]
async fn reconcile_without_scoring_projects_cold_rows() {
  let store = store_with_product().await;
  let (r1, r2) = two_retailers(&store).await;
  let config = test_config();
  let run = store.begin_run().await.unwrap();

  let run_id = validated_run(
    &store,
    &config,
    vec![obs(run.run_id, 1, r1, 50.0), obs(run.run_id, 1, r2, 100.0)],
  )
  .await;

  // Scoring never ran; the projection is still complete, just unmarked.
  let retry = RetryPolicy::from_config(&config);
  Reconciler::new(&store, &config, &retry)
    .reconcile_run(run_id)
    .await
    .unwrap();

  let rows = store.projection_for_run(run_id).await.unwrap();
  assert_eq!(rows.len(), 2);
  assert!(rows.iter().all(|r| !r.is_hot && r.hotness_score.is_none()));
}

// ─── Backend faults ──────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum FaultyStoreError {
  #[error(transparent)]
  Inner(#[from] SqliteError),
  #[error("hot-field reset unavailable")]
  ResetUnavailable,
}

impl Transient for FaultyStoreError {
  fn is_transient(&self) -> bool {
    matches!(self, Self::Inner(e) if e.is_transient())
  }
}

impl StoreError for FaultyStoreError {
  fn is_constraint_violation(&self) -> bool {
    matches!(self, Self::Inner(e) if e.is_constraint_violation())
  }
}

/// Delegating store that injects one backend fault: either a fatal
/// `reset_hot_fields` failure, or a rival projection row landing just before
/// the first batch upsert (simulating a concurrent writer).
struct FaultyStore {
  inner:      SqliteStore,
  fail_reset: bool,
  collide:    AtomicBool,
}

impl FaultyStore {
  fn failing_reset(inner: SqliteStore) -> Self {
    Self { inner, fail_reset: true, collide: AtomicBool::new(false) }
  }

  fn colliding_upsert(inner: SqliteStore) -> Self {
    Self { inner, fail_reset: false, collide: AtomicBool::new(true) }
  }
}

impl PriceStore for FaultyStore {
  type Error = FaultyStoreError;

  async fn begin_run(&self) -> Result<Run, FaultyStoreError> {
    Ok(self.inner.begin_run().await?)
  }

  async fn latest_run(&self) -> Result<Option<Run>, FaultyStoreError> {
    Ok(self.inner.latest_run().await?)
  }

  async fn insert_observations(
    &self,
    batch: Vec<NewObservation>,
  ) -> Result<u64, FaultyStoreError> {
    Ok(self.inner.insert_observations(batch).await?)
  }

  async fn count_observations(
    &self,
    filter: &ObservationFilter,
  ) -> Result<u64, FaultyStoreError> {
    Ok(self.inner.count_observations(filter).await?)
  }

  async fn observations_after(
    &self,
    filter: &ObservationFilter,
    after: Option<i64>,
    limit: usize,
  ) -> Result<Vec<PriceObservation>, FaultyStoreError> {
    Ok(self.inner.observations_after(filter, after, limit).await?)
  }

  async fn valid_observations_after(
    &self,
    run_id: Uuid,
    after: Option<KeyCursor>,
    limit: usize,
  ) -> Result<Vec<PriceObservation>, FaultyStoreError> {
    Ok(self.inner.valid_observations_after(run_id, after, limit).await?)
  }

  async fn update_classifications(
    &self,
    updates: &[(i64, Classification)],
  ) -> Result<(), FaultyStoreError> {
    Ok(self.inner.update_classifications(updates).await?)
  }

  async fn reset_hot_fields(&self, run_id: Uuid) -> Result<u64, FaultyStoreError> {
    if self.fail_reset {
      return Err(FaultyStoreError::ResetUnavailable);
    }
    Ok(self.inner.reset_hot_fields(run_id).await?)
  }

  async fn mark_hot(&self, marks: &[HotMark]) -> Result<(), FaultyStoreError> {
    Ok(self.inner.mark_hot(marks).await?)
  }

  async fn products_by_ids(
    &self,
    ids: &[i64],
  ) -> Result<Vec<Product>, FaultyStoreError> {
    Ok(self.inner.products_by_ids(ids).await?)
  }

  async fn active_products(&self) -> Result<Vec<Product>, FaultyStoreError> {
    Ok(self.inner.active_products().await?)
  }

  async fn retailers_by_ids(
    &self,
    ids: &[i64],
  ) -> Result<Vec<Retailer>, FaultyStoreError> {
    Ok(self.inner.retailers_by_ids(ids).await?)
  }

  async fn list_retailers(&self) -> Result<Vec<Retailer>, FaultyStoreError> {
    Ok(self.inner.list_retailers().await?)
  }

  async fn insert_retailer(
    &self,
    name: &str,
    tier: RelevanceTier,
  ) -> Result<Retailer, FaultyStoreError> {
    Ok(self.inner.insert_retailer(name, tier).await?)
  }

  async fn delete_projection_except(
    &self,
    run_id: Uuid,
  ) -> Result<u64, FaultyStoreError> {
    Ok(self.inner.delete_projection_except(run_id).await?)
  }

  async fn delete_projection_for_run(
    &self,
    run_id: Uuid,
  ) -> Result<u64, FaultyStoreError> {
    Ok(self.inner.delete_projection_for_run(run_id).await?)
  }

  async fn upsert_projection_batch(
    &self,
    batch: &[ProjectionRecord],
  ) -> Result<(), FaultyStoreError> {
    if self.collide.swap(false, Ordering::SeqCst)
      && let Some(first) = batch.first()
    {
      let mut rival = first.clone();
      rival.price_id += 1_000;
      self.inner.insert_projection_row(&rival).await?;
    }
    Ok(self.inner.upsert_projection_batch(batch).await?)
  }

  async fn insert_projection_row(
    &self,
    record: &ProjectionRecord,
  ) -> Result<(), FaultyStoreError> {
    Ok(self.inner.insert_projection_row(record).await?)
  }

  async fn count_projection(
    &self,
    run_id: Option<Uuid>,
  ) -> Result<u64, FaultyStoreError> {
    Ok(self.inner.count_projection(run_id).await?)
  }

  async fn projection_run_ids(&self) -> Result<Vec<Uuid>, FaultyStoreError> {
    Ok(self.inner.projection_run_ids().await?)
  }

  async fn projection_for_run(
    &self,
    run_id: Uuid,
  ) -> Result<Vec<ProjectionRecord>, FaultyStoreError> {
    Ok(self.inner.projection_for_run(run_id).await?)
  }
}

#[tokio::test]
async fn batch_collision_falls_back_to_row_by_row() {
  let store = store_with_product().await;
  let (r1, r2) = two_retailers(&store).await;
  // One batch for the whole run, so the collision fails it as a unit.
  let config = PipelineConfig { batch_size: 10, ..test_config() };
  let run = store.begin_run().await.unwrap();

  let run_id = validated_run(
    &store,
    &config,
    vec![
      obs(run.run_id, 1, r1, 5_000.0),
      obs(run.run_id, 1, r2, 6_000.0),
      obs(run.run_id, 1, r2, 7_000.0),
    ],
  )
  .await;

  // A concurrent writer lands a row sharing the first entry's composite key
  // under a different price_id, so the batch upsert hits the unique index.
  let faulty = FaultyStore::colliding_upsert(store.clone());
  let retry = RetryPolicy::from_config(&config);
  let report = Reconciler::new(&faulty, &config, &retry)
    .reconcile_run(run_id)
    .await
    .unwrap();

  // Only the offending row is dropped; the rest of the batch lands.
  assert_eq!(report.processed, 3);
  assert_eq!(report.succeeded, 2);

  let rows = store.projection_for_run(run_id).await.unwrap();
  assert_eq!(rows.len(), 3); // rival row + the two that survived the fallback
  assert!(rows.iter().any(|r| r.price == 6_000.0));
  assert!(rows.iter().any(|r| r.price == 7_000.0));
}

#[tokio::test]
async fn scorer_failure_does_not_block_reconciliation() {
  let store = store_with_product().await;
  let (r1, r2) = two_retailers(&store).await;
  let config = test_config();
  let run = store.begin_run().await.unwrap();

  store
    .insert_observations(vec![
      obs(run.run_id, 1, r1, 60.0),
      obs(run.run_id, 1, r2, 100.0),
      obs(run.run_id, 1, r1, 110.0),
      obs(run.run_id, 1, r2, 120.0),
      obs(run.run_id, 1, r1, 130.0),
    ])
    .await
    .unwrap();

  let faulty = FaultyStore::failing_reset(store.clone());
  let report = Pipeline::new(&faulty, &config)
    .run_cycle_for(run.run_id)
    .await
    .unwrap();

  // The scoring failure is recorded, not propagated.
  assert_eq!(report.validation.total, 5);
  assert!(report.hotness.is_err());
  assert_eq!(report.reconcile.succeeded, 5);

  // Classifications stayed committed and the projection is complete, just
  // unmarked.
  let unclassified = ObservationFilter {
    run_id:         run.run_id,
    classification: Some(Classification::Unclassified),
  };
  assert_eq!(store.count_observations(&unclassified).await.unwrap(), 0);

  let rows = store.projection_for_run(run.run_id).await.unwrap();
  assert_eq!(rows.len(), 5);
  assert!(rows.iter().all(|r| !r.is_hot && r.hotness_score.is_none()));
}

// ─── Ingestion ───────────────────────────────────────────────────────────────

struct FakeSearch {
  listings: Vec<RawListing>,
}

impl SearchClient for FakeSearch {
  async fn search(&self, _query: &str) -> Result<Vec<RawListing>, SearchError> {
    Ok(self.listings.clone())
  }
}

#[tokio::test]
async fn ingestion_filters_listings_and_registers_retailers() {
  let store = store_with_product().await;
  let (r1, _) = two_retailers(&store).await;
  let config = test_config();
  let retry = RetryPolicy::from_config(&config);

  let long_url = format!("https://tienda.mx/{}", "x".repeat(300));
  let client = FakeSearch {
    listings: vec![
      RawListing {
        source: "MegaTienda".into(),
        title: "Acme Fone 1 nuevo".into(),
        price: Some(5_000.0),
        currency: None,
        url: Some(long_url),
      },
      RawListing {
        source: "Nuevo Vendedor".into(),
        title: "Acme Fone 1".into(),
        price: Some(4_800.0),
        currency: Some("MXN".into()),
        url: None,
      },
      // Second-hand listing of a product tracked as new.
      RawListing {
        source: "MegaTienda".into(),
        title: "Acme Fone 1 usado".into(),
        price: Some(2_000.0),
        ..RawListing::default()
      },
      // No seller name.
      RawListing {
        title: "Acme Fone 1".into(),
        price: Some(5_100.0),
        ..RawListing::default()
      },
      // Free is not a price.
      RawListing {
        source: "MegaTienda".into(),
        title: "Acme Fone 1".into(),
        price: Some(0.0),
        ..RawListing::default()
      },
    ],
  };

  let report = Ingestor::new(&store, &client, &config, &retry)
    .ingest_cycle()
    .await
    .unwrap();

  assert_eq!(report.products, 1);
  assert_eq!(report.listings, 5);
  assert_eq!(report.inserted, 2);
  assert_eq!(report.skipped, 3);
  assert_eq!(report.new_retailers, 1);

  let run_id = report.run_id.unwrap();
  let filter = ObservationFilter { run_id, classification: None };
  let rows = store.observations_after(&filter, None, 100).await.unwrap();
  assert_eq!(rows.len(), 2);

  // Existing retailer matched case-insensitively; missing currency defaults.
  assert_eq!(rows[0].retailer_id, Some(r1));
  assert_eq!(rows[0].currency, "MXN");
  assert_eq!(rows[0].source_url.as_ref().map(String::len), Some(255));

  let registered = store.list_retailers().await.unwrap();
  let newcomer = registered
    .iter()
    .find(|r| r.name == "Nuevo Vendedor")
    .unwrap();
  assert_eq!(newcomer.tier, RelevanceTier::Suspicious);
  assert_eq!(rows[1].retailer_id, Some(newcomer.retailer_id));
}
