//! Rebuilds the denormalized projection table from a validated run.
//!
//! The projection is disposable: every cycle deletes the active run's rows
//! and rewrites them from the `Valid` observations, joined with product and
//! retailer metadata. The observation tables are never mutated here.

use std::collections::HashSet;

use tianguis_core::{
  catalog::{Product, Retailer},
  observation::{Classification, PriceObservation},
  projection::{ProjectionKey, ProjectionRecord},
  store::{ObservationFilter, PriceStore, StoreError},
};
use uuid::Uuid;

use crate::{
  cache::RefCache,
  config::PipelineConfig,
  retry::RetryPolicy,
  scanner::{PaginatedScanner, ValidByKey},
  Error, Result,
};

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
  /// `Valid` observations read from the scan.
  pub processed:  u64,
  /// Dropped for missing metadata, out-of-range price, or bad URL.
  pub skipped:    u64,
  /// Dropped as duplicates of an already-projected key.
  pub duplicates: u64,
  /// Projection rows written.
  pub succeeded:  u64,
}

// ─── Reconciler ──────────────────────────────────────────────────────────────

/// Projects a run's `Valid` observations into the read-side table.
pub struct Reconciler<'a, S> {
  store:  &'a S,
  config: &'a PipelineConfig,
  retry:  &'a RetryPolicy,
}

impl<'a, S: PriceStore> Reconciler<'a, S> {
  pub fn new(
    store: &'a S,
    config: &'a PipelineConfig,
    retry: &'a RetryPolicy,
  ) -> Self {
    Self { store, config, retry }
  }

  /// Rebuild the projection for `run_id`. Idempotent: a second call with the
  /// same arguments converges to the same table contents.
  ///
  /// Fails with [`Error::RunNotValidated`] if any observation of the run is
  /// still unclassified.
  pub async fn reconcile_run(&self, run_id: Uuid) -> Result<ReconcileReport> {
    self.ensure_validated(run_id).await?;

    // Full rebuild: clear other runs' leftovers and this run's previous
    // projection before rewriting.
    self
      .retry
      .run(|| self.store.delete_projection_except(run_id))
      .await
      .map_err(Error::store)?;
    self
      .retry
      .run(|| self.store.delete_projection_for_run(run_id))
      .await
      .map_err(Error::store)?;

    let mut report = ReconcileReport::default();
    let mut products: RefCache<i64, Product> = RefCache::new();
    let mut retailers: RefCache<i64, Retailer> = RefCache::new();
    let mut seen: HashSet<ProjectionKey> = HashSet::new();
    let mut batch: Vec<ProjectionRecord> = Vec::new();

    let mut scanner = PaginatedScanner::new(
      ValidByKey::new(self.store, run_id),
      self.retry,
      self.config.page_size,
    );

    while let Some(page) = scanner.next_page().await.map_err(Error::store)? {
      let product_ids: Vec<i64> =
        page.iter().filter_map(|o| o.product_id).collect();
      let retailer_ids: Vec<i64> =
        page.iter().filter_map(|o| o.retailer_id).collect();

      products
        .ensure::<S::Error, _, _>(&product_ids, |wanted| async move {
          let found = self
            .retry
            .run(|| self.store.products_by_ids(&wanted))
            .await?;
          Ok(found.into_iter().map(|p| (p.product_id, p)).collect())
        })
        .await
        .map_err(Error::store)?;
      retailers
        .ensure::<S::Error, _, _>(&retailer_ids, |wanted| async move {
          let found = self
            .retry
            .run(|| self.store.retailers_by_ids(&wanted))
            .await?;
          Ok(found.into_iter().map(|r| (r.retailer_id, r)).collect())
        })
        .await
        .map_err(Error::store)?;

      for obs in &page {
        report.processed += 1;
        match self.project(obs, &products, &retailers) {
          Projected::Row(rec) => {
            // Scan order is the key order, so the first row of each key
            // group wins and later duplicates drop here.
            if seen.insert(ProjectionKey::from(&rec)) {
              batch.push(rec);
            } else {
              report.duplicates += 1;
            }
          }
          Projected::Skip(reason) => {
            report.skipped += 1;
            tracing::debug!(price_id = obs.price_id, reason, "skipping observation");
          }
        }
      }

      while batch.len() >= self.config.batch_size {
        let chunk: Vec<_> =
          batch.drain(..self.config.batch_size).collect();
        report.succeeded += self.write_batch(&chunk).await?;
      }
    }

    if !batch.is_empty() {
      report.succeeded += self.write_batch(&batch).await?;
    }

    tracing::info!(
      run_id = %run_id,
      processed = report.processed,
      skipped = report.skipped,
      duplicates = report.duplicates,
      succeeded = report.succeeded,
      "reconciliation finished"
    );

    Ok(report)
  }

  /// The reconciler only runs against a fully classified run.
  async fn ensure_validated(&self, run_id: Uuid) -> Result<()> {
    let filter = ObservationFilter {
      run_id,
      classification: Some(Classification::Unclassified),
    };
    let unclassified = self
      .retry
      .run(|| self.store.count_observations(&filter))
      .await
      .map_err(Error::store)?;

    if unclassified > 0 {
      tracing::error!(run_id = %run_id, unclassified, "run not validated");
      return Err(Error::RunNotValidated(run_id));
    }
    Ok(())
  }

  /// Join one observation with its metadata, or name the reason it is
  /// unprojectable.
  fn project(
    &self,
    obs: &PriceObservation,
    products: &RefCache<i64, Product>,
    retailers: &RefCache<i64, Retailer>,
  ) -> Projected {
    // The valid-by-key scan guarantees these fields are present.
    let (Some(product_id), Some(retailer_id), Some(price)) =
      (obs.product_id, obs.retailer_id, obs.price)
    else {
      return Projected::Skip("missing key fields");
    };

    if price < self.config.projection_min_price
      || price > self.config.projection_max_price
    {
      return Projected::Skip("price out of projection range");
    }

    let Some(product) = products.get(&product_id) else {
      return Projected::Skip("unknown product");
    };
    let Some(retailer) = retailers.get(&retailer_id) else {
      return Projected::Skip("unknown retailer");
    };

    let product_url = match obs.source_url.as_deref() {
      None | Some("") => None,
      Some(raw) => match clean_url(raw) {
        Some(url) => Some(url),
        None => return Projected::Skip("invalid source url"),
      },
    };

    Projected::Row(ProjectionRecord {
      price_id: obs.price_id,
      run_id: obs.run_id,
      product_id,
      retailer_id,
      price,
      product_url,
      is_hot: obs.is_hot,
      hotness_score: obs.hotness_score,
      brand: product.brand.clone(),
      model: product.model.clone(),
      color_variant: product.color_variant.clone(),
      ram_variant: product.ram_variant.clone(),
      rom_variant: product.rom_variant.clone(),
      variant_rank: product.variant_rank,
      os: product.os.clone(),
      retailer_name: retailer.name.clone(),
    })
  }

  /// Upsert a batch; on a unique-constraint violation fall back to one row
  /// at a time so a single duplicate cannot sink its whole batch.
  async fn write_batch(&self, batch: &[ProjectionRecord]) -> Result<u64> {
    match self
      .retry
      .run(|| self.store.upsert_projection_batch(batch))
      .await
    {
      Ok(()) => Ok(batch.len() as u64),
      Err(err) if err.is_constraint_violation() => {
        tracing::warn!(
          batch_len = batch.len(),
          "constraint violation in batch, retrying row by row"
        );
        let mut written = 0;
        for rec in batch {
          match self
            .retry
            .run(|| self.store.insert_projection_row(rec))
            .await
          {
            Ok(()) => written += 1,
            Err(err) if err.is_constraint_violation() => {
              tracing::warn!(price_id = rec.price_id, "dropping duplicate projection row");
            }
            Err(err) => return Err(Error::store(err)),
          }
        }
        Ok(written)
      }
      Err(err) => Err(Error::store(err)),
    }
  }
}

enum Projected {
  Row(ProjectionRecord),
  Skip(&'static str),
}

/// Strip the query string and validate what remains.
///
/// Marketplace listing URLs carry volatile tracking parameters after `?`;
/// the projection stores the stable part only. Anything that then fails to
/// parse as an absolute http(s) URL with a host is rejected.
pub fn clean_url(raw: &str) -> Option<String> {
  let stripped = match raw.split_once('?') {
    Some((base, _)) => base,
    None => raw,
  };

  let parsed = url::Url::parse(stripped).ok()?;
  if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none()
  {
    return None;
  }
  Some(stripped.to_owned())
}
