//! Per-product hot-deal detection over validated, trusted observations.
//!
//! A full stateless recompute per cycle: hot fields for the run are reset,
//! then every product group with enough eligible observations is scored
//! against its top-5-cheapest average.

use std::collections::{HashMap, HashSet};

use tianguis_core::{
  catalog::{RelevanceTier, Retailer},
  observation::{Classification, HotMark},
  store::{ObservationFilter, PriceStore},
};
use uuid::Uuid;

use crate::{
  cache::RefCache,
  config::PipelineConfig,
  retry::RetryPolicy,
  scanner::{ObservationsById, PaginatedScanner},
  Error, Result,
};

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HotnessReport {
  /// Hot fields cleared during the reset step.
  pub reset:        u64,
  /// Valid, trusted-tier observations considered.
  pub eligible:     u64,
  /// Product groups with enough observations to be scored.
  pub groups:       u64,
  /// Groups whose retailer-diversity gate opened.
  pub gated_open:   u64,
  /// Observations marked hot.
  pub marked:       u64,
}

// ─── Scorer ──────────────────────────────────────────────────────────────────

/// An eligible observation within a product group.
struct Candidate {
  price_id:    i64,
  retailer_id: i64,
  tier:        RelevanceTier,
  price:       f64,
}

/// Marks discounted observations of the active run. Only touches the
/// observation table — never the projection.
pub struct HotnessScorer<'a, S> {
  store:  &'a S,
  config: &'a PipelineConfig,
  retry:  &'a RetryPolicy,
}

impl<'a, S: PriceStore> HotnessScorer<'a, S> {
  pub fn new(
    store: &'a S,
    config: &'a PipelineConfig,
    retry: &'a RetryPolicy,
  ) -> Self {
    Self { store, config, retry }
  }

  /// Reset and recompute hot marks for every product of `run_id`.
  pub async fn score_run(&self, run_id: Uuid) -> Result<HotnessReport> {
    let mut report = HotnessReport::default();

    report.reset = self
      .retry
      .run(|| self.store.reset_hot_fields(run_id))
      .await
      .map_err(Error::store)?;

    // Collect eligible candidates grouped by product. Groups must be fully
    // materialised: the top-5 average depends on the whole group.
    let mut retailers: RefCache<i64, Retailer> = RefCache::new();
    let mut groups: HashMap<i64, Vec<Candidate>> = HashMap::new();

    let filter = ObservationFilter {
      run_id,
      classification: Some(Classification::Valid),
    };
    let mut scanner = PaginatedScanner::new(
      ObservationsById::new(self.store, filter),
      self.retry,
      self.config.page_size,
    );

    while let Some(page) = scanner.next_page().await.map_err(Error::store)? {
      let ids: Vec<i64> =
        page.iter().filter_map(|o| o.retailer_id).collect();
      retailers
        .ensure::<S::Error, _, _>(&ids, |wanted| async move {
          let found = self
            .retry
            .run(|| self.store.retailers_by_ids(&wanted))
            .await?;
          Ok(found.into_iter().map(|r| (r.retailer_id, r)).collect())
        })
        .await
        .map_err(Error::store)?;

      for obs in &page {
        let (Some(product_id), Some(retailer_id), Some(price)) =
          (obs.product_id, obs.retailer_id, obs.price)
        else {
          continue;
        };
        if price <= 0.0 {
          tracing::warn!(price_id = obs.price_id, price, "skipping non-positive price");
          continue;
        }
        let Some(retailer) = retailers.get(&retailer_id) else {
          continue;
        };
        if !retailer.tier.is_trusted() {
          continue;
        }

        report.eligible += 1;
        groups.entry(product_id).or_default().push(Candidate {
          price_id: obs.price_id,
          retailer_id,
          tier: retailer.tier,
          price,
        });
      }
    }

    // Score each sufficiently large group.
    let mut marks: Vec<HotMark> = Vec::new();
    for (product_id, mut group) in groups {
      if group.len() < self.config.min_top_prices {
        continue;
      }
      report.groups += 1;

      group.sort_by(|a, b| {
        a.price
          .partial_cmp(&b.price)
          .unwrap_or(std::cmp::Ordering::Equal)
          .then(a.price_id.cmp(&b.price_id))
      });
      let top5 = &group[..self.config.min_top_prices];
      let avg_top5 =
        top5.iter().map(|c| c.price).sum::<f64>() / top5.len() as f64;

      let unique_retailers: HashSet<i64> =
        top5.iter().map(|c| c.retailer_id).collect();
      let verified = top5
        .iter()
        .filter(|c| c.tier == RelevanceTier::Verified)
        .count();

      if unique_retailers.len() < self.config.min_unique_retailers
        || verified < self.config.min_verified_retailers
      {
        tracing::debug!(
          product_id,
          unique = unique_retailers.len(),
          verified,
          "hotness gate closed"
        );
        continue;
      }
      report.gated_open += 1;

      // Gate open: every eligible observation in the group competes, not
      // only the top 5. Strictly below the threshold counts as hot.
      let threshold = avg_top5 * self.config.price_threshold;
      for candidate in &group {
        if candidate.price < threshold {
          let score =
            round2((avg_top5 - candidate.price) / avg_top5 * 100.0);
          marks.push(HotMark { price_id: candidate.price_id, score });
        }
      }
    }

    report.marked = marks.len() as u64;
    for chunk in marks.chunks(self.config.batch_size) {
      self
        .retry
        .run(|| self.store.mark_hot(chunk))
        .await
        .map_err(Error::store)?;
    }

    tracing::info!(
      run_id = %run_id,
      eligible = report.eligible,
      groups = report.groups,
      gated_open = report.gated_open,
      marked = report.marked,
      "hotness scoring finished"
    );

    Ok(report)
  }
}

/// Round to 2 decimal places — the persisted hotness-score precision.
fn round2(x: f64) -> f64 { (x * 100.0).round() / 100.0 }
