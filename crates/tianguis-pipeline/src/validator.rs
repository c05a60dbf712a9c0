//! Ordered, exhaustive observation classification.
//!
//! Checks run in strict order and the first match wins: null fields, then
//! absolute price bounds, then relative deviation from the product's median
//! window. Every observation of the run ends in exactly one terminal state —
//! anything no check flags is explicitly marked `Valid`.

use std::collections::{HashMap, HashSet};

use tianguis_core::{
  observation::Classification,
  store::{ObservationFilter, PriceStore},
};
use uuid::Uuid;

use crate::{
  config::PipelineConfig,
  retry::RetryPolicy,
  scanner::{ObservationsById, PaginatedScanner},
  Error, Result,
};

// ─── Report ──────────────────────────────────────────────────────────────────

/// Per-terminal-state counters for one classification pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ValidationReport {
  pub total:          u64,
  pub null_price:     u64,
  pub null_reference: u64,
  pub extreme_price:  u64,
  pub too_low:        u64,
  pub too_high:       u64,
  pub valid:          u64,
}

impl ValidationReport {
  /// Sum of all terminal states; equals `total` iff the pass was exhaustive.
  pub fn classified(&self) -> u64 {
    self.null_price
      + self.null_reference
      + self.extreme_price
      + self.too_low
      + self.too_high
      + self.valid
  }
}

// ─── Validator ───────────────────────────────────────────────────────────────

/// Classifies every observation of a run. See the module docs for pass order.
pub struct Validator<'a, S> {
  store:  &'a S,
  config: &'a PipelineConfig,
  retry:  &'a RetryPolicy,
}

/// A bounds-surviving observation waiting for the deviation check.
struct Survivor {
  price_id: i64,
  price:    f64,
}

impl<'a, S: PriceStore> Validator<'a, S> {
  pub fn new(
    store: &'a S,
    config: &'a PipelineConfig,
    retry: &'a RetryPolicy,
  ) -> Self {
    Self { store, config, retry }
  }

  /// Run the full classification state machine over `run_id`.
  ///
  /// Reclassifying an already-classified run is redundant but safe: every
  /// state is recomputed from the raw fields.
  pub async fn classify_run(&self, run_id: Uuid) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    let mut pending: Vec<(i64, Classification)> = Vec::new();
    let mut all_ids: Vec<i64> = Vec::new();
    let mut flagged: HashSet<i64> = HashSet::new();
    // Bounds survivors per product; pass 3 needs each group fully
    // materialised because the median window spans the whole sorted group.
    let mut groups: HashMap<i64, Vec<Survivor>> = HashMap::new();

    // Passes 1 and 2: null fields and absolute bounds, streamed page-wise.
    let filter = ObservationFilter { run_id, classification: None };
    let mut scanner = PaginatedScanner::new(
      ObservationsById::new(self.store, filter),
      self.retry,
      self.config.page_size,
    );

    while let Some(page) = scanner.next_page().await.map_err(Error::store)? {
      for obs in &page {
        report.total += 1;
        all_ids.push(obs.price_id);

        let price = match obs.price {
          None => {
            report.null_price += 1;
            flagged.insert(obs.price_id);
            pending.push((obs.price_id, Classification::NullPrice));
            continue;
          }
          Some(p) => p,
        };

        let (Some(product_id), Some(_)) = (obs.product_id, obs.retailer_id)
        else {
          report.null_reference += 1;
          flagged.insert(obs.price_id);
          pending.push((obs.price_id, Classification::NullReference));
          continue;
        };

        // Bounds only apply within the configured currency; foreign-currency
        // observations are exempt and skip the deviation check too.
        if obs.currency != self.config.currency {
          continue;
        }

        if price < self.config.min_price_threshold
          || price > self.config.max_price_threshold
        {
          report.extreme_price += 1;
          flagged.insert(obs.price_id);
          pending.push((obs.price_id, Classification::ExtremePrice));
          continue;
        }

        groups
          .entry(product_id)
          .or_default()
          .push(Survivor { price_id: obs.price_id, price });
      }
      self.flush(&mut pending, false).await?;
    }

    // Pass 3: relative deviation per product group.
    for (product_id, group) in &mut groups {
      if group.len() < self.config.min_top_prices {
        // Exempt: too few survivors for a meaningful median window.
        continue;
      }
      group.sort_by(|a, b| {
        a.price
          .partial_cmp(&b.price)
          .unwrap_or(std::cmp::Ordering::Equal)
          .then(a.price_id.cmp(&b.price_id))
      });

      let (start, end) = median_window_bounds(group.len());
      let window = &group[start..end];
      let reference_avg =
        window.iter().map(|s| s.price).sum::<f64>() / window.len() as f64;
      let min_allowed = reference_avg * 0.5;
      let max_allowed = reference_avg * 2.0;

      tracing::debug!(
        product_id,
        reference_avg,
        min_allowed,
        max_allowed,
        group_size = group.len(),
        "deviation check"
      );

      for survivor in group.iter() {
        // Bounds are inclusive: a price exactly at either limit passes.
        let class = if survivor.price < min_allowed {
          Classification::TooLow
        } else if survivor.price > max_allowed {
          Classification::TooHigh
        } else {
          continue;
        };

        match class {
          Classification::TooLow => report.too_low += 1,
          _ => report.too_high += 1,
        }
        flagged.insert(survivor.price_id);
        pending.push((survivor.price_id, class));
      }
      self.flush(&mut pending, false).await?;
    }

    // Pass 4: everything unflagged is explicitly Valid.
    for price_id in &all_ids {
      if !flagged.contains(price_id) {
        report.valid += 1;
        pending.push((*price_id, Classification::Valid));
      }
    }
    self.flush(&mut pending, true).await?;

    tracing::info!(
      run_id = %run_id,
      total = report.total,
      null_price = report.null_price,
      null_reference = report.null_reference,
      extreme_price = report.extreme_price,
      too_low = report.too_low,
      too_high = report.too_high,
      valid = report.valid,
      "classification finished"
    );

    Ok(report)
  }

  /// Write pending classifications once a full batch has accumulated, or
  /// unconditionally when `force` is set.
  async fn flush(
    &self,
    pending: &mut Vec<(i64, Classification)>,
    force: bool,
  ) -> Result<()> {
    while pending.len() >= self.config.batch_size
      || (force && !pending.is_empty())
    {
      let take = pending.len().min(self.config.batch_size);
      let batch: Vec<_> = pending.drain(..take).collect();
      self
        .retry
        .run(|| self.store.update_classifications(&batch))
        .await
        .map_err(Error::store)?;
    }
    Ok(())
  }
}

/// Window of 5 prices centred on the median, clipped to the group bounds.
/// Always spans exactly 5 elements when `n >= 5`.
fn median_window_bounds(n: usize) -> (usize, usize) {
  let mid = n / 2;
  let mut start = mid.saturating_sub(2);
  let end = (start + 5).min(n);
  if end - start < 5 && start > 0 {
    start = end.saturating_sub(5);
  }
  (start, end)
}

#[cfg(test)]
mod tests {
  use super::median_window_bounds;

  #[test]
  fn window_is_centred_for_odd_sizes() {
    // n=5: mid=2, window covers everything.
    assert_eq!(median_window_bounds(5), (0, 5));
    // n=9: mid=4, two on each side.
    assert_eq!(median_window_bounds(9), (2, 7));
  }

  #[test]
  fn window_clips_at_the_front() {
    // n=6: mid=3, start=1.
    assert_eq!(median_window_bounds(6), (1, 6));
  }

  #[test]
  fn window_always_spans_five_when_possible() {
    for n in 5..60 {
      let (start, end) = median_window_bounds(n);
      assert_eq!(end - start, 5, "n={n}");
      assert!(end <= n);
    }
  }
}
