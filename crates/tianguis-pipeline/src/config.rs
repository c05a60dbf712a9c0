//! Pipeline configuration.
//!
//! One explicit struct passed by reference into every component; there are
//! no module-level threshold constants and no global store handle.

use std::time::Duration;

use serde::Deserialize;

/// Tunables for a pipeline cycle. The defaults mirror production settings
/// for the MXN smartphone marketplace.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// Currency the absolute bounds apply to; observations in any other
  /// currency are exempt from the bounds check.
  pub currency: String,

  /// Validator: absolute lower price bound (same currency only).
  pub min_price_threshold: f64,
  /// Validator: absolute upper price bound (same currency only).
  pub max_price_threshold: f64,

  /// Scorer: minimum eligible observations per product group.
  pub min_top_prices:         usize,
  /// Scorer: a price is hot when strictly below `avg_top5 * price_threshold`.
  pub price_threshold:        f64,
  /// Scorer: minimum distinct retailers among the top-5 cheapest.
  pub min_unique_retailers:   usize,
  /// Scorer: minimum VERIFIED retailers among the top-5 cheapest.
  pub min_verified_retailers: usize,

  /// Reconciler: projection-side price validity range.
  pub projection_min_price: f64,
  pub projection_max_price: f64,
  /// Reconciler: source URLs are truncated to this length at ingestion.
  pub max_url_len:          usize,

  /// Rows per store read page.
  pub page_size:  usize,
  /// Rows per store write batch.
  pub batch_size: usize,

  /// Retry budget for store and search calls.
  pub max_retries: usize,
  /// First backoff delay; doubles per attempt.
  #[serde(with = "duration_secs")]
  pub retry_base_delay: Duration,
  /// Backoff cap.
  #[serde(with = "duration_secs")]
  pub retry_max_delay: Duration,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      currency:               "MXN".into(),
      min_price_threshold:    1_000.0,
      max_price_threshold:    60_000.0,
      min_top_prices:         5,
      price_threshold:        0.85,
      min_unique_retailers:   2,
      min_verified_retailers: 1,
      projection_min_price:   0.0,
      projection_max_price:   100_000.0,
      max_url_len:            255,
      page_size:              1_000,
      batch_size:             100,
      max_retries:            3,
      retry_base_delay:       Duration::from_secs(1),
      retry_max_delay:        Duration::from_secs(30),
    }
  }
}

/// Serde shim: durations are expressed in whole seconds in config files.
mod duration_secs {
  use std::time::Duration;

  use serde::{Deserialize as _, Deserializer};

  pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
  where
    D: Deserializer<'de>,
  {
    u64::deserialize(deserializer).map(Duration::from_secs)
  }
}
