//! Price observations — the fundamental unit of the pipeline.
//!
//! An observation is one scraped (product, retailer, price) sighting within a
//! run. Ingestion creates observations; the validator assigns each one a
//! terminal classification; the hotness scorer sets the hot fields.
//! Observations are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

// ─── Classification ──────────────────────────────────────────────────────────

/// Terminal validation state of an observation.
///
/// Every observation starts `Unclassified` and ends in exactly one of the
/// other states after the validator has run. The validator is exhaustive:
/// an observation that trips no check is explicitly marked `Valid`, never
/// left `Unclassified`.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Display,
  EnumString,
  Serialize,
  Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Classification {
  #[default]
  Unclassified,
  /// The price field itself is missing.
  NullPrice,
  /// retailer_id or product_id is missing.
  NullReference,
  /// Outside the absolute same-currency price bounds.
  ExtremePrice,
  /// Below half of the product's median-window reference average.
  TooLow,
  /// Above twice the product's median-window reference average.
  TooHigh,
  Valid,
}

impl Classification {
  pub fn is_terminal(self) -> bool { self != Self::Unclassified }

  pub fn is_valid(self) -> bool { self == Self::Valid }
}

// ─── PriceObservation ────────────────────────────────────────────────────────

/// A persisted per-run price sighting.
///
/// `product_id`, `retailer_id`, and `price` are optional because ingestion
/// stores whatever the scrape produced; the validator turns missing fields
/// into `NullPrice` / `NullReference` classifications instead of dropping
/// the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
  pub price_id:       i64,
  pub run_id:         Uuid,
  pub product_id:     Option<i64>,
  pub retailer_id:    Option<i64>,
  pub price:          Option<f64>,
  pub currency:       String,
  pub classification: Classification,
  pub is_hot:         bool,
  pub hotness_score:  Option<f64>,
  pub source_url:     Option<String>,
  pub recorded_at:    DateTime<Utc>,
}

// ─── NewObservation ──────────────────────────────────────────────────────────

/// Input to [`crate::store::PriceStore::insert_observations`].
/// `price_id` and `recorded_at` are assigned by the store; classification and
/// hot fields always start at their defaults.
#[derive(Debug, Clone)]
pub struct NewObservation {
  pub run_id:      Uuid,
  pub product_id:  Option<i64>,
  pub retailer_id: Option<i64>,
  pub price:       Option<f64>,
  pub currency:    String,
  pub source_url:  Option<String>,
}

/// A hot-flag write produced by the scorer: sets `is_hot = true` and the
/// given score on one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HotMark {
  pub price_id: i64,
  /// Percentage discount below the top-5 average, rounded to 2 decimals.
  pub score:    f64,
}
