//! The denormalized projection record — the read-optimized output of the
//! pipeline.
//!
//! The projection table is rebuilt from scratch every reconcile cycle and
//! must only ever contain rows for the single active run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One denormalized row of the projection table.
///
/// Joins an observation with its product and retailer metadata so read-side
/// consumers never touch the raw tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRecord {
  pub price_id:      i64,
  pub run_id:        Uuid,
  pub product_id:    i64,
  pub retailer_id:   i64,
  pub price:         f64,
  pub product_url:   Option<String>,
  pub is_hot:        bool,
  pub hotness_score: Option<f64>,
  pub brand:         String,
  pub model:         String,
  pub color_variant: Option<String>,
  pub ram_variant:   Option<String>,
  pub rom_variant:   Option<String>,
  pub variant_rank:  Option<i64>,
  pub os:            Option<String>,
  pub retailer_name: String,
}

/// Composite dedup key: at most one projection row may exist per
/// (product, retailer, price) triple within a run.
///
/// Prices are keyed by their bit pattern so the key is `Eq + Hash`; two
/// prices dedup together iff they are bit-identical, which is exactly the
/// equality the unique index in the store enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectionKey {
  pub product_id:  i64,
  pub retailer_id: i64,
  price_bits:      u64,
}

impl ProjectionKey {
  pub fn new(product_id: i64, retailer_id: i64, price: f64) -> Self {
    Self { product_id, retailer_id, price_bits: price.to_bits() }
  }
}

impl From<&ProjectionRecord> for ProjectionKey {
  fn from(rec: &ProjectionRecord) -> Self {
    Self::new(rec.product_id, rec.retailer_id, rec.price)
  }
}
