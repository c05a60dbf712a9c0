//! Reference data: products and retailers.
//!
//! Both tables are immutable as far as the pipeline is concerned — the only
//! write is ingestion registering a previously unseen retailer, which always
//! starts in the `Suspicious` tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ─── Products ────────────────────────────────────────────────────────────────

/// Whether a product is tracked as new or second-hand stock.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Condition {
  New,
  Used,
}

/// A catalogued device variant. Display and variant attributes are carried
/// verbatim into the projection table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
  pub product_id:    i64,
  pub brand:         String,
  pub model:         String,
  pub color_variant: Option<String>,
  pub ram_variant:   Option<String>,
  pub rom_variant:   Option<String>,
  pub variant_rank:  Option<i64>,
  pub os:            Option<String>,
  pub condition:     Condition,
  /// Marketplace query used to fetch listings for this product.
  pub search_query:  String,
  pub is_active:     bool,
}

// ─── Retailers ───────────────────────────────────────────────────────────────

/// Trust classification of a retailer.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RelevanceTier {
  Verified,
  Active,
  Suspicious,
  Unknown,
}

impl RelevanceTier {
  /// Tiers whose observations are eligible for hotness scoring.
  pub fn is_trusted(self) -> bool {
    matches!(self, Self::Verified | Self::Active)
  }
}

/// A marketplace seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retailer {
  pub retailer_id: i64,
  pub name:        String,
  pub tier:        RelevanceTier,
  pub created_at:  DateTime<Utc>,
}
