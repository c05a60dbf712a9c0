//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, UUIDs as hyphenated lowercase
//! strings, and enums as their strum text forms.

use std::str::FromStr as _;

use chrono::{DateTime, Utc};
use tianguis_core::{
  catalog::{Condition, Product, Retailer, RelevanceTier},
  observation::{Classification, PriceObservation},
  projection::ProjectionRecord,
  run::Run,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

// Fixed precision so the stored strings order lexicographically.
pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_classification(s: &str) -> Result<Classification> {
  Classification::from_str(s)
    .map_err(|_| Error::Core(tianguis_core::Error::UnknownClassification(s.to_owned())))
}

pub fn decode_tier(s: &str) -> Result<RelevanceTier> {
  RelevanceTier::from_str(s)
    .map_err(|_| Error::Core(tianguis_core::Error::UnknownTier(s.to_owned())))
}

pub fn decode_condition(s: &str) -> Result<Condition> {
  Condition::from_str(s)
    .map_err(|_| Error::Core(tianguis_core::Error::UnknownCondition(s.to_owned())))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `runs` row.
pub struct RawRun {
  pub run_id:     String,
  pub started_at: String,
}

impl RawRun {
  pub fn into_run(self) -> Result<Run> {
    Ok(Run {
      run_id:     decode_uuid(&self.run_id)?,
      started_at: decode_dt(&self.started_at)?,
    })
  }
}

/// Raw values read directly from a `prices` row.
pub struct RawObservation {
  pub price_id:       i64,
  pub run_id:         String,
  pub product_id:     Option<i64>,
  pub retailer_id:    Option<i64>,
  pub price:          Option<f64>,
  pub currency:       String,
  pub classification: String,
  pub is_hot:         bool,
  pub hotness_score:  Option<f64>,
  pub source_url:     Option<String>,
  pub recorded_at:    String,
}

impl RawObservation {
  pub fn into_observation(self) -> Result<PriceObservation> {
    Ok(PriceObservation {
      price_id:       self.price_id,
      run_id:         decode_uuid(&self.run_id)?,
      product_id:     self.product_id,
      retailer_id:    self.retailer_id,
      price:          self.price,
      currency:       self.currency,
      classification: decode_classification(&self.classification)?,
      is_hot:         self.is_hot,
      hotness_score:  self.hotness_score,
      source_url:     self.source_url,
      recorded_at:    decode_dt(&self.recorded_at)?,
    })
  }
}

/// Raw values read directly from a `products` row.
pub struct RawProduct {
  pub product_id:    i64,
  pub brand:         String,
  pub model:         String,
  pub color_variant: Option<String>,
  pub ram_variant:   Option<String>,
  pub rom_variant:   Option<String>,
  pub variant_rank:  Option<i64>,
  pub os:            Option<String>,
  pub condition:     String,
  pub search_query:  String,
  pub is_active:     bool,
}

impl RawProduct {
  pub fn into_product(self) -> Result<Product> {
    Ok(Product {
      product_id:    self.product_id,
      brand:         self.brand,
      model:         self.model,
      color_variant: self.color_variant,
      ram_variant:   self.ram_variant,
      rom_variant:   self.rom_variant,
      variant_rank:  self.variant_rank,
      os:            self.os,
      condition:     decode_condition(&self.condition)?,
      search_query:  self.search_query,
      is_active:     self.is_active,
    })
  }
}

/// Raw values read directly from a `retailers` row.
pub struct RawRetailer {
  pub retailer_id: i64,
  pub name:        String,
  pub tier:        String,
  pub created_at:  String,
}

impl RawRetailer {
  pub fn into_retailer(self) -> Result<Retailer> {
    Ok(Retailer {
      retailer_id: self.retailer_id,
      name:        self.name,
      tier:        decode_tier(&self.tier)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

/// Raw values read directly from a `projection` row.
pub struct RawProjection {
  pub price_id:      i64,
  pub run_id:        String,
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

impl RawProjection {
  pub fn into_record(self) -> Result<ProjectionRecord> {
    Ok(ProjectionRecord {
      price_id:      self.price_id,
      run_id:        decode_uuid(&self.run_id)?,
      product_id:    self.product_id,
      retailer_id:   self.retailer_id,
      price:         self.price,
      product_url:   self.product_url,
      is_hot:        self.is_hot,
      hotness_score: self.hotness_score,
      brand:         self.brand,
      model:         self.model,
      color_variant: self.color_variant,
      ram_variant:   self.ram_variant,
      rom_variant:   self.rom_variant,
      variant_rank:  self.variant_rank,
      os:            self.os,
      retailer_name: self.retailer_name,
    })
  }
}
