//! Ingestion: turn marketplace search results into observation rows.
//!
//! One ingestion cycle opens a new run, searches the marketplace for every
//! active product, and appends whatever came back as raw observations.
//! Ingestion deliberately stores incomplete rows (missing price, missing
//! references) instead of dropping them — classification is the validator's
//! job, not ours.

use std::collections::HashMap;

use tianguis_core::{
  catalog::{Condition, Product, RelevanceTier},
  observation::NewObservation,
  store::{PriceStore, Transient},
};
use thiserror::Error;
use uuid::Uuid;

use crate::{config::PipelineConfig, retry::RetryPolicy, Error, Result};

// ─── Search client ───────────────────────────────────────────────────────────

/// Failure modes of a marketplace search backend.
#[derive(Debug, Error)]
pub enum SearchError {
  /// Timeouts, rate limits, dropped connections. Worth retrying.
  #[error("transient search failure: {0}")]
  Transient(String),

  /// Malformed responses, auth failures, anything a retry will not fix.
  #[error("search failed: {0}")]
  Fatal(String),
}

impl Transient for SearchError {
  fn is_transient(&self) -> bool { matches!(self, Self::Transient(_)) }
}

/// One marketplace listing as returned by a search, before any validation.
#[derive(Debug, Clone, Default)]
pub struct RawListing {
  /// Seller name as the marketplace reports it.
  pub source:   String,
  pub title:    String,
  pub price:    Option<f64>,
  pub currency: Option<String>,
  pub url:      Option<String>,
}

/// A marketplace search backend.
pub trait SearchClient: Send + Sync {
  fn search(
    &self,
    query: &str,
  ) -> impl Future<Output = Result<Vec<RawListing>, SearchError>> + Send;
}

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
  pub run_id:        Option<Uuid>,
  /// Active products searched.
  pub products:      u64,
  /// Listings returned across all searches.
  pub listings:      u64,
  /// Observations inserted.
  pub inserted:      u64,
  /// Listings dropped before insertion.
  pub skipped:       u64,
  /// Previously unseen retailers registered this cycle.
  pub new_retailers: u64,
}

// ─── Ingestor ────────────────────────────────────────────────────────────────

/// Titles containing any of these are second-hand stock; they are dropped
/// when the product is tracked as new.
const USED_MARKERS: &[&str] =
  &["usado", "used", "refurbished", "reacondicionado"];

pub struct Ingestor<'a, S, C> {
  store:  &'a S,
  client: &'a C,
  config: &'a PipelineConfig,
  retry:  &'a RetryPolicy,
}

impl<'a, S: PriceStore, C: SearchClient> Ingestor<'a, S, C> {
  pub fn new(
    store: &'a S,
    client: &'a C,
    config: &'a PipelineConfig,
    retry: &'a RetryPolicy,
  ) -> Self {
    Self { store, client, config, retry }
  }

  /// Open a new run and fill it with observations for every active product.
  pub async fn ingest_cycle(&self) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    let run = self
      .retry
      .run(|| self.store.begin_run())
      .await
      .map_err(Error::store)?;
    report.run_id = Some(run.run_id);
    tracing::info!(run_id = %run.run_id, "ingestion run opened");

    // Retailer lookup is by marketplace seller name, case-insensitively.
    let mut retailers: HashMap<String, i64> = self
      .retry
      .run(|| self.store.list_retailers())
      .await
      .map_err(Error::store)?
      .into_iter()
      .map(|r| (r.name.to_lowercase(), r.retailer_id))
      .collect();

    let products = self
      .retry
      .run(|| self.store.active_products())
      .await
      .map_err(Error::store)?;

    let mut batch: Vec<NewObservation> = Vec::new();
    for product in &products {
      report.products += 1;

      let listings = self
        .retry
        .run(|| self.client.search(&product.search_query))
        .await?;
      report.listings += listings.len() as u64;

      for listing in listings {
        match self
          .observation(run.run_id, product, &listing, &mut retailers, &mut report)
          .await?
        {
          Some(obs) => batch.push(obs),
          None => report.skipped += 1,
        }

        if batch.len() >= self.config.batch_size {
          report.inserted += self.insert(std::mem::take(&mut batch)).await?;
        }
      }
    }

    if !batch.is_empty() {
      report.inserted += self.insert(batch).await?;
    }

    tracing::info!(
      run_id = %run.run_id,
      products = report.products,
      listings = report.listings,
      inserted = report.inserted,
      skipped = report.skipped,
      new_retailers = report.new_retailers,
      "ingestion finished"
    );

    Ok(report)
  }

  /// Convert one listing, registering its retailer if unseen. `None` means
  /// the listing is dropped.
  async fn observation(
    &self,
    run_id: Uuid,
    product: &Product,
    listing: &RawListing,
    retailers: &mut HashMap<String, i64>,
    report: &mut IngestReport,
  ) -> Result<Option<NewObservation>> {
    let source = listing.source.trim();
    if source.is_empty() {
      tracing::debug!(title = %listing.title, "listing without a seller name");
      return Ok(None);
    }

    if matches!(listing.price, Some(p) if p <= 0.0) {
      return Ok(None);
    }

    // A "used" listing of a product tracked as new is a different product.
    if product.condition == Condition::New {
      let title = listing.title.to_lowercase();
      if USED_MARKERS.iter().any(|m| title.contains(m)) {
        return Ok(None);
      }
    }

    let key = source.to_lowercase();
    let retailer_id = match retailers.get(&key) {
      Some(id) => *id,
      None => {
        // First sighting: new sellers start untrusted.
        let retailer = self
          .retry
          .run(|| self.store.insert_retailer(source, RelevanceTier::Suspicious))
          .await
          .map_err(Error::store)?;
        tracing::info!(retailer = source, "registered new retailer");
        report.new_retailers += 1;
        retailers.insert(key, retailer.retailer_id);
        retailer.retailer_id
      }
    };

    Ok(Some(NewObservation {
      run_id,
      product_id: Some(product.product_id),
      retailer_id: Some(retailer_id),
      price: listing.price,
      currency: listing
        .currency
        .clone()
        .unwrap_or_else(|| self.config.currency.clone()),
      source_url: listing
        .url
        .as_deref()
        .map(|u| truncate_url(u, self.config.max_url_len)),
    }))
  }

  async fn insert(&self, batch: Vec<NewObservation>) -> Result<u64> {
    // The store takes the batch by value; a retried attempt needs its own.
    self
      .retry
      .run(|| self.store.insert_observations(batch.clone()))
      .await
      .map_err(Error::store)
  }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
fn truncate_url(url: &str, max: usize) -> String {
  if url.len() <= max {
    return url.to_owned();
  }
  let mut end = max;
  while !url.is_char_boundary(end) {
    end -= 1;
  }
  url[..end].to_owned()
}
