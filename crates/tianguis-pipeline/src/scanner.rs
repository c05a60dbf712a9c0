//! Generic, retryable, cursor-driven page iteration.
//!
//! [`PaginatedScanner`] is the one scan loop every full-table consumer in the
//! pipeline shares. It pages with keyset cursors on a unique sort key rather
//! than limit/offset, so rows are never skipped or duplicated when the table
//! is written to mid-scan, and a run can resume from the last cursor after a
//! fault.

use std::future::Future;

use tianguis_core::{
  observation::PriceObservation,
  store::{KeyCursor, ObservationFilter, PriceStore, Transient},
};
use uuid::Uuid;

use crate::retry::RetryPolicy;

// ─── PageSource ──────────────────────────────────────────────────────────────

/// A filtered, ordered table view that can be read one page at a time.
///
/// `fetch` returns rows strictly after `after` in the source's ordering;
/// `cursor` extracts the resume point from a fetched row.
pub trait PageSource: Send + Sync {
  type Row: Send;
  type Cursor: Copy + Send;
  type Error: Transient + std::fmt::Display + Send;

  fn fetch(
    &self,
    after: Option<Self::Cursor>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Self::Row>, Self::Error>> + Send;

  fn cursor(&self, row: &Self::Row) -> Self::Cursor;
}

// ─── Scanner ─────────────────────────────────────────────────────────────────

/// Lazy, restartable page iterator over a [`PageSource`].
///
/// Each page fetch is wrapped in the retry policy. The scan terminates when
/// a fetch returns fewer rows than `page_size`.
pub struct PaginatedScanner<'a, S: PageSource> {
  source:    S,
  retry:     &'a RetryPolicy,
  page_size: usize,
  cursor:    Option<S::Cursor>,
  done:      bool,
}

impl<'a, S: PageSource> PaginatedScanner<'a, S> {
  pub fn new(source: S, retry: &'a RetryPolicy, page_size: usize) -> Self {
    Self { source, retry, page_size, cursor: None, done: false }
  }

  /// Fetch the next page, or `None` once the scan is exhausted.
  pub async fn next_page(&mut self) -> Result<Option<Vec<S::Row>>, S::Error> {
    if self.done {
      return Ok(None);
    }

    let cursor = self.cursor;
    let page = self
      .retry
      .run(|| self.source.fetch(cursor, self.page_size))
      .await?;

    if page.len() < self.page_size {
      self.done = true;
    }
    if let Some(last) = page.last() {
      self.cursor = Some(self.source.cursor(last));
    }

    if page.is_empty() { Ok(None) } else { Ok(Some(page)) }
  }
}

// ─── Store-backed sources ────────────────────────────────────────────────────

/// All observations matching a filter, ordered by `price_id`.
pub struct ObservationsById<'a, S> {
  store:  &'a S,
  filter: ObservationFilter,
}

impl<'a, S: PriceStore> ObservationsById<'a, S> {
  pub fn new(store: &'a S, filter: ObservationFilter) -> Self {
    Self { store, filter }
  }
}

impl<S: PriceStore> PageSource for ObservationsById<'_, S> {
  type Cursor = i64;
  type Error = S::Error;
  type Row = PriceObservation;

  async fn fetch(
    &self,
    after: Option<i64>,
    limit: usize,
  ) -> Result<Vec<PriceObservation>, S::Error> {
    self.store.observations_after(&self.filter, after, limit).await
  }

  fn cursor(&self, row: &PriceObservation) -> i64 { row.price_id }
}

/// Valid observations of one run, ordered by
/// (product_id, retailer_id, price, price_id) — the reconciliation scan.
pub struct ValidByKey<'a, S> {
  store:  &'a S,
  run_id: Uuid,
}

impl<'a, S: PriceStore> ValidByKey<'a, S> {
  pub fn new(store: &'a S, run_id: Uuid) -> Self { Self { store, run_id } }
}

impl<S: PriceStore> PageSource for ValidByKey<'_, S> {
  type Cursor = KeyCursor;
  type Error = S::Error;
  type Row = PriceObservation;

  async fn fetch(
    &self,
    after: Option<KeyCursor>,
    limit: usize,
  ) -> Result<Vec<PriceObservation>, S::Error> {
    self.store.valid_observations_after(self.run_id, after, limit).await
  }

  fn cursor(&self, row: &PriceObservation) -> KeyCursor {
    // Rows from this source always carry the full key; a row that somehow
    // does not would have been excluded by the store's NOT NULL filter.
    KeyCursor::from_observation(row).unwrap_or(KeyCursor {
      product_id:  i64::MAX,
      retailer_id: i64::MAX,
      price:       f64::MAX,
      price_id:    row.price_id,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
  };

  use super::*;

  #[derive(Debug, thiserror::Error)]
  #[error("flaky")]
  struct Flaky;

  impl Transient for Flaky {
    fn is_transient(&self) -> bool { true }
  }

  /// Rows 1..=n keyed by their own value; optionally fails the first
  /// `failures` fetches.
  struct Numbers {
    n:        i64,
    failures: AtomicUsize,
  }

  impl PageSource for Numbers {
    type Cursor = i64;
    type Error = Flaky;
    type Row = i64;

    async fn fetch(
      &self,
      after: Option<i64>,
      limit: usize,
    ) -> Result<Vec<i64>, Flaky> {
      if self
        .failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
          (f > 0).then(|| f - 1)
        })
        .is_ok()
      {
        return Err(Flaky);
      }
      let start = after.unwrap_or(0) + 1;
      Ok((start..=self.n).take(limit).collect())
    }

    fn cursor(&self, row: &i64) -> i64 { *row }
  }

  fn retry() -> RetryPolicy {
    RetryPolicy {
      max_attempts: 3,
      base_delay:   Duration::from_millis(1),
      max_delay:    Duration::from_millis(1),
    }
  }

  async fn collect(mut scanner: PaginatedScanner<'_, Numbers>) -> Vec<Vec<i64>> {
    let mut pages = Vec::new();
    while let Some(page) = scanner.next_page().await.unwrap() {
      pages.push(page);
    }
    pages
  }

  #[tokio::test]
  async fn yields_every_row_once_in_order() {
    let retry = retry();
    let source = Numbers { n: 7, failures: AtomicUsize::new(0) };
    let pages = collect(PaginatedScanner::new(source, &retry, 3)).await;

    assert_eq!(pages.len(), 3);
    let rows: Vec<i64> = pages.into_iter().flatten().collect();
    assert_eq!(rows, vec![1, 2, 3, 4, 5, 6, 7]);
  }

  #[tokio::test]
  async fn exact_multiple_terminates_on_empty_page() {
    let retry = retry();
    let source = Numbers { n: 6, failures: AtomicUsize::new(0) };
    let pages = collect(PaginatedScanner::new(source, &retry, 3)).await;

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[1], vec![4, 5, 6]);
  }

  #[tokio::test]
  async fn empty_source_yields_no_pages() {
    let retry = retry();
    let source = Numbers { n: 0, failures: AtomicUsize::new(0) };
    let pages = collect(PaginatedScanner::new(source, &retry, 3)).await;
    assert!(pages.is_empty());
  }

  #[tokio::test]
  async fn transient_fetch_failures_are_retried() {
    let retry = retry();
    let source = Numbers { n: 4, failures: AtomicUsize::new(2) };
    let pages = collect(PaginatedScanner::new(source, &retry, 10)).await;
    assert_eq!(pages, vec![vec![1, 2, 3, 4]]);
  }
}
