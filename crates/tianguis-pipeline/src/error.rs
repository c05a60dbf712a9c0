//! Error type for `tianguis-pipeline`.

use thiserror::Error;
use tianguis_core::store::StoreError;
use uuid::Uuid;

use crate::ingest::SearchError;

#[derive(Debug, Error)]
pub enum Error {
  /// The runs table is empty; there is nothing to process.
  #[error("no runs found")]
  NoRunsFound,

  /// Reconciliation was requested for a run the validator has not finished
  /// classifying.
  #[error("run {0} has unclassified observations; validate it first")]
  RunNotValidated(Uuid),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("search error: {0}")]
  Search(#[from] SearchError),
}

impl Error {
  /// Box a backend error into the store variant.
  pub fn store<E: StoreError>(err: E) -> Self { Self::Store(Box::new(err)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
