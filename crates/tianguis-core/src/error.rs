//! Error types for `tianguis-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown classification: {0:?}")]
  UnknownClassification(String),

  #[error("unknown relevance tier: {0:?}")]
  UnknownTier(String),

  #[error("unknown product condition: {0:?}")]
  UnknownCondition(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
