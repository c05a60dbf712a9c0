//! Error type for `tianguis-store-sqlite`.

use rusqlite::ErrorCode;
use thiserror::Error;
use tianguis_core::store::{StoreError, Transient};

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tianguis_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),
}

impl Error {
  fn sqlite_code(&self) -> Option<ErrorCode> {
    match self {
      Error::Database(tokio_rusqlite::Error::Rusqlite(
        rusqlite::Error::SqliteFailure(e, _),
      )) => Some(e.code),
      _ => None,
    }
  }
}

impl Transient for Error {
  fn is_transient(&self) -> bool {
    matches!(
      self.sqlite_code(),
      Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
  }
}

impl StoreError for Error {
  fn is_constraint_violation(&self) -> bool {
    matches!(self.sqlite_code(), Some(ErrorCode::ConstraintViolation))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
