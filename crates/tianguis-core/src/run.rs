//! Run — one ingestion pass over the marketplace.
//!
//! A run is an opaque UUID plus the timestamp at which it started. The run
//! with the most recent `started_at` is the *active* run, and is the only
//! run the projection table may ever reflect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single ingestion pass. Created once at ingestion time, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Run {
  pub run_id:     Uuid,
  pub started_at: DateTime<Utc>,
}
