//! The Tianguis price pipeline: validation, hotness scoring, and
//! reconciliation over any [`tianguis_core::store::PriceStore`].
//!
//! One pipeline cycle is strictly staged: the [`Validator`] assigns every
//! observation of the active run a terminal classification, the
//! [`HotnessScorer`] recomputes discount marks over the valid, trusted
//! observations, and the [`Reconciler`] rebuilds the projection table from
//! the result. Each stage consumes the previous stage's committed output,
//! so the stages never interleave.

pub mod cache;
pub mod config;
pub mod error;
pub mod hotness;
pub mod ingest;
pub mod reconciler;
pub mod registry;
pub mod retry;
pub mod scanner;
pub mod validator;

mod orchestrator;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use hotness::{HotnessReport, HotnessScorer};
pub use ingest::{IngestReport, Ingestor, RawListing, SearchClient, SearchError};
pub use orchestrator::{Pipeline, PipelineReport};
pub use reconciler::{ReconcileReport, Reconciler};
pub use registry::RunRegistry;
pub use retry::RetryPolicy;
pub use scanner::{PageSource, PaginatedScanner};
pub use validator::{ValidationReport, Validator};
