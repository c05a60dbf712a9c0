//! Core types and trait definitions for the Tianguis price pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod catalog;
pub mod error;
pub mod observation;
pub mod projection;
pub mod run;
pub mod store;

pub use error::{Error, Result};
