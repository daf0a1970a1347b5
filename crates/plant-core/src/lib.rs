//! Core types and utilities for the plant disease classifier.
//!
//! This crate provides the error taxonomy, the fixed PlantVillage label set,
//! run configuration and the backend/CLI helpers shared by the pipeline
//! crates and tools.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod types;

pub use backend::*;
pub use cli::*;
pub use config::*;
pub use error::{Error, Result};
pub use labels::{ClassLabel, LabelSet, CLASS_LABELS, CROPS, NUM_CLASSES};
pub use metrics::*;
pub use types::*;

/// Crate version, recorded in run logs
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

