//! # Accord Common Library
//!
//! Shared code for the Accord reconciliation service:
//! - Consistency check data model (results, reports, enums)
//! - Record canonicalization and content hashing
//! - Service configuration loading
//! - Error types
//! - Timestamp utilities

pub mod canonical;
pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    CheckType, ConsistencyReport, Record, ResolutionOutcome, ResolutionStatus,
    ResolutionStrategy, Severity, ValidationResult,
};
