//! Errors surfaced by the CSV import.

use thiserror::Error;

use crate::import::ImportState;

/// A hard import failure. No partial counts accompany it.
#[derive(Debug, Error)]
pub enum ImportError {
    /// A required header is absent; the whole import is refused.
    #[error("missing required column '{column}' in the {table} table")]
    MissingColumn { table: &'static str, column: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A write batch failed to commit. Batches committed before it stay applied.
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("import pipeline is {0:?}, reset it before running again")]
    NotIdle(ImportState),
}

pub type Result<T> = std::result::Result<T, ImportError>;
