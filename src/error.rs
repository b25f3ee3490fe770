//src/error.rs

use std::path::PathBuf;
use thiserror::Error;

use crate::types::TaxId;

/// Result type alias for post-processing operations.
pub type Result<T> = std::result::Result<T, PostprocessError>;

/// Faults in the taxonomy itself, or in walking it.
#[derive(Debug, Error)]
pub enum TaxonomyError {
    /// A lineage walk reached a taxon that has no node record.
    #[error("taxon {taxon} has no node record")]
    MissingAncestor { taxon: TaxId },

    /// A lineage walk came back to a taxon it had already passed.
    #[error("lineage of taxon {taxon} loops without reaching the root")]
    Cycle { taxon: TaxId },

    /// A node record names a parent that is never itself defined.
    #[error("taxon {taxon} names undefined parent {parent}")]
    DanglingParent { taxon: TaxId, parent: TaxId },

    #[error("taxonomy file {} not found", .path.display())]
    MissingFile { path: PathBuf },

    #[error("I/O error reading taxonomy: {0}")]
    Io(#[from] std::io::Error),
}

/// A single input line that could not be understood. Always recoverable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing field `{field}`")]
    MissingField { field: &'static str },

    #[error("invalid taxon id `{value}`")]
    InvalidTaxon { value: String },

    #[error("hit token `{token}` is not of the form key:count")]
    MalformedHit { token: String },

    #[error("hit token `{token}` has a non-numeric count")]
    InvalidCount { token: String },

    #[error("hit token `{token}` pushes the k-mer total past u64")]
    CountOverflow { token: String },

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Error)]
pub enum PostprocessError {
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("a {0} thread panicked")]
    ThreadPanicked(&'static str),

    /// Strict taxonomy validation found problems.
    #[error("taxonomy failed validation with {0} issue(s)")]
    InvalidTaxonomy(usize),
}
