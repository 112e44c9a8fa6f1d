//! Error types for eva3d.
//!
//! Library crates use [`Eva3dError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::collections::BTreeSet;
use std::path::PathBuf;

/// Top-level error type for all eva3d operations.
#[derive(Debug, thiserror::Error)]
pub enum Eva3dError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// HTTP transport error talking to the CAD service.
    #[error("network error: {0}")]
    Network(String),

    /// Zip archive could not be read or written.
    #[error("archive error: {0}")]
    Archive(String),

    /// Data validation error (bad page entry, bad vendor table, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A bill of materials table could not be parsed.
    #[error("malformed BOM {source_path}: {reason}")]
    MalformedBom {
        source_path: String,
        reason: MalformedBomReason,
    },

    /// A CAD URL does not match `.../documents/{d}/{w|v|m}/{id}/e/{e}`.
    #[error("bad CAD reference: {url}")]
    BadCadReference { url: String },

    /// The page BOM requires printable files no archive provided.
    #[error("incomplete extraction for page {page}: missing {}", join_names(.missing))]
    IncompleteExtraction {
        page: String,
        missing: BTreeSet<String>,
    },

    /// Two rows for the same `(namespace, name)` disagree on printable/hardware.
    #[error("inconsistent material for {name} in {namespace}")]
    InconsistentMaterial { namespace: String, name: String },

    /// A hardware part has no row in the vendor mapping.
    #[error("part {name} has no vendor mapping")]
    UnmappedPart { name: String },

    /// A CAD service call failed.
    #[error("fetch failed for {namespace}: {message}")]
    FetchFailure { namespace: String, message: String },

    /// A CAD service call exceeded the per-request timeout.
    #[error("{what} timed out after {seconds}s")]
    Timeout { what: String, seconds: u64 },
}

/// Why a BOM table was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedBomReason {
    #[error("missing required column '{0}'")]
    MissingColumn(String),

    #[error("row {row}: quantity '{value}' is not a number")]
    NonNumericQuantity { row: usize, value: String },

    #[error("row {row}: quantity {value} must be positive")]
    NonPositiveQuantity { row: usize, value: String },

    #[error("row {row}: empty part name")]
    EmptyName { row: usize },

    #[error("row {row}: {message}")]
    UnreadableRecord { row: usize, message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, Eva3dError>;

fn join_names(names: &BTreeSet<String>) -> String {
    names.iter().cloned().collect::<Vec<_>>().join(", ")
}

impl Eva3dError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a malformed-BOM error for the given source.
    pub fn malformed_bom(source_path: impl Into<String>, reason: MalformedBomReason) -> Self {
        Self::MalformedBom {
            source_path: source_path.into(),
            reason,
        }
    }

    /// Create a fetch failure for a page namespace.
    pub fn fetch(namespace: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FetchFailure {
            namespace: namespace.into(),
            message: message.into(),
        }
    }
}
