//! Error types for single-cellstats.
//!
//! Structural failures abort the enclosing call and surface here with a specific
//! kind. Per-gene failures (a gene missing from a marker panel, a gene a test
//! backend cannot handle) are recovered locally by the stages and reported in
//! their outputs instead.

use thiserror::Error;

/// Main error type for analysis stages.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Unknown gene '{gene}'")]
    UnknownGene { gene: String },

    #[error("Unknown {kind} '{name}'")]
    UnknownIdentifier { kind: &'static str, name: String },

    #[error("Singular design matrix: {reason}")]
    SingularDesign { reason: String },

    #[error("Group '{group}' resolved to zero columns")]
    EmptyGroup { group: String },

    #[error("Unsupported input: {reason}")]
    UnsupportedInput { reason: String },

    #[error("Backend '{backend}' failed")]
    Backend {
        backend: &'static str,
        #[source]
        source: BackendError,
    },
}

/// Failures raised by a differential expression test backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error(
        "Insufficient replicates: group {group} has {found} samples, at least {required} required"
    )]
    InsufficientReplicates {
        group: usize,
        found: usize,
        required: usize,
    },

    #[error("Gene cannot be tested: {reason}")]
    Untestable { reason: String },

    #[error("Numerical failure: {reason}")]
    Numerical { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        Error::UnsupportedInput {
            reason: reason.into(),
        }
    }
}

/// Result type alias for analysis stages.
pub type Result<T> = std::result::Result<T, Error>;
