use pf_types::{GenerationError, ValidationError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Template store failures. A failed mutation leaves the stored template untouched.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("template rejected with {} validation error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    #[error("unknown preset `{0}`")]
    UnknownPreset(String),

    #[error("persist {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("import: {0}")]
    Import(#[from] GenerationError),
}

impl StoreError {
    /// Validation errors carried by this failure, if any.
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            StoreError::Validation(errors) => errors,
            StoreError::Import(GenerationError::Invalid(errors)) => errors,
            _ => &[],
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("unknown rule-set `{0}`")]
    UnknownRuleSet(String),

    #[error("rule-set `{0}` is local and has nothing to fetch")]
    NotRemote(String),

    /// A newer bulk refresh started before this one finished.
    #[error("refresh batch {0} was superseded")]
    Superseded(u64),
}
