//! Typed errors shared across crates.
//!
//! Library crates only use these; `anyhow` stays in the binary.

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification used for logging and status reporting.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    Io,
    Timeout,
    Http,
    Config,
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Io => "io",
            Self::Timeout => "timeout",
            Self::Http => "http",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Raised when a template cannot be rendered for an engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GenerationError {
    /// A construct the target grammar cannot express.
    #[error("unsupported at {ptr}: {msg}")]
    Unsupported { ptr: String, msg: String },

    /// The template did not pass validation for this engine.
    #[error("template rejected with {} validation error(s)", .0.len())]
    Invalid(Vec<ValidationError>),

    /// Failed to encode the document.
    #[error("serialize: {0}")]
    Serialize(String),

    /// Failed to decode an engine document back into a template.
    #[error("parse: {0}")]
    Parse(String),
}

impl GenerationError {
    pub fn unsupported(ptr: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Unsupported {
            ptr: ptr.into(),
            msg: msg.into(),
        }
    }
}

/// Per rule-set fetch failure. Recovered per item during refresh.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchError {
    #[error("timeout after {}s", .0.as_secs())]
    Timeout(#[serde(with = "duration_secs")] Duration),

    #[error("http status {status}")]
    Http { status: u16 },

    #[error("transport: {0}")]
    Transport(String),

    #[error("io: {0}")]
    Io(String),

    #[error("rule-set `{0}` has no remote source")]
    NotRemote(String),

    #[error("unknown rule-set `{0}`")]
    UnknownRuleSet(String),
}

impl FetchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::Http { .. } => ErrorClass::Http,
            Self::Transport(_) | Self::Io(_) => ErrorClass::Io,
            Self::NotRemote(_) | Self::UnknownRuleSet(_) => ErrorClass::Config,
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_class() {
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(3)).class(),
            ErrorClass::Timeout
        );
        assert_eq!(FetchError::Http { status: 404 }.class(), ErrorClass::Http);
        assert_eq!(FetchError::Timeout(Duration::from_secs(3)).to_string(), "timeout after 3s");
    }

    #[test]
    fn fetch_error_roundtrips_through_json() {
        let e = FetchError::Timeout(Duration::from_secs(300));
        let j = serde_json::to_string(&e).unwrap();
        let back: FetchError = serde_json::from_str(&j).unwrap();
        assert_eq!(back, e);
    }
}
