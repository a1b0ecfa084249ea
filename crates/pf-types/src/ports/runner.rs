//! Proxy-core runner port: hands a rendered artifact to the engine for a check.

use crate::EngineKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Verdict reported by the proxy core. Relayed to callers as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Verdict {
    /// The core accepted the artifact.
    Accepted,
    /// The core rejected the artifact; `message` is its own output, untouched.
    Rejected { message: String },
    /// No check could be performed (no runner configured, binary missing, ...).
    Unavailable { reason: String },
}

impl Verdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Verdict::Rejected { .. })
    }
}

#[async_trait::async_trait]
pub trait CoreRunner: Send + Sync {
    /// Check the artifact already written at `path`.
    async fn check(&self, engine: EngineKind, path: &Path) -> Verdict;
}

/// Runner used when no proxy core is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRunner;

#[async_trait::async_trait]
impl CoreRunner for NoopRunner {
    async fn check(&self, engine: EngineKind, _path: &Path) -> Verdict {
        Verdict::Unavailable {
            reason: format!("no {engine} core configured"),
        }
    }
}
