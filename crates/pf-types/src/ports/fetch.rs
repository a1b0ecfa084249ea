//! Remote-resource fetcher port used by rule-set refresh.

use crate::errors::FetchError;

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Rule-set tag, for logging only.
    pub tag: String,
    pub url: String,
    /// Optional detour/relay the download should go through.
    pub via: Option<String>,
}

/// A successful download.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    /// Unix seconds when the body finished downloading.
    pub fetched_at: u64,
}

impl Fetched {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Retrieves rule-set bytes from a URL.
///
/// Implementations must not apply their own overall timeout shorter than the
/// caller's; the refresh coordinator bounds each call.
#[async_trait::async_trait]
pub trait RuleSetFetcher: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<Fetched, FetchError>;
}
