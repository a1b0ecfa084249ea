//! Reqwest-based implementation of the `RuleSetFetcher` port.

use async_trait::async_trait;
use pf_types::ports::{FetchRequest, Fetched, RuleSetFetcher};
use pf_types::FetchError;
use std::time::{SystemTime, UNIX_EPOCH};

const GITHUB_HOSTS: [&str; 4] = [
    "github.com",
    "raw.githubusercontent.com",
    "gist.githubusercontent.com",
    "objects.githubusercontent.com",
];

pub struct ReqwestFetcher {
    client: reqwest::Client,
    relay_prefix: Option<String>,
}

impl ReqwestFetcher {
    pub fn new(relay_prefix: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pforge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            relay_prefix: relay_prefix.filter(|p| !p.trim().is_empty()),
        })
    }

    /// URL actually requested: GitHub downloads go through the relay when one is set.
    pub fn effective_url(&self, url: &str) -> String {
        match &self.relay_prefix {
            Some(prefix) if is_github(url) => {
                format!("{}/{}", prefix.trim_end_matches('/'), url)
            }
            _ => url.to_string(),
        }
    }
}

fn is_github(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let host = rest.split(['/', ':']).next().unwrap_or_default();
    GITHUB_HOSTS.contains(&host)
}

#[async_trait]
impl RuleSetFetcher for ReqwestFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<Fetched, FetchError> {
        let url = self.effective_url(&req.url);
        if let Some(via) = &req.via {
            // detours are an engine concept; here only the relay applies
            tracing::debug!(tag = %req.tag, via = %via, "download detour ignored by fetcher");
        }
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(format!("read body: {e}")))?;
        let fetched_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Ok(Fetched {
            bytes: bytes.to_vec(),
            fetched_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_only_for_github() {
        let f = ReqwestFetcher::new(Some("https://relay.example/".into())).unwrap();
        assert_eq!(
            f.effective_url("https://raw.githubusercontent.com/a/b/x.srs"),
            "https://relay.example/https://raw.githubusercontent.com/a/b/x.srs"
        );
        assert_eq!(
            f.effective_url("https://cdn.example.com/x.srs"),
            "https://cdn.example.com/x.srs"
        );

        let direct = ReqwestFetcher::new(Some("  ".into())).unwrap();
        assert_eq!(
            direct.effective_url("https://github.com/x"),
            "https://github.com/x"
        );
    }
}
