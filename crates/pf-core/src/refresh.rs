//! Rule-set refresh coordinator.
//!
//! 规则集批量更新：并发受信号量限制，每项独立超时，单项失败不影响其它项；
//! 新的批量更新会取代旧批次，旧批次的结果不再对外发布。
//!
//! The per-engine status lock is never held across an await.

use crate::error::RefreshError;
use crate::fs_atomic::write_atomic_async;
use parking_lot::Mutex;
use pf_config::{RuleSet, RuleSetFormat};
use pf_types::ports::{FetchRequest, RuleSetFetcher};
use pf_types::{EngineKind, FetchError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshState {
    Pending,
    Downloading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetStatus {
    pub tag: String,
    pub state: RefreshState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FetchError>,
}

impl RuleSetStatus {
    fn new(tag: &str, state: RefreshState) -> Self {
        Self {
            tag: tag.to_string(),
            state,
            size: None,
            updated_at: None,
            error: None,
        }
    }

    fn failed(tag: &str, error: FetchError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(tag, RefreshState::Failed)
        }
    }
}

/// One status transition, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub engine: EngineKind,
    /// `None` for single refreshes.
    pub batch: Option<u64>,
    pub status: RuleSetStatus,
}

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub concurrency: usize,
    pub timeout: Duration,
    /// Rule-set files land in `<dir>/<tag>.<ext>`.
    pub dir: PathBuf,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout: Duration::from_secs(300),
            dir: PathBuf::from("ruleset"),
        }
    }
}

/// File extension the engine expects for a rule-set of `format`.
pub fn rule_set_ext(engine: EngineKind, format: RuleSetFormat) -> &'static str {
    match (engine, format) {
        (EngineKind::SingBox, RuleSetFormat::Binary) => "srs",
        (EngineKind::SingBox, RuleSetFormat::Source) => "json",
        (EngineKind::Mihomo, RuleSetFormat::Binary) => "mrs",
        (EngineKind::Mihomo, RuleSetFormat::Source) => "yaml",
    }
}

pub fn rule_set_path(dir: &Path, engine: EngineKind, rs: &RuleSet) -> PathBuf {
    let name: String = rs
        .tag
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    dir.join(format!("{name}.{}", rule_set_ext(engine, rs.format)))
}

#[derive(Default)]
struct EngineState {
    batch: u64,
    statuses: Vec<RuleSetStatus>,
}

struct Shared {
    fetcher: Arc<dyn RuleSetFetcher>,
    opts: RefreshOptions,
    mihomo: Mutex<EngineState>,
    singbox: Mutex<EngineState>,
    events: broadcast::Sender<StatusEvent>,
}

impl Shared {
    fn state(&self, engine: EngineKind) -> &Mutex<EngineState> {
        match engine {
            EngineKind::Mihomo => &self.mihomo,
            EngineKind::SingBox => &self.singbox,
        }
    }

    /// Record `status` unless `batch` has been superseded. Returns whether it was published.
    fn publish(&self, engine: EngineKind, batch: Option<u64>, status: RuleSetStatus) -> bool {
        {
            let mut st = self.state(engine).lock();
            if batch.is_some_and(|b| b != st.batch) {
                return false;
            }
            match st.statuses.iter_mut().find(|s| s.tag == status.tag) {
                Some(slot) => *slot = status.clone(),
                None => st.statuses.push(status.clone()),
            }
        }
        // no subscribers is fine
        let _ = self.events.send(StatusEvent {
            engine,
            batch,
            status,
        });
        true
    }

    fn current_batch(&self, engine: EngineKind) -> u64 {
        self.state(engine).lock().batch
    }
}

#[derive(Clone)]
pub struct RuleSetRefresher {
    shared: Arc<Shared>,
}

impl RuleSetRefresher {
    pub fn new(fetcher: Arc<dyn RuleSetFetcher>, opts: RefreshOptions) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                fetcher,
                opts,
                mihomo: Mutex::new(EngineState::default()),
                singbox: Mutex::new(EngineState::default()),
                events,
            }),
        }
    }

    pub fn options(&self) -> &RefreshOptions {
        &self.shared.opts
    }

    /// Latest known status of every rule-set refreshed for `engine`.
    pub fn statuses(&self, engine: EngineKind) -> Vec<RuleSetStatus> {
        self.shared.state(engine).lock().statuses.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.shared.events.subscribe()
    }

    /// Refresh every remote rule-set in `rule_sets`. Local ones are skipped.
    ///
    /// Returns one status per remote rule-set, in input order. If another bulk refresh
    /// for the same engine starts before this one finishes, the result is
    /// [`RefreshError::Superseded`] and none of this batch's later transitions are published.
    pub async fn refresh_all(
        &self,
        engine: EngineKind,
        rule_sets: &[RuleSet],
    ) -> Result<Vec<RuleSetStatus>, RefreshError> {
        let remote: Vec<RuleSet> = rule_sets.iter().filter(|rs| rs.is_remote()).cloned().collect();
        let pending: Vec<RuleSetStatus> = remote
            .iter()
            .map(|rs| RuleSetStatus::new(&rs.tag, RefreshState::Pending))
            .collect();
        let batch = {
            let mut st = self.shared.state(engine).lock();
            st.batch += 1;
            st.statuses = pending.clone();
            st.batch
        };
        info!(engine = %engine, batch, count = remote.len(), "rule-set refresh started");

        let sem = Arc::new(Semaphore::new(self.shared.opts.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (i, rs) in remote.into_iter().enumerate() {
            let shared = Arc::clone(&self.shared);
            let sem = Arc::clone(&sem);
            tasks.spawn(async move {
                let status = match sem.acquire_owned().await {
                    Ok(_permit) => run_item(&shared, engine, Some(batch), &rs).await,
                    Err(_) => RuleSetStatus::failed(&rs.tag, FetchError::Io("limiter closed".into())),
                };
                (i, status)
            });
        }

        let mut results: Vec<RuleSetStatus> = pending
            .into_iter()
            .map(|s| RuleSetStatus::failed(&s.tag, FetchError::Transport("task aborted".into())))
            .collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, status)) => results[i] = status,
                Err(e) => warn!(engine = %engine, batch, error = %e, "refresh task failed"),
            }
        }

        if self.shared.current_batch(engine) != batch {
            debug!(engine = %engine, batch, "rule-set refresh superseded");
            return Err(RefreshError::Superseded(batch));
        }
        let failed = results
            .iter()
            .filter(|s| s.state == RefreshState::Failed)
            .count();
        info!(engine = %engine, batch, total = results.len(), failed, "rule-set refresh finished");
        Ok(results)
    }

    /// Refresh one rule-set by tag, independent of any bulk batch.
    pub async fn refresh_one(
        &self,
        engine: EngineKind,
        rule_sets: &[RuleSet],
        tag: &str,
    ) -> Result<RuleSetStatus, RefreshError> {
        let rs = rule_sets
            .iter()
            .find(|rs| rs.tag == tag)
            .ok_or_else(|| RefreshError::UnknownRuleSet(tag.to_string()))?;
        if !rs.is_remote() {
            return Err(RefreshError::NotRemote(tag.to_string()));
        }
        Ok(run_item(&self.shared, engine, None, rs).await)
    }
}

async fn run_item(
    shared: &Shared,
    engine: EngineKind,
    batch: Option<u64>,
    rs: &RuleSet,
) -> RuleSetStatus {
    if !shared.publish(engine, batch, RuleSetStatus::new(&rs.tag, RefreshState::Downloading)) {
        return RuleSetStatus::failed(&rs.tag, FetchError::Transport("superseded".into()));
    }
    let timeout = shared.opts.timeout;
    let outcome = match tokio::time::timeout(timeout, fetch_to_disk(shared, engine, rs)).await {
        Ok(r) => r,
        Err(_) => Err(FetchError::Timeout(timeout)),
    };
    let status = match outcome {
        Ok((size, updated_at)) => RuleSetStatus {
            size: Some(size),
            updated_at: Some(updated_at),
            ..RuleSetStatus::new(&rs.tag, RefreshState::Completed)
        },
        Err(e) => {
            warn!(engine = %engine, tag = %rs.tag, class = %e.class(), "failed to download rule-set: {}", e);
            RuleSetStatus::failed(&rs.tag, e)
        }
    };
    shared.publish(engine, batch, status.clone());
    status
}

async fn fetch_to_disk(
    shared: &Shared,
    engine: EngineKind,
    rs: &RuleSet,
) -> Result<(u64, u64), FetchError> {
    let url = rs
        .url
        .clone()
        .ok_or_else(|| FetchError::NotRemote(rs.tag.clone()))?;
    let req = FetchRequest {
        tag: rs.tag.clone(),
        url,
        via: rs.download_via.clone(),
    };
    let fetched = shared.fetcher.fetch(&req).await?;
    let path = rule_set_path(&shared.opts.dir, engine, rs);
    write_atomic_async(&path, &fetched.bytes).await?;
    info!("downloaded rule-set: {} ({} bytes)", req.url, fetched.size());
    Ok((fetched.size(), fetched.fetched_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_follow_engine_and_format() {
        let dir = Path::new("/rs");
        let rs = RuleSet::remote("geosite/cn", "https://e.com/x", RuleSetFormat::Binary);
        assert_eq!(
            rule_set_path(dir, EngineKind::SingBox, &rs),
            PathBuf::from("/rs/geosite_cn.srs")
        );
        let rs = RuleSet::remote("ads", "https://e.com/x", RuleSetFormat::Source);
        assert_eq!(
            rule_set_path(dir, EngineKind::Mihomo, &rs),
            PathBuf::from("/rs/ads.yaml")
        );
    }

    #[test]
    fn status_serializes_camel_case() {
        let s = RuleSetStatus {
            size: Some(3),
            updated_at: Some(10),
            ..RuleSetStatus::new("a", RefreshState::Completed)
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"tag": "a", "state": "completed", "size": 3, "updatedAt": 10})
        );
    }
}
