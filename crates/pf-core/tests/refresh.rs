use pf_config::{RuleSet, RuleSetFormat};
use pf_core::{RefreshError, RefreshOptions, RefreshState, RuleSetRefresher};
use pf_types::ports::{FetchRequest, Fetched, RuleSetFetcher};
use pf_types::{EngineKind, FetchError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scripted fetcher: per-url delay and failure, plus an in-flight high-water mark.
#[derive(Default)]
struct FakeFetcher {
    delay: Duration,
    slow: HashMap<String, Duration>,
    failing: HashMap<String, FetchError>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl RuleSetFetcher for FakeFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<Fetched, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = self.slow.get(&req.url).copied().unwrap_or(self.delay);
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(e) = self.failing.get(&req.url) {
            return Err(e.clone());
        }
        Ok(Fetched {
            bytes: req.url.as_bytes().to_vec(),
            fetched_at: 1_700_000_000,
        })
    }
}

fn url(i: usize) -> String {
    format!("https://example.com/rs-{i}.srs")
}

fn rule_sets(n: usize) -> Vec<RuleSet> {
    (1..=n)
        .map(|i| RuleSet::remote(format!("rs-{i}"), url(i), RuleSetFormat::Binary))
        .collect()
}

fn refresher(fetcher: Arc<FakeFetcher>, dir: &std::path::Path, concurrency: usize) -> RuleSetRefresher {
    RuleSetRefresher::new(
        fetcher,
        RefreshOptions {
            concurrency,
            timeout: Duration::from_millis(200),
            dir: dir.to_path_buf(),
        },
    )
}

#[tokio::test]
async fn one_failure_does_not_fail_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher {
        failing: HashMap::from([(url(3), FetchError::Http { status: 502 })]),
        ..Default::default()
    });
    let r = refresher(fetcher, dir.path(), 5);

    let out = r.refresh_all(EngineKind::SingBox, &rule_sets(5)).await.unwrap();
    let states: Vec<RefreshState> = out.iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![
            RefreshState::Completed,
            RefreshState::Completed,
            RefreshState::Failed,
            RefreshState::Completed,
            RefreshState::Completed,
        ]
    );
    assert_eq!(out[2].error, Some(FetchError::Http { status: 502 }));
    assert_eq!(out[0].size, Some(url(1).len() as u64));
    assert_eq!(out[0].updated_at, Some(1_700_000_000));
    assert!(dir.path().join("rs-1.srs").exists());
    assert!(!dir.path().join("rs-3.srs").exists());
    assert_eq!(r.statuses(EngineKind::SingBox), out);
}

#[tokio::test]
async fn timeout_is_per_item_and_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher {
        slow: HashMap::from([(url(3), Duration::from_secs(5))]),
        ..Default::default()
    });
    let r = refresher(fetcher, dir.path(), 5);
    let sets = rule_sets(5);

    let out = r.refresh_all(EngineKind::SingBox, &sets).await.unwrap();
    let completed = out
        .iter()
        .filter(|s| s.state == RefreshState::Completed)
        .count();
    assert_eq!(completed, 4);
    assert_eq!(
        out[2].error,
        Some(FetchError::Timeout(Duration::from_millis(200)))
    );

    // retry just the one that timed out; it is still slow so it fails again alone
    let again = r.refresh_one(EngineKind::SingBox, &sets, "rs-3").await.unwrap();
    assert_eq!(again.state, RefreshState::Failed);
    let snapshot = r.statuses(EngineKind::SingBox);
    assert_eq!(
        snapshot
            .iter()
            .filter(|s| s.state == RefreshState::Completed)
            .count(),
        4
    );
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher {
        delay: Duration::from_millis(30),
        ..Default::default()
    });
    let r = refresher(fetcher.clone(), dir.path(), 2);

    let out = r.refresh_all(EngineKind::Mihomo, &rule_sets(6)).await.unwrap();
    assert!(out.iter().all(|s| s.state == RefreshState::Completed));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 6);
    assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
    assert!(dir.path().join("rs-6.mrs").exists());
}

#[tokio::test]
async fn local_rule_sets_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    let r = refresher(fetcher.clone(), dir.path(), 5);
    let mut sets = rule_sets(2);
    sets.push(RuleSet::local("mine", "/etc/mine.json", RuleSetFormat::Source));

    let out = r.refresh_all(EngineKind::SingBox, &sets).await.unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

    assert_eq!(
        r.refresh_one(EngineKind::SingBox, &sets, "mine").await,
        Err(RefreshError::NotRemote("mine".into()))
    );
    assert_eq!(
        r.refresh_one(EngineKind::SingBox, &sets, "nope").await,
        Err(RefreshError::UnknownRuleSet("nope".into()))
    );
}

#[tokio::test]
async fn newer_batch_supersedes_older() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher {
        delay: Duration::from_millis(100),
        ..Default::default()
    });
    let r = refresher(fetcher, dir.path(), 5);
    let mut events = r.subscribe();

    let first = {
        let r = r.clone();
        tokio::spawn(async move { r.refresh_all(EngineKind::SingBox, &rule_sets(3)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = r.refresh_all(EngineKind::SingBox, &rule_sets(2)).await.unwrap();

    assert!(matches!(
        first.await.unwrap(),
        Err(RefreshError::Superseded(1))
    ));
    assert_eq!(second.len(), 2);

    // only the newer batch's tags remain in the snapshot
    let tags: Vec<String> = r
        .statuses(EngineKind::SingBox)
        .into_iter()
        .map(|s| s.tag)
        .collect();
    assert_eq!(tags, vec!["rs-1", "rs-2"]);

    // no completion from batch 1 was ever published
    while let Ok(ev) = events.try_recv() {
        if ev.batch == Some(1) {
            assert_ne!(ev.status.state, RefreshState::Completed);
        }
    }
}

#[tokio::test]
async fn engines_refresh_independently() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    let r = refresher(fetcher, dir.path(), 5);
    r.refresh_all(EngineKind::Mihomo, &rule_sets(1)).await.unwrap();
    r.refresh_all(EngineKind::SingBox, &rule_sets(2)).await.unwrap();
    assert_eq!(r.statuses(EngineKind::Mihomo).len(), 1);
    assert_eq!(r.statuses(EngineKind::SingBox).len(), 2);
}
