//! Periodic mirror sync.

use crate::error::RepositoryError;
use crate::proxy::{RemoteProxyRepository, SyncReport};
use crate::registry::{ProxyRepositoryRegistry, sync_interval};
use backon::{ExponentialBuilder, Retryable};
use cantata_cache::{Clock, SystemClock};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Backoff applied when a mirror fails to sync.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retries within one pass.
    pub max_retries: usize,
    /// First delay.
    pub min_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

/// Result of syncing one mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Mirror alias.
    pub alias: String,
    /// Report, or the error message of the last attempt.
    pub result: Result<SyncReport, String>,
}

/// Walks the registry and syncs every mirror that is due.
#[derive(Debug, Clone)]
pub struct SyncScheduler {
    registry: Arc<ProxyRepositoryRegistry>,
    tick: Duration,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl SyncScheduler {
    /// Create a scheduler waking every `tick`.
    #[must_use]
    pub fn new(registry: Arc<ProxyRepositoryRegistry>, tick: Duration) -> Self {
        Self {
            registry,
            tick,
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the clock used for due checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether a mirror should sync now.
    #[must_use]
    pub fn is_due(&self, repo: &RemoteProxyRepository) -> bool {
        let Some(last_sync) = repo.status().last_sync else {
            return true;
        };
        last_sync.saturating_add(sync_interval(&repo.options())) <= self.clock.now()
    }

    /// Run one pass. With `force`, every selected mirror syncs regardless of
    /// its interval; `only` restricts the pass to one alias.
    ///
    /// Mirrors sync concurrently and a failing mirror never stops the others.
    ///
    /// # Errors
    /// Returns [`RepositoryError::UnknownMirror`] if `only` names no mirror.
    pub async fn run_once(
        &self,
        force: bool,
        only: Option<&str>,
    ) -> Result<Vec<SyncOutcome>, RepositoryError> {
        if let Some(alias) = only {
            self.registry.get(alias)?;
        }
        self.registry.reset_proxy_options();

        let due: Vec<Arc<RemoteProxyRepository>> = self
            .registry
            .get_all_repos()
            .values()
            .filter(|repo| only.is_none_or(|alias| repo.alias() == alias))
            .filter(|repo| force || self.is_due(repo))
            .cloned()
            .collect();
        debug!(due = due.len(), total = self.registry.len(), "sync pass");

        let outcomes = futures::future::join_all(due.iter().map(|repo| self.sync_one(repo))).await;
        Ok(outcomes)
    }

    async fn sync_one(&self, repo: &RemoteProxyRepository) -> SyncOutcome {
        let alias = repo.alias().to_string();
        let result = (|| repo.sync())
            .retry(self.retry.backoff())
            .when(RepositoryError::is_retryable)
            .notify(|e: &RepositoryError, delay: Duration| {
                warn!(mirror = %alias, error = %e, retry_in = ?delay, "sync failed, retrying");
            })
            .await;

        match result {
            Ok(report) => SyncOutcome {
                alias,
                result: Ok(report),
            },
            Err(e) => {
                error!(mirror = %alias, error = %e, "sync failed");
                SyncOutcome {
                    alias,
                    result: Err(e.to_string()),
                }
            }
        }
    }

    /// Tick until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!(tick_secs = self.tick.as_secs(), mirrors = self.registry.len(), "sync scheduler started");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = interval.tick() => {
                    if let Err(e) = self.run_once(false, None).await {
                        error!(error = %e, "sync pass failed");
                    }
                }
            }
        }
        info!("sync scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{HttpClient, HttpClientConfig};
    use crate::fetch::MetadataFetcher;
    use crate::merger::RootMetadataMerger;
    use crate::options::ProxyOptions;
    use cantata_cache::{MemoryStore, MetadataCache};
    use cantata_config::MirrorConfig;
    use cantata_core::NetworkSwitch;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug)]
    struct ManualClock(AtomicU64);

    impl Clock for ManualClock {
        fn now(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn repo(alias: &str, url: &str, clock: Arc<ManualClock>) -> RemoteProxyRepository {
        let options = ProxyOptions::from_config(
            alias,
            &MirrorConfig {
                url: url.to_string(),
                lazy: true,
                ..MirrorConfig::default()
            },
        )
        .unwrap();
        let client = HttpClient::new(HttpClientConfig::default(), NetworkSwitch::new()).unwrap();
        let cache = MetadataCache::with_clock(Arc::new(MemoryStore::new(1 << 20)), clock, 1800);
        RemoteProxyRepository::new(
            options,
            MetadataFetcher::new(Arc::new(client)),
            cache,
            RootMetadataMerger::default(),
        )
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn broken_mirror_does_not_block_others() {
        let good = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metadata-url": "/p2/%package%.json"
            })))
            .mount(&good)
            .await;
        let bad = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&bad)
            .await;

        let clock = Arc::new(ManualClock(AtomicU64::new(10_000)));
        let registry = Arc::new(ProxyRepositoryRegistry::from_repositories([
            repo("good", &good.uri(), clock.clone()),
            repo("bad", &bad.uri(), clock.clone()),
        ]));
        let scheduler = SyncScheduler::new(registry.clone(), Duration::from_secs(60))
            .with_retry(fast_retry())
            .with_clock(clock.clone());

        let outcomes = scheduler.run_once(false, None).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        let bad_outcome = outcomes.iter().find(|o| o.alias == "bad").unwrap();
        assert!(bad_outcome.result.is_err());
        let good_outcome = outcomes.iter().find(|o| o.alias == "good").unwrap();
        assert!(good_outcome.result.is_ok());

        // The good mirror is not due again until its interval passes; the
        // bad one stays due.
        let good_repo = registry.get("good").unwrap();
        assert!(!scheduler.is_due(good_repo));
        assert!(scheduler.is_due(registry.get("bad").unwrap()));
        clock.0.fetch_add(1800, Ordering::Relaxed);
        assert!(scheduler.is_due(good_repo));
    }

    #[tokio::test]
    async fn only_filter_and_unknown_alias() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock(AtomicU64::new(0)));
        let registry = Arc::new(ProxyRepositoryRegistry::from_repositories([
            repo("a", &server.uri(), clock.clone()),
            repo("b", &server.uri(), clock.clone()),
        ]));
        let scheduler = SyncScheduler::new(registry, Duration::from_secs(60)).with_clock(clock);

        let outcomes = scheduler.run_once(true, Some("b")).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].alias, "b");

        let err = scheduler.run_once(true, Some("zzz")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::UnknownMirror { .. }));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let registry = Arc::new(ProxyRepositoryRegistry::default());
        let scheduler = SyncScheduler::new(registry, Duration::from_millis(10));
        tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.run(tokio::time::sleep(Duration::from_millis(30))),
        )
        .await
        .unwrap();
    }
}
