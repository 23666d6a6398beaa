//! The polling scheduler.
//!
//! Each cycle looks at every source, fetches the ones that are due, stores
//! items it has not seen before and hands them to the fan-out. A source that
//! keeps failing is disabled once its error counter reaches the threshold and
//! stays disabled until resumed.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::PollerConfig;
use crate::fanout::BroadcastFanout;
use crate::feed::{FeedFetcher, FetchError, FetchedFeed};
use crate::identity::identify;
use crate::preview::EnrichmentPublisher;
use crate::storage::{
    Content, ContentRepository, NewContent, Source, SourceId, SourceRepository, StorageError,
    Subscription, SubscriptionRepository,
};

/// Why a source was not fetched this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another task is already fetching it.
    InFlight,
    Disabled,
    NotDue,
    NoSubscribers,
    /// Its subscriptions could not be loaded.
    Storage,
}

/// Result of considering one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Skipped(SkipReason),
    Fetched { new_items: usize },
    Failed { error_count: u32, disabled: bool },
}

type Registry = Arc<Mutex<HashSet<SourceId>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds a source's in-flight slot; released on drop.
struct InFlightGuard {
    registry: Registry,
    id: SourceId,
}

impl InFlightGuard {
    fn claim(registry: &Registry, id: SourceId) -> Option<Self> {
        if !lock(registry).insert(id) {
            return None;
        }
        Some(Self {
            registry: Arc::clone(registry),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.id);
    }
}

pub struct SourcePoller {
    sources: Arc<dyn SourceRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    contents: Arc<dyn ContentRepository>,
    fetcher: Arc<dyn FeedFetcher>,
    fanout: BroadcastFanout,
    enrichment: Option<Arc<EnrichmentPublisher>>,
    config: PollerConfig,
    in_flight: Registry,
    next_due: Mutex<HashMap<SourceId, Instant>>,
}

impl SourcePoller {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        contents: Arc<dyn ContentRepository>,
        fetcher: Arc<dyn FeedFetcher>,
        fanout: BroadcastFanout,
        config: PollerConfig,
    ) -> Self {
        Self {
            sources,
            subscriptions,
            contents,
            fetcher,
            fanout,
            enrichment: None,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            next_due: Mutex::new(HashMap::new()),
        }
    }

    /// Publish preview pages for new items through `publisher`.
    pub fn with_enrichment(mut self, publisher: Arc<EnrichmentPublisher>) -> Self {
        self.enrichment = Some(publisher);
        self
    }

    /// Runs cycles every `cycle_period` until `shutdown` fires, then waits
    /// for the cycles still running.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();
        let mut ticker = tokio::time::interval(self.config.cycle_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            period_secs = self.config.cycle_period.as_secs(),
            default_interval_secs = self.config.default_interval.as_secs(),
            "Poller started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let poller = Arc::clone(&self);
                    tracker.spawn(async move {
                        poller.run_cycle().await;
                    });
                }
            }
        }

        tracker.close();
        tracing::info!(running = tracker.len(), "Poller stopping, waiting for running cycles");
        tracker.wait().await;
        tracing::info!("Poller stopped");
    }

    /// One pass over every source. Due sources are polled concurrently, at
    /// most `max_concurrent_fetches` at a time.
    pub async fn run_cycle(&self) -> Vec<(SourceId, PollOutcome)> {
        let sources = match self.sources.list_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list sources, skipping cycle");
                return Vec::new();
            }
        };

        let known: HashSet<SourceId> = sources.iter().map(|s| s.id).collect();
        lock(&self.next_due).retain(|id, _| known.contains(id));

        let outcomes: Vec<(SourceId, PollOutcome)> = stream::iter(sources)
            .map(|source| async move {
                let outcome = self.poll_if_due(&source).await;
                (source.id, outcome)
            })
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let fetched = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PollOutcome::Fetched { .. }))
            .count();
        let failed = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PollOutcome::Failed { .. }))
            .count();
        if fetched + failed > 0 {
            tracing::info!(
                sources = outcomes.len(),
                fetched,
                failed,
                "Poll cycle finished"
            );
        }
        outcomes
    }

    async fn poll_if_due(&self, source: &Source) -> PollOutcome {
        if !source.is_enabled(self.config.error_threshold) {
            return PollOutcome::Skipped(SkipReason::Disabled);
        }

        let subscriptions = match self.subscriptions.list_by_source(source.id).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(source_id = source.id, error = %e, "Failed to load subscriptions");
                return PollOutcome::Skipped(SkipReason::Storage);
            }
        };
        if subscriptions.is_empty() {
            return PollOutcome::Skipped(SkipReason::NoSubscribers);
        }

        let due = lock(&self.next_due)
            .get(&source.id)
            .map_or(true, |at| *at <= Instant::now());
        if !due {
            return PollOutcome::Skipped(SkipReason::NotDue);
        }

        self.poll_source(source, &subscriptions).await
    }

    /// Fetches one source now, regardless of its schedule.
    ///
    /// Returns [`SkipReason::InFlight`] without fetching when another task
    /// holds the source, and [`SkipReason::Disabled`] for disabled sources.
    pub async fn poll_source(&self, source: &Source, subscriptions: &[Subscription]) -> PollOutcome {
        if !source.is_enabled(self.config.error_threshold) {
            return PollOutcome::Skipped(SkipReason::Disabled);
        }
        let Some(_guard) = InFlightGuard::claim(&self.in_flight, source.id) else {
            tracing::debug!(source_id = source.id, "Source already being fetched");
            return PollOutcome::Skipped(SkipReason::InFlight);
        };

        let result = self.fetcher.fetch(&source.link).await;
        lock(&self.next_due).insert(
            source.id,
            Instant::now() + self.interval_for(subscriptions),
        );

        match result {
            Ok(feed) => self.ingest(source, subscriptions, feed).await,
            Err(e) => self.record_failure(source, subscriptions, e).await,
        }
    }

    /// Smallest positive per-subscription override, else the default.
    fn interval_for(&self, subscriptions: &[Subscription]) -> Duration {
        subscriptions
            .iter()
            .map(|s| s.settings.interval)
            .filter(|&minutes| minutes > 0)
            .min()
            .map(|minutes| Duration::from_secs(u64::from(minutes) * 60))
            .unwrap_or(self.config.default_interval)
    }

    async fn record_failure(
        &self,
        source: &Source,
        subscriptions: &[Subscription],
        error: FetchError,
    ) -> PollOutcome {
        let threshold = self.config.error_threshold;
        let error_count = match self.sources.increment_error_count(source.id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(source_id = source.id, error = %e, "Failed to record fetch error");
                return PollOutcome::Failed {
                    error_count: source.error_count,
                    disabled: false,
                };
            }
        };

        tracing::warn!(
            source_id = source.id,
            link = %source.link,
            error = %error,
            error_count,
            threshold,
            "Feed fetch failed"
        );

        if error_count == threshold {
            tracing::info!(source_id = source.id, link = %source.link, "Source disabled");
            self.fanout
                .notify_source_disabled(source, subscriptions, threshold)
                .await;
        }

        PollOutcome::Failed {
            error_count,
            disabled: error_count >= threshold,
        }
    }

    async fn ingest(
        &self,
        source: &Source,
        subscriptions: &[Subscription],
        feed: FetchedFeed,
    ) -> PollOutcome {
        let enrichment = self.enrichment.as_ref().filter(|publisher| {
            self.config.enable_telegraph
                && publisher.is_configured()
                && subscriptions.iter().any(|s| s.settings.enable_telegraph)
        });

        let mut new_items: Vec<Content> = Vec::new();
        for item in feed.items {
            let hash = identify(&source.link, &item.guid, &item.raw_link);
            match self.contents.hash_exists(source.id, &hash).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(source_id = source.id, hash = %hash, error = %e, "Failed to check item");
                    continue;
                }
            }

            let link = if item.link.is_empty() {
                item.raw_link.clone()
            } else {
                item.link.clone()
            };
            let created = self
                .contents
                .create_content(NewContent {
                    source_id: source.id,
                    hash,
                    title: item.title.clone(),
                    raw_link: link,
                    description: item.description.clone(),
                })
                .await;
            let mut content = match created {
                Ok(content) => content,
                Err(StorageError::AlreadyExists) => continue,
                Err(e) => {
                    tracing::warn!(
                        source_id = source.id,
                        title = %item.title,
                        error = %e,
                        "Failed to store item, leaving it for the next cycle"
                    );
                    continue;
                }
            };
            tracing::debug!(source_id = source.id, content_id = content.id, "New item");

            if let Some(publisher) = enrichment {
                let page = publisher
                    .publish(&source.title, &content.title, &content.raw_link, &item.body)
                    .await;
                if let Some(url) = page {
                    match self.contents.attach_telegraph_url(content.id, &url).await {
                        Ok(()) => content.telegraph_url = Some(url),
                        Err(e) => {
                            tracing::warn!(content_id = content.id, error = %e, "Failed to attach preview URL");
                        }
                    }
                }
            }

            new_items.push(content);
        }

        let content_at = (!new_items.is_empty()).then(Utc::now);
        if let Err(e) = self
            .sources
            .mark_polled(source.id, feed.published_at, content_at)
            .await
        {
            tracing::warn!(source_id = source.id, error = %e, "Failed to reset source health");
        }

        if !new_items.is_empty() {
            self.fanout
                .broadcast(source, &new_items, subscriptions)
                .await;
        }

        PollOutcome::Fetched {
            new_items: new_items.len(),
        }
    }
}
