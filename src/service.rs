//! Subscription management shared by the CLI and bulk import.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::feed::{FeedFetcher, FetchError};
use crate::identity::identify;
use crate::storage::{
    ContentRepository, NewContent, NewSource, Source, SourceId, SourceRepository, StorageError,
    SubscriberId, Subscription, SubscriptionRepository, SubscriptionSettings, UserRepository,
};
use crate::util::{validate_url, UrlValidationError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    #[error("could not fetch feed: {0}")]
    Fetch(#[from] FetchError),
    #[error("already subscribed")]
    AlreadySubscribed,
    #[error("not subscribed")]
    NotSubscribed,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct SubscriptionService {
    sources: Arc<dyn SourceRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    contents: Arc<dyn ContentRepository>,
    users: Arc<dyn UserRepository>,
    fetcher: Arc<dyn FeedFetcher>,
    error_threshold: u32,
    default_language: String,
}

impl SubscriptionService {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        contents: Arc<dyn ContentRepository>,
        users: Arc<dyn UserRepository>,
        fetcher: Arc<dyn FeedFetcher>,
        error_threshold: u32,
    ) -> Self {
        Self {
            sources,
            subscriptions,
            contents,
            users,
            fetcher,
            error_threshold,
            default_language: "en".to_string(),
        }
    }

    pub fn with_default_language(mut self, lang: &str) -> Self {
        self.default_language = lang.to_string();
        self
    }

    /// Returns the source stored under `url`, creating it if needed.
    ///
    /// A new source is fetched once to check the feed and learn its title.
    /// The items it already lists are recorded as seen, so subscribers only
    /// hear about items published afterwards.
    pub async fn create_source(&self, url: &str) -> Result<Source, ServiceError> {
        let url = validate_url(url)?.to_string();

        match self.sources.get_source_by_url(&url).await {
            Ok(source) => return Ok(source),
            Err(StorageError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let feed = self.fetcher.fetch(&url).await?;
        let title = if feed.title.trim().is_empty() {
            url.clone()
        } else {
            feed.title.trim().to_string()
        };

        let source = match self
            .sources
            .create_source(NewSource {
                link: url.clone(),
                title,
            })
            .await
        {
            Ok(source) => source,
            // created concurrently by someone else
            Err(StorageError::AlreadyExists) => return Ok(self.sources.get_source_by_url(&url).await?),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(source_id = source.id, link = %source.link, "Created source");

        for item in &feed.items {
            let seed = NewContent {
                source_id: source.id,
                hash: identify(&source.link, &item.guid, &item.raw_link),
                title: item.title.clone(),
                raw_link: if item.link.is_empty() {
                    item.raw_link.clone()
                } else {
                    item.link.clone()
                },
                description: item.description.clone(),
            };
            match self.contents.create_content(seed).await {
                Ok(_) | Err(StorageError::AlreadyExists) => {}
                Err(e) => {
                    tracing::warn!(source_id = source.id, error = %e, "Failed to record existing item");
                }
            }
        }

        Ok(source)
    }

    /// Subscribes `subscriber` to the feed at `url` with default settings.
    pub async fn add_subscription(
        &self,
        subscriber: SubscriberId,
        url: &str,
    ) -> Result<(Source, Subscription), ServiceError> {
        let source = self.create_source(url).await?;
        self.users
            .create_user(subscriber, &self.default_language)
            .await?;

        let subscription = match self
            .subscriptions
            .create_subscription(subscriber, source.id, SubscriptionSettings::default())
            .await
        {
            Ok(sub) => sub,
            Err(StorageError::AlreadyExists) => return Err(ServiceError::AlreadySubscribed),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(subscriber, source_id = source.id, "Subscribed");
        Ok((source, subscription))
    }

    /// Replaces the settings of an existing subscription.
    pub async fn update_settings(
        &self,
        subscriber: SubscriberId,
        source_id: SourceId,
        settings: SubscriptionSettings,
    ) -> Result<Subscription, ServiceError> {
        let mut subscription = match self
            .subscriptions
            .get_subscription(subscriber, source_id)
            .await
        {
            Ok(sub) => sub,
            Err(StorageError::NotFound) => return Err(ServiceError::NotSubscribed),
            Err(e) => return Err(e.into()),
        };
        subscription.settings = settings;
        self.subscriptions.update_subscription(&subscription).await?;
        Ok(subscription)
    }

    /// Removes one subscription; the source goes too once nobody follows it.
    pub async fn unsubscribe(
        &self,
        subscriber: SubscriberId,
        source_id: SourceId,
    ) -> Result<(), ServiceError> {
        match self
            .subscriptions
            .delete_subscription(subscriber, source_id)
            .await
        {
            Ok(()) => {}
            Err(StorageError::NotFound) => return Err(ServiceError::NotSubscribed),
            Err(e) => return Err(e.into()),
        }
        tracing::info!(subscriber, source_id, "Unsubscribed");
        self.remove_if_orphaned(source_id).await
    }

    /// Removes every subscription of `subscriber`, returning how many.
    pub async fn unsubscribe_all(&self, subscriber: SubscriberId) -> Result<u64, ServiceError> {
        let source_ids: HashSet<SourceId> = self
            .subscriptions
            .list_by_subscriber(subscriber)
            .await?
            .into_iter()
            .map(|s| s.source_id)
            .collect();

        let removed = self
            .subscriptions
            .delete_all_by_subscriber(subscriber)
            .await?;
        for source_id in source_ids {
            self.remove_if_orphaned(source_id).await?;
        }
        tracing::info!(subscriber, removed, "Removed all subscriptions");
        Ok(removed)
    }

    async fn remove_if_orphaned(&self, source_id: SourceId) -> Result<(), ServiceError> {
        if self.subscriptions.count_by_source(source_id).await? > 0 {
            return Ok(());
        }
        self.contents.delete_by_source(source_id).await?;
        match self.sources.delete_source(source_id).await {
            Ok(()) | Err(StorageError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(source_id, "Removed source without subscribers");
        Ok(())
    }

    /// Stops polling a source until it is resumed.
    pub async fn pause_source(&self, source_id: SourceId) -> Result<(), ServiceError> {
        self.sources.get_source(source_id).await?;
        self.sources
            .disable_source(source_id, self.error_threshold)
            .await?;
        tracing::info!(source_id, "Source paused");
        Ok(())
    }

    /// Re-enables a source and clears its error counter.
    pub async fn resume_source(&self, source_id: SourceId) -> Result<(), ServiceError> {
        self.sources.get_source(source_id).await?;
        self.sources.enable_source(source_id).await?;
        tracing::info!(source_id, "Source resumed");
        Ok(())
    }

    /// Pauses every source `subscriber` follows. Returns how many.
    pub async fn pause_all(&self, subscriber: SubscriberId) -> Result<usize, ServiceError> {
        let subs = self.subscriptions.list_by_subscriber(subscriber).await?;
        for sub in &subs {
            self.sources
                .disable_source(sub.source_id, self.error_threshold)
                .await?;
        }
        Ok(subs.len())
    }

    /// Resumes every source `subscriber` follows. Returns how many.
    pub async fn activate_all(&self, subscriber: SubscriberId) -> Result<usize, ServiceError> {
        let subs = self.subscriptions.list_by_subscriber(subscriber).await?;
        for sub in &subs {
            self.sources.enable_source(sub.source_id).await?;
        }
        Ok(subs.len())
    }

    pub async fn set_language(
        &self,
        subscriber: SubscriberId,
        language_code: &str,
    ) -> Result<(), ServiceError> {
        self.users.set_language(subscriber, language_code).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedItem, FetchedFeed};
    use crate::storage::memory::MemoryStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct OneFeed;

    #[async_trait]
    impl FeedFetcher for OneFeed {
        async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
            if url.contains("broken") {
                return Err(FetchError::HttpStatus(404));
            }
            Ok(FetchedFeed {
                title: "Example Feed".into(),
                published_at: None,
                items: vec![FeedItem {
                    title: "Old post".into(),
                    link: "https://example.com/old".into(),
                    raw_link: "https://example.com/old".into(),
                    guid: "old".into(),
                    ..FeedItem::default()
                }],
            })
        }
    }

    fn service(store: &MemoryStore) -> SubscriptionService {
        SubscriptionService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(OneFeed),
            5,
        )
    }

    #[tokio::test]
    async fn test_add_subscription_creates_source_and_seeds_items() {
        let store = MemoryStore::new();
        let svc = service(&store);

        let (source, sub) = svc
            .add_subscription(1, "https://example.com/feed")
            .await
            .unwrap();

        assert_eq!(source.title, "Example Feed");
        assert_eq!(sub.subscriber_id, 1);
        assert_eq!(store.contents_of(source.id).len(), 1);
        assert_eq!(store.get_user(1).await.unwrap().language_code, "en");
    }

    #[tokio::test]
    async fn test_duplicate_subscription_rejected() {
        let store = MemoryStore::new();
        let svc = service(&store);
        svc.add_subscription(1, "https://example.com/feed").await.unwrap();

        let err = svc
            .add_subscription(1, "https://example.com/feed")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadySubscribed));

        // a second subscriber shares the source
        let (source, _) = svc.add_subscription(2, "https://example.com/feed").await.unwrap();
        assert_eq!(store.list_sources().await.unwrap().len(), 1);
        assert_eq!(store.count_by_source(source.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_or_unsafe_feeds_rejected() {
        let store = MemoryStore::new();
        let svc = service(&store);

        assert!(matches!(
            svc.add_subscription(1, "https://example.com/broken").await,
            Err(ServiceError::Fetch(_))
        ));
        assert!(matches!(
            svc.add_subscription(1, "http://127.0.0.1/feed").await,
            Err(ServiceError::InvalidUrl(_))
        ));
        assert!(store.list_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_orphaned_source() {
        let store = MemoryStore::new();
        let svc = service(&store);
        let (source, _) = svc.add_subscription(1, "https://example.com/feed").await.unwrap();
        svc.add_subscription(2, "https://example.com/feed").await.unwrap();

        svc.unsubscribe(1, source.id).await.unwrap();
        assert!(store.get_source(source.id).await.is_ok());

        svc.unsubscribe(2, source.id).await.unwrap();
        assert!(matches!(
            store.get_source(source.id).await,
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            svc.unsubscribe(2, source.id).await,
            Err(ServiceError::NotSubscribed)
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_all() {
        let store = MemoryStore::new();
        let svc = service(&store);
        svc.add_subscription(1, "https://example.com/feed").await.unwrap();
        svc.add_subscription(1, "https://example.org/feed").await.unwrap();

        assert_eq!(svc.unsubscribe_all(1).await.unwrap(), 2);
        assert!(store.list_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let store = MemoryStore::new();
        let svc = service(&store);
        let (source, _) = svc.add_subscription(1, "https://example.com/feed").await.unwrap();

        svc.pause_source(source.id).await.unwrap();
        let paused = store.get_source(source.id).await.unwrap();
        assert_eq!(paused.error_count, 5);
        assert!(!paused.is_enabled(5));

        svc.resume_source(source.id).await.unwrap();
        assert_eq!(store.get_source(source.id).await.unwrap().error_count, 0);

        assert_eq!(svc.pause_all(1).await.unwrap(), 1);
        assert!(!store.get_source(source.id).await.unwrap().is_enabled(5));
        assert_eq!(svc.activate_all(1).await.unwrap(), 1);
        assert!(store.get_source(source.id).await.unwrap().is_enabled(5));
    }

    #[tokio::test]
    async fn test_update_settings_and_language() {
        let store = MemoryStore::new();
        let svc = service(&store);
        let (source, _) = svc.add_subscription(1, "https://example.com/feed").await.unwrap();

        let settings = SubscriptionSettings {
            interval: 30,
            tag: "#news".into(),
            enable_notification: false,
            enable_telegraph: false,
        };
        svc.update_settings(1, source.id, settings.clone()).await.unwrap();
        assert_eq!(
            store.get_subscription(1, source.id).await.unwrap().settings,
            settings
        );

        svc.set_language(1, "zh").await.unwrap();
        assert_eq!(store.get_user(1).await.unwrap().language_code, "zh");
    }

    #[tokio::test]
    async fn test_pause_unknown_source() {
        let store = MemoryStore::new();
        assert!(matches!(
            service(&store).pause_source(99).await,
            Err(ServiceError::Storage(StorageError::NotFound))
        ));
    }
}
