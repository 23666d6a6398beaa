//! In-memory implementation of the repository traits.
//!
//! Used by unit and integration tests to drive the poller, fan-out and import
//! paths without SQLite. Behaves like [`Database`](super::Database) with
//! respect to uniqueness and not-found signalling, and can be told to fail
//! content writes for specific hashes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::repository::{
    ContentRepository, SourceRepository, SubscriptionRepository, UserRepository,
};
use super::types::{
    Content, NewContent, NewSource, Source, SourceId, StorageError, SubscriberId, Subscription,
    SubscriptionSettings, User,
};

#[derive(Default)]
struct Tables {
    sources: BTreeMap<SourceId, Source>,
    subscriptions: BTreeMap<i64, Subscription>,
    contents: BTreeMap<i64, Content>,
    users: BTreeMap<SubscriberId, User>,
    next_id: i64,
    failing_hashes: HashSet<String>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared in-memory store; clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `create_content` fail for this hash until cleared.
    pub fn fail_content_hash(&self, hash: &str) {
        self.lock().failing_hashes.insert(hash.to_string());
    }

    pub fn clear_content_failures(&self) {
        self.lock().failing_hashes.clear();
    }

    /// All stored content of a source, in insertion order.
    pub fn contents_of(&self, source_id: SourceId) -> Vec<Content> {
        self.lock()
            .contents
            .values()
            .filter(|c| c.source_id == source_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SourceRepository for MemoryStore {
    async fn create_source(&self, source: NewSource) -> Result<Source, StorageError> {
        let mut tables = self.lock();
        if tables.sources.values().any(|s| s.link == source.link) {
            return Err(StorageError::AlreadyExists);
        }
        let id = tables.next_id();
        let created = Source {
            id,
            link: source.link,
            title: source.title,
            error_count: 0,
            last_published_at: None,
            last_content_at: None,
            created_at: Utc::now(),
        };
        tables.sources.insert(id, created.clone());
        Ok(created)
    }

    async fn get_source(&self, id: SourceId) -> Result<Source, StorageError> {
        self.lock()
            .sources
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn get_source_by_url(&self, url: &str) -> Result<Source, StorageError> {
        self.lock()
            .sources
            .values()
            .find(|s| s.link == url)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn list_sources(&self) -> Result<Vec<Source>, StorageError> {
        Ok(self.lock().sources.values().cloned().collect())
    }

    async fn increment_error_count(&self, id: SourceId) -> Result<u32, StorageError> {
        let mut tables = self.lock();
        let source = tables.sources.get_mut(&id).ok_or(StorageError::NotFound)?;
        source.error_count = source.error_count.saturating_add(1);
        Ok(source.error_count)
    }

    async fn set_error_count(&self, id: SourceId, count: u32) -> Result<(), StorageError> {
        let mut tables = self.lock();
        let source = tables.sources.get_mut(&id).ok_or(StorageError::NotFound)?;
        source.error_count = count;
        Ok(())
    }

    async fn mark_polled(
        &self,
        id: SourceId,
        published_at: Option<DateTime<Utc>>,
        content_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let mut tables = self.lock();
        let source = tables.sources.get_mut(&id).ok_or(StorageError::NotFound)?;
        source.error_count = 0;
        if published_at.is_some() {
            source.last_published_at = published_at;
        }
        if content_at.is_some() {
            source.last_content_at = content_at;
        }
        Ok(())
    }

    async fn delete_source(&self, id: SourceId) -> Result<(), StorageError> {
        let mut tables = self.lock();
        tables.sources.remove(&id);
        tables.subscriptions.retain(|_, s| s.source_id != id);
        tables.contents.retain(|_, c| c.source_id != id);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn create_subscription(
        &self,
        subscriber_id: SubscriberId,
        source_id: SourceId,
        settings: SubscriptionSettings,
    ) -> Result<Subscription, StorageError> {
        let mut tables = self.lock();
        if tables
            .subscriptions
            .values()
            .any(|s| s.subscriber_id == subscriber_id && s.source_id == source_id)
        {
            return Err(StorageError::AlreadyExists);
        }
        let id = tables.next_id();
        let created = Subscription {
            id,
            subscriber_id,
            source_id,
            settings,
        };
        tables.subscriptions.insert(id, created.clone());
        Ok(created)
    }

    async fn get_subscription(
        &self,
        subscriber_id: SubscriberId,
        source_id: SourceId,
    ) -> Result<Subscription, StorageError> {
        self.lock()
            .subscriptions
            .values()
            .find(|s| s.subscriber_id == subscriber_id && s.source_id == source_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn list_by_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<Vec<Subscription>, StorageError> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.subscriber_id == subscriber_id)
            .cloned()
            .collect())
    }

    async fn list_by_source(&self, source_id: SourceId) -> Result<Vec<Subscription>, StorageError> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.source_id == source_id)
            .cloned()
            .collect())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        let mut tables = self.lock();
        let stored = tables
            .subscriptions
            .values_mut()
            .find(|s| {
                s.subscriber_id == subscription.subscriber_id
                    && s.source_id == subscription.source_id
            })
            .ok_or(StorageError::NotFound)?;
        stored.settings = subscription.settings.clone();
        Ok(())
    }

    async fn delete_subscription(
        &self,
        subscriber_id: SubscriberId,
        source_id: SourceId,
    ) -> Result<(), StorageError> {
        let mut tables = self.lock();
        let before = tables.subscriptions.len();
        tables
            .subscriptions
            .retain(|_, s| !(s.subscriber_id == subscriber_id && s.source_id == source_id));
        if tables.subscriptions.len() == before {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_all_by_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<u64, StorageError> {
        let mut tables = self.lock();
        let before = tables.subscriptions.len();
        tables
            .subscriptions
            .retain(|_, s| s.subscriber_id != subscriber_id);
        Ok((before - tables.subscriptions.len()) as u64)
    }

    async fn count_by_source(&self, source_id: SourceId) -> Result<u64, StorageError> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.source_id == source_id)
            .count() as u64)
    }
}

#[async_trait]
impl ContentRepository for MemoryStore {
    async fn create_content(&self, content: NewContent) -> Result<Content, StorageError> {
        let mut tables = self.lock();
        if tables.failing_hashes.contains(&content.hash) {
            return Err(StorageError::Other(format!(
                "injected failure for hash {}",
                content.hash
            )));
        }
        if tables
            .contents
            .values()
            .any(|c| c.source_id == content.source_id && c.hash == content.hash)
        {
            return Err(StorageError::AlreadyExists);
        }
        let id = tables.next_id();
        let created = Content {
            id,
            source_id: content.source_id,
            hash: content.hash,
            title: content.title,
            raw_link: content.raw_link,
            description: content.description,
            telegraph_url: None,
            created_at: Utc::now(),
        };
        tables.contents.insert(id, created.clone());
        Ok(created)
    }

    async fn hash_exists(&self, source_id: SourceId, hash: &str) -> Result<bool, StorageError> {
        Ok(self
            .lock()
            .contents
            .values()
            .any(|c| c.source_id == source_id && c.hash == hash))
    }

    async fn attach_telegraph_url(&self, content_id: i64, url: &str) -> Result<(), StorageError> {
        let mut tables = self.lock();
        let content = tables
            .contents
            .get_mut(&content_id)
            .ok_or(StorageError::NotFound)?;
        content.telegraph_url = Some(url.to_string());
        Ok(())
    }

    async fn delete_by_source(&self, source_id: SourceId) -> Result<u64, StorageError> {
        let mut tables = self.lock();
        let before = tables.contents.len();
        tables.contents.retain(|_, c| c.source_id != source_id);
        Ok((before - tables.contents.len()) as u64)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_user(&self, id: SubscriberId) -> Result<User, StorageError> {
        self.lock()
            .users
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn create_user(
        &self,
        id: SubscriberId,
        language_code: &str,
    ) -> Result<User, StorageError> {
        Ok(self
            .lock()
            .users
            .entry(id)
            .or_insert_with(|| User {
                id,
                language_code: language_code.to_string(),
            })
            .clone())
    }

    async fn set_language(
        &self,
        id: SubscriberId,
        language_code: &str,
    ) -> Result<(), StorageError> {
        self.lock().users.insert(
            id,
            User {
                id,
                language_code: language_code.to_string(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_content_failure() {
        let store = MemoryStore::new();
        let source = store
            .create_source(NewSource {
                link: "https://example.com/feed".into(),
                title: "Example".into(),
            })
            .await
            .unwrap();
        store.fail_content_hash("bad");

        let result = store
            .create_content(NewContent {
                source_id: source.id,
                hash: "bad".into(),
                title: "t".into(),
                raw_link: "l".into(),
                description: String::new(),
            })
            .await;
        assert!(matches!(result, Err(StorageError::Other(_))));
        assert!(!store.hash_exists(source.id, "bad").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_source_removes_dependents() {
        let store = MemoryStore::new();
        let source = store
            .create_source(NewSource {
                link: "https://example.com/feed".into(),
                title: "Example".into(),
            })
            .await
            .unwrap();
        store
            .create_subscription(1, source.id, SubscriptionSettings::default())
            .await
            .unwrap();

        store.delete_source(source.id).await.unwrap();
        assert_eq!(store.count_by_source(source.id).await.unwrap(), 0);
    }
}
