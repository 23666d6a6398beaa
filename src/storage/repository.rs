//! Capability traits the polling core talks to.
//!
//! Implemented by the SQLite [`Database`](super::Database) and by the
//! in-memory [`MemoryStore`](super::memory::MemoryStore) used in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{
    Content, NewContent, NewSource, Source, SourceId, StorageError, SubscriberId, Subscription,
    SubscriptionSettings, User,
};

#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn create_source(&self, source: NewSource) -> Result<Source, StorageError>;

    async fn get_source(&self, id: SourceId) -> Result<Source, StorageError>;

    async fn get_source_by_url(&self, url: &str) -> Result<Source, StorageError>;

    async fn list_sources(&self) -> Result<Vec<Source>, StorageError>;

    /// Adds one to the error counter and returns the new value.
    async fn increment_error_count(&self, id: SourceId) -> Result<u32, StorageError>;

    async fn set_error_count(&self, id: SourceId, count: u32) -> Result<(), StorageError>;

    /// Re-enables a source by resetting its error counter to zero.
    async fn enable_source(&self, id: SourceId) -> Result<(), StorageError> {
        self.set_error_count(id, 0).await
    }

    /// Disables a source by raising its error counter to `threshold`.
    async fn disable_source(&self, id: SourceId, threshold: u32) -> Result<(), StorageError> {
        self.set_error_count(id, threshold).await
    }

    /// Records a successful poll: resets the error counter and updates the
    /// publication markers. `None` leaves the stored marker untouched.
    async fn mark_polled(
        &self,
        id: SourceId,
        published_at: Option<DateTime<Utc>>,
        content_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;

    async fn delete_source(&self, id: SourceId) -> Result<(), StorageError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Fails with [`StorageError::AlreadyExists`] when the pair is already subscribed.
    async fn create_subscription(
        &self,
        subscriber_id: SubscriberId,
        source_id: SourceId,
        settings: SubscriptionSettings,
    ) -> Result<Subscription, StorageError>;

    async fn get_subscription(
        &self,
        subscriber_id: SubscriberId,
        source_id: SourceId,
    ) -> Result<Subscription, StorageError>;

    async fn list_by_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<Vec<Subscription>, StorageError>;

    async fn list_by_source(&self, source_id: SourceId) -> Result<Vec<Subscription>, StorageError>;

    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), StorageError>;

    async fn delete_subscription(
        &self,
        subscriber_id: SubscriberId,
        source_id: SourceId,
    ) -> Result<(), StorageError>;

    /// Removes every subscription of a subscriber, returning how many were deleted.
    async fn delete_all_by_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<u64, StorageError>;

    async fn count_by_source(&self, source_id: SourceId) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Fails with [`StorageError::AlreadyExists`] if the hash is already stored for the source.
    async fn create_content(&self, content: NewContent) -> Result<Content, StorageError>;

    async fn hash_exists(&self, source_id: SourceId, hash: &str) -> Result<bool, StorageError>;

    async fn attach_telegraph_url(&self, content_id: i64, url: &str) -> Result<(), StorageError>;

    async fn delete_by_source(&self, source_id: SourceId) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Returns [`StorageError::NotFound`] for unknown subscribers.
    async fn get_user(&self, id: SubscriberId) -> Result<User, StorageError>;

    /// Creates the user if missing; an existing user is returned unchanged.
    async fn create_user(&self, id: SubscriberId, language_code: &str)
        -> Result<User, StorageError>;

    /// Upserts the subscriber's language preference.
    async fn set_language(&self, id: SubscriberId, language_code: &str)
        -> Result<(), StorageError>;
}
