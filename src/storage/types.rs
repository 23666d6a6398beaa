use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned by every repository implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested row does not exist
    #[error("Record not found")]
    NotFound,

    /// A unique constraint rejected the write (duplicate link, hash or subscription)
    #[error("Record already exists")]
    AlreadyExists,

    /// Another process holds the database lock
    #[error("Database is locked by another process")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(String),
}

impl StorageError {
    /// Map a sqlx error onto the repository taxonomy.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StorageError::AlreadyExists
            }
            other => {
                let error_string = other.to_string().to_lowercase();
                // SQLITE_BUSY (5) / SQLITE_LOCKED (6)
                if error_string.contains("database is locked")
                    || error_string.contains("database table is locked")
                    || error_string.contains("sqlite_busy")
                    || error_string.contains("sqlite_locked")
                {
                    StorageError::Locked
                } else {
                    StorageError::Other(other.to_string())
                }
            }
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::from_sqlx(err)
    }
}

// ============================================================================
// Identifiers
// ============================================================================

pub type SourceId = i64;

/// Chat or channel id of a subscriber
pub type SubscriberId = i64;

// ============================================================================
// Data Structures
// ============================================================================

/// A polled feed endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: SourceId,
    pub link: String,
    pub title: String,
    /// Consecutive fetch failures (circuit breaker)
    pub error_count: u32,
    /// Publication time reported by the feed itself
    pub last_published_at: Option<DateTime<Utc>>,
    /// When a new item was last observed locally
    pub last_content_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// A source is disabled once its error counter reaches the threshold.
    pub fn is_enabled(&self, threshold: u32) -> bool {
        self.error_count < threshold
    }
}

/// Fields needed to create a source.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub link: String,
    pub title: String,
}

/// Per-subscriber delivery settings of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSettings {
    /// Poll interval override in minutes; 0 uses the configured default
    pub interval: u32,
    /// Free-text tags appended to every delivered message
    pub tag: String,
    /// When false, messages are delivered silently
    pub enable_notification: bool,
    /// Attach a preview page link when one exists
    pub enable_telegraph: bool,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            interval: 0,
            tag: String::new(),
            enable_notification: true,
            enable_telegraph: true,
        }
    }
}

/// A (subscriber, source) pairing. At most one exists per pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: i64,
    pub subscriber_id: SubscriberId,
    pub source_id: SourceId,
    pub settings: SubscriptionSettings,
}

/// One ingested, deduplicated feed item.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub id: i64,
    pub source_id: SourceId,
    pub hash: String,
    pub title: String,
    pub raw_link: String,
    pub description: String,
    pub telegraph_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to ingest a new item.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub source_id: SourceId,
    pub hash: String,
    pub title: String,
    pub raw_link: String,
    pub description: String,
}

/// A subscriber's rendering preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: SubscriberId,
    pub language_code: String,
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceRow {
    pub id: i64,
    pub link: String,
    pub title: String,
    pub error_count: i64,
    pub last_published_at: Option<i64>,
    pub last_content_at: Option<i64>,
    pub created_at: i64,
}

impl SourceRow {
    pub(crate) fn into_source(self) -> Source {
        Source {
            id: self.id,
            link: self.link,
            title: self.title,
            error_count: u32::try_from(self.error_count.max(0)).unwrap_or(u32::MAX),
            last_published_at: self.last_published_at.and_then(from_timestamp),
            last_content_at: self.last_content_at.and_then(from_timestamp),
            created_at: from_timestamp(self.created_at).unwrap_or_default(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SubscriptionRow {
    pub id: i64,
    pub user_id: i64,
    pub source_id: i64,
    pub interval: i64,
    pub tag: String,
    pub enable_notification: bool,
    pub enable_telegraph: bool,
}

impl SubscriptionRow {
    pub(crate) fn into_subscription(self) -> Subscription {
        Subscription {
            id: self.id,
            subscriber_id: self.user_id,
            source_id: self.source_id,
            settings: SubscriptionSettings {
                interval: u32::try_from(self.interval.max(0)).unwrap_or(u32::MAX),
                tag: self.tag,
                enable_notification: self.enable_notification,
                enable_telegraph: self.enable_telegraph,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ContentRow {
    pub id: i64,
    pub source_id: i64,
    pub hash: String,
    pub title: String,
    pub raw_link: String,
    pub description: String,
    pub telegraph_url: Option<String>,
    pub created_at: i64,
}

impl ContentRow {
    pub(crate) fn into_content(self) -> Content {
        Content {
            id: self.id,
            source_id: self.source_id,
            hash: self.hash,
            title: self.title,
            raw_link: self.raw_link,
            description: self.description,
            telegraph_url: self.telegraph_url,
            created_at: from_timestamp(self.created_at).unwrap_or_default(),
        }
    }
}

fn from_timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
