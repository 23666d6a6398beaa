//! Bulk subscription from an OPML outline list.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::feed::Outline;
use crate::service::{ServiceError, SubscriptionService};
use crate::storage::SubscriberId;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Subscribe(#[from] ServiceError),
    #[error("import task failed: {0}")]
    Task(String),
}

/// Per-outline results, in completion order.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub succeeded: Vec<Outline>,
    pub failed: Vec<(Outline, ImportError)>,
}

/// Subscribes one owner to many feeds at once.
#[derive(Clone)]
pub struct BulkImportCoordinator {
    service: Arc<SubscriptionService>,
}

impl BulkImportCoordinator {
    pub fn new(service: Arc<SubscriptionService>) -> Self {
        Self { service }
    }

    /// Resolves every outline concurrently and waits for all of them.
    ///
    /// Feeds the owner already follows count as successes, so importing the
    /// same file twice reports the same outcome and changes nothing.
    pub async fn import_all(&self, outlines: Vec<Outline>, owner: SubscriberId) -> ImportReport {
        let total = outlines.len();
        let (tx, mut rx) = mpsc::channel::<(Outline, Result<(), ImportError>)>(total.max(1));
        let mut tasks = JoinSet::new();

        for outline in outlines {
            let tx = tx.clone();
            let service = Arc::clone(&self.service);
            tasks.spawn(async move {
                let result = match service.add_subscription(owner, &outline.xml_url).await {
                    Ok(_) | Err(ServiceError::AlreadySubscribed) => Ok(()),
                    Err(e) => Err(ImportError::from(e)),
                };
                // receiver lives until every sender is gone
                let _ = tx.send((outline, result)).await;
            });
        }
        drop(tx);

        let mut report = ImportReport::default();
        while let Some((outline, result)) = rx.recv().await {
            match result {
                Ok(()) => report.succeeded.push(outline),
                Err(e) => {
                    tracing::warn!(url = %outline.xml_url, error = %e, "Import failed");
                    report.failed.push((outline, e));
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Import task did not finish");
                report.failed.push((
                    Outline {
                        text: String::new(),
                        xml_url: String::new(),
                    },
                    ImportError::Task(e.to_string()),
                ));
            }
        }

        tracing::info!(
            owner,
            total,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Import finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedFetcher, FetchError, FetchedFeed};
    use crate::storage::memory::MemoryStore;
    use crate::storage::{SourceRepository, SubscriptionRepository};
    use async_trait::async_trait;

    struct TitledFeeds;

    #[async_trait]
    impl FeedFetcher for TitledFeeds {
        async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
            if url.contains("dead") {
                return Err(FetchError::Timeout);
            }
            Ok(FetchedFeed {
                title: format!("Feed at {url}"),
                ..FetchedFeed::default()
            })
        }
    }

    fn outline(url: &str) -> Outline {
        Outline {
            text: url.to_string(),
            xml_url: url.to_string(),
        }
    }

    fn coordinator(store: &MemoryStore) -> BulkImportCoordinator {
        BulkImportCoordinator::new(Arc::new(SubscriptionService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(TitledFeeds),
            100,
        )))
    }

    #[tokio::test]
    async fn test_import_reports_each_outline() {
        let store = MemoryStore::new();
        let outlines = vec![
            outline("https://a.example.com/feed"),
            outline("https://b.example.com/feed"),
            outline("https://dead.example.com/feed"),
        ];

        let report = coordinator(&store).import_all(outlines, 1).await;

        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.xml_url, "https://dead.example.com/feed");
        assert_eq!(store.list_by_subscriber(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_import_twice_is_idempotent() {
        let store = MemoryStore::new();
        let outlines = vec![
            outline("https://a.example.com/feed"),
            outline("https://b.example.com/feed"),
        ];
        let coordinator = coordinator(&store);

        coordinator.import_all(outlines.clone(), 1).await;
        let second = coordinator.import_all(outlines, 1).await;

        assert_eq!(second.succeeded.len(), 2);
        assert!(second.failed.is_empty());
        assert_eq!(store.list_sources().await.unwrap().len(), 2);
        assert_eq!(store.list_by_subscriber(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_outlines_share_one_source() {
        let store = MemoryStore::new();
        let outlines = vec![
            outline("https://a.example.com/feed"),
            outline("https://a.example.com/feed"),
        ];

        let report = coordinator(&store).import_all(outlines, 1).await;

        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(store.list_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_import() {
        let store = MemoryStore::new();
        let report = coordinator(&store).import_all(Vec::new(), 1).await;
        assert!(report.succeeded.is_empty() && report.failed.is_empty());
    }
}
