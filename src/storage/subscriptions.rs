use async_trait::async_trait;

use super::repository::SubscriptionRepository;
use super::schema::Database;
use super::types::{
    SourceId, StorageError, SubscriberId, Subscription, SubscriptionRow, SubscriptionSettings,
};

const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, source_id, interval, tag, enable_notification, enable_telegraph";

#[async_trait]
impl SubscriptionRepository for Database {
    async fn create_subscription(
        &self,
        subscriber_id: SubscriberId,
        source_id: SourceId,
        settings: SubscriptionSettings,
    ) -> Result<Subscription, StorageError> {
        let row: SubscriptionRow = sqlx::query_as(&format!(
            "INSERT INTO subscriptions
                (user_id, source_id, interval, tag, enable_notification, enable_telegraph)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING {}",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscriber_id)
        .bind(source_id)
        .bind(i64::from(settings.interval))
        .bind(&settings.tag)
        .bind(settings.enable_notification)
        .bind(settings.enable_telegraph)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_subscription())
    }

    async fn get_subscription(
        &self,
        subscriber_id: SubscriberId,
        source_id: SourceId,
    ) -> Result<Subscription, StorageError> {
        let row: SubscriptionRow = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = ? AND source_id = ?",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscriber_id)
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_subscription())
    }

    async fn list_by_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<Vec<Subscription>, StorageError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = ? ORDER BY id",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscriber_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(SubscriptionRow::into_subscription)
            .collect())
    }

    async fn list_by_source(&self, source_id: SourceId) -> Result<Vec<Subscription>, StorageError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE source_id = ? ORDER BY id",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(SubscriptionRow::into_subscription)
            .collect())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        let settings = &subscription.settings;
        let result = sqlx::query(
            "UPDATE subscriptions
             SET interval = ?, tag = ?, enable_notification = ?, enable_telegraph = ?
             WHERE user_id = ? AND source_id = ?",
        )
        .bind(i64::from(settings.interval))
        .bind(&settings.tag)
        .bind(settings.enable_notification)
        .bind(settings.enable_telegraph)
        .bind(subscription.subscriber_id)
        .bind(subscription.source_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_subscription(
        &self,
        subscriber_id: SubscriberId,
        source_id: SourceId,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND source_id = ?")
            .bind(subscriber_id)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_all_by_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = ?")
            .bind(subscriber_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_by_source(&self, source_id: SourceId) -> Result<u64, StorageError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count.0).unwrap_or(0))
    }
}
