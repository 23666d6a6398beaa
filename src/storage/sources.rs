use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::repository::SourceRepository;
use super::schema::Database;
use super::types::{NewSource, Source, SourceId, SourceRow, StorageError};

const SOURCE_COLUMNS: &str =
    "id, link, title, error_count, last_published_at, last_content_at, created_at";

#[async_trait]
impl SourceRepository for Database {
    async fn create_source(&self, source: NewSource) -> Result<Source, StorageError> {
        let now = Utc::now().timestamp();
        let row: SourceRow = sqlx::query_as(&format!(
            "INSERT INTO sources (link, title, created_at) VALUES (?, ?, ?) RETURNING {}",
            SOURCE_COLUMNS
        ))
        .bind(&source.link)
        .bind(&source.title)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_source())
    }

    async fn get_source(&self, id: SourceId) -> Result<Source, StorageError> {
        let row: SourceRow =
            sqlx::query_as(&format!("SELECT {} FROM sources WHERE id = ?", SOURCE_COLUMNS))
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.into_source())
    }

    async fn get_source_by_url(&self, url: &str) -> Result<Source, StorageError> {
        let row: SourceRow =
            sqlx::query_as(&format!("SELECT {} FROM sources WHERE link = ?", SOURCE_COLUMNS))
                .bind(url)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.into_source())
    }

    async fn list_sources(&self) -> Result<Vec<Source>, StorageError> {
        let rows: Vec<SourceRow> =
            sqlx::query_as(&format!("SELECT {} FROM sources ORDER BY id", SOURCE_COLUMNS))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(SourceRow::into_source).collect())
    }

    async fn increment_error_count(&self, id: SourceId) -> Result<u32, StorageError> {
        let result: (i64,) = sqlx::query_as(
            "UPDATE sources SET error_count = error_count + 1
             WHERE id = ? RETURNING error_count",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(result.0.max(0)).unwrap_or(u32::MAX))
    }

    async fn set_error_count(&self, id: SourceId, count: u32) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE sources SET error_count = ? WHERE id = ?")
            .bind(i64::from(count))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn mark_polled(
        &self,
        id: SourceId,
        published_at: Option<DateTime<Utc>>,
        content_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE sources SET error_count = 0,
                last_published_at = COALESCE(?, last_published_at),
                last_content_at = COALESCE(?, last_content_at)
             WHERE id = ?",
        )
        .bind(published_at.map(|t| t.timestamp()))
        .bind(content_at.map(|t| t.timestamp()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_source(&self, id: SourceId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
