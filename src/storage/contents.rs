use async_trait::async_trait;
use chrono::Utc;

use super::repository::ContentRepository;
use super::schema::Database;
use super::types::{Content, ContentRow, NewContent, SourceId, StorageError};

#[async_trait]
impl ContentRepository for Database {
    async fn create_content(&self, content: NewContent) -> Result<Content, StorageError> {
        let now = Utc::now().timestamp();
        let row: ContentRow = sqlx::query_as(
            "INSERT INTO contents (source_id, hash, title, raw_link, description, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id, source_id, hash, title, raw_link, description, telegraph_url, created_at",
        )
        .bind(content.source_id)
        .bind(&content.hash)
        .bind(&content.title)
        .bind(&content.raw_link)
        .bind(&content.description)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_content())
    }

    async fn hash_exists(&self, source_id: SourceId, hash: &str) -> Result<bool, StorageError> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM contents WHERE source_id = ? AND hash = ? LIMIT 1")
                .bind(source_id)
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn attach_telegraph_url(&self, content_id: i64, url: &str) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE contents SET telegraph_url = ? WHERE id = ?")
            .bind(url)
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_by_source(&self, source_id: SourceId) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM contents WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewSource, SourceRepository};

    async fn setup() -> (Database, SourceId) {
        let db = Database::open(":memory:").await.unwrap();
        let source = db
            .create_source(NewSource {
                link: "https://example.com/feed".into(),
                title: "Example".into(),
            })
            .await
            .unwrap();
        (db, source.id)
    }

    fn new_content(source_id: SourceId, hash: &str) -> NewContent {
        NewContent {
            source_id,
            hash: hash.to_string(),
            title: "Hello".to_string(),
            raw_link: "https://example.com/hello".to_string(),
            description: "World".to_string(),
        }
    }

    #[tokio::test]
    async fn test_hash_is_unique_per_source() {
        let (db, source_id) = setup().await;
        assert!(!db.hash_exists(source_id, "abc").await.unwrap());

        db.create_content(new_content(source_id, "abc")).await.unwrap();
        assert!(db.hash_exists(source_id, "abc").await.unwrap());

        let err = db
            .create_content(new_content(source_id, "abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists));
    }

    #[tokio::test]
    async fn test_attach_telegraph_url() {
        let (db, source_id) = setup().await;
        let content = db.create_content(new_content(source_id, "abc")).await.unwrap();
        assert_eq!(content.telegraph_url, None);

        db.attach_telegraph_url(content.id, "https://telegra.ph/Hello-01-01")
            .await
            .unwrap();

        let url: (Option<String>,) =
            sqlx::query_as("SELECT telegraph_url FROM contents WHERE id = ?")
                .bind(content.id)
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(url.0.as_deref(), Some("https://telegra.ph/Hello-01-01"));
    }

    #[tokio::test]
    async fn test_delete_by_source() {
        let (db, source_id) = setup().await;
        db.create_content(new_content(source_id, "a")).await.unwrap();
        db.create_content(new_content(source_id, "b")).await.unwrap();

        assert_eq!(db.delete_by_source(source_id).await.unwrap(), 2);
        assert!(!db.hash_exists(source_id, "a").await.unwrap());
    }
}
