use async_trait::async_trait;
use chrono::Utc;

use super::repository::UserRepository;
use super::schema::Database;
use super::types::{StorageError, SubscriberId, User};

#[async_trait]
impl UserRepository for Database {
    async fn get_user(&self, id: SubscriberId) -> Result<User, StorageError> {
        let row: (i64, String) = sqlx::query_as("SELECT id, language_code FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(User {
            id: row.0,
            language_code: row.1,
        })
    }

    async fn create_user(
        &self,
        id: SubscriberId,
        language_code: &str,
    ) -> Result<User, StorageError> {
        sqlx::query(
            "INSERT INTO users (id, language_code, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(id)
        .bind(language_code)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        self.get_user(id).await
    }

    async fn set_language(
        &self,
        id: SubscriberId,
        language_code: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO users (id, language_code, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET language_code = excluded.language_code",
        )
        .bind(id)
        .bind(language_code)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let db = Database::open(":memory:").await.unwrap();
        assert!(matches!(
            db.get_user(99).await.unwrap_err(),
            StorageError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_create_user_keeps_existing_language() {
        let db = Database::open(":memory:").await.unwrap();
        db.create_user(1, "ru").await.unwrap();
        let user = db.create_user(1, "en").await.unwrap();
        assert_eq!(user.language_code, "ru");
    }

    #[tokio::test]
    async fn test_set_language_upserts() {
        let db = Database::open(":memory:").await.unwrap();
        db.set_language(5, "de").await.unwrap();
        assert_eq!(db.get_user(5).await.unwrap().language_code, "de");

        db.set_language(5, "fr").await.unwrap();
        assert_eq!(db.get_user(5).await.unwrap().language_code, "fr");
    }
}
