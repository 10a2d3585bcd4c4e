//! User and API key database operations

use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::now_ms;
use crate::error::Result;

/// Registered user account
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// Device API key
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub key: String,
    pub name: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// User repository
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user account
    pub async fn create(&self, username: &str, password_hash: &str) -> Result<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now_ms(),
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(user)
    }

    /// Mint a new API key for a user
    pub async fn create_api_key(&self, user_id: &str, key: &str, name: &str) -> Result<ApiKey> {
        let api_key = ApiKey {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            key: key.to_string(),
            name: name.to_string(),
            created_at: now_ms(),
        };

        sqlx::query(
            r#"
            INSERT INTO api_keys (id, user_id, key, name, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&api_key.id)
        .bind(&api_key.user_id)
        .bind(&api_key.key)
        .bind(&api_key.name)
        .bind(api_key.created_at)
        .execute(self.pool)
        .await?;

        Ok(api_key)
    }

    /// Resolve an API key to its record, if it exists
    pub async fn find_api_key(&self, key: &str) -> Result<Option<ApiKey>> {
        let api_key = sqlx::query_as::<_, ApiKey>(
            "SELECT id, user_id, key, name, created_at FROM api_keys WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(self.pool)
        .await?;

        Ok(api_key)
    }

    pub async fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT id, user_id, key, name, created_at
            FROM api_keys
            WHERE user_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(keys)
    }

    /// Revoke an API key owned by the user
    pub async fn delete_api_key(&self, id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
