//! Flashcard database operations
//!
//! Cards always belong to a lesson; every mutation is scope-checked by
//! joining through the owning lesson's `user_id`. Like lessons, cards are
//! tombstoned rather than deleted.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::Result;

/// A flashcard with its spaced-repetition scheduling state.
///
/// The scheduling fields (`interval`, `repetition`, `efactor`,
/// `next_review`) are opaque to the server: clients compute them, the
/// server only merges them as a unit keyed by `last_updated`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct Flashcard {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "lessonId", default)]
    pub lesson_id: String,
    #[serde(default)]
    pub front: String,
    #[serde(default)]
    pub back: String,
    #[serde(rename = "isUserCreated", default)]
    pub is_user_created: bool,
    #[serde(default)]
    pub interval: i64,
    #[serde(default)]
    pub repetition: i64,
    #[serde(default)]
    pub efactor: f64,
    #[serde(rename = "nextReview", default)]
    pub next_review: i64,
    #[serde(rename = "lastUpdated", default)]
    pub last_updated: i64,
    #[serde(rename = "deletedAt", default)]
    pub deleted_at: i64,
}

/// Flashcard repository
pub struct CardRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CardRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new card
    pub async fn create(&self, card: &Flashcard) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flashcards (id, lesson_id, front, back, is_user_created, interval,
                                    repetition, efactor, next_review, last_updated, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&card.id)
        .bind(&card.lesson_id)
        .bind(&card.front)
        .bind(&card.back)
        .bind(card.is_user_created)
        .bind(card.interval)
        .bind(card.repetition)
        .bind(card.efactor)
        .bind(card.next_review)
        .bind(card.last_updated)
        .bind(card.deleted_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Get a card whose owning lesson belongs to the user
    pub async fn get_in_scope(&self, id: &str, user_id: &str) -> Result<Option<Flashcard>> {
        let card = sqlx::query_as::<_, Flashcard>(
            r#"
            SELECT f.id, f.lesson_id, f.front, f.back, f.is_user_created, f.interval,
                   f.repetition, f.efactor, f.next_review, f.last_updated, f.deleted_at
            FROM flashcards f
            JOIN lessons l ON l.id = f.lesson_id
            WHERE f.id = ? AND l.user_id = ?
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(card)
    }

    /// Overwrite a card's content, scope-checked through the owning lesson
    pub async fn update_content(
        &self,
        id: &str,
        user_id: &str,
        front: &str,
        back: &str,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE flashcards
            SET front = ?, back = ?, last_updated = ?
            WHERE id = ? AND lesson_id IN (SELECT id FROM lessons WHERE user_id = ?)
            "#,
        )
        .bind(front)
        .bind(back)
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Tombstone a card, scope-checked through the owning lesson
    pub async fn tombstone(&self, id: &str, user_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE flashcards
            SET deleted_at = ?, last_updated = ?
            WHERE id = ? AND lesson_id IN (SELECT id FROM lessons WHERE user_id = ?)
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
