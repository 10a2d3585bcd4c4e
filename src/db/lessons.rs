//! Lesson database operations
//!
//! Lessons are the per-user containers flashcards live in. They are never
//! physically deleted: `deleted_at > 0` marks a tombstone so deletion can
//! propagate to devices that have not yet observed it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::cards::Flashcard;
use crate::error::Result;

/// A lesson with its live flashcards nested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    #[serde(rename = "userId", default)]
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "audioUrl", default)]
    pub audio_url: String,
    #[serde(rename = "pdfUrl", default)]
    pub pdf_url: String,
    #[serde(rename = "markdownContent", default)]
    pub markdown_content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
    #[serde(rename = "lastUpdated", default)]
    pub last_updated: i64,
    #[serde(rename = "deletedAt", default)]
    pub deleted_at: i64,
    #[serde(default)]
    pub flashcards: Vec<Flashcard>,
}

/// Raw lesson row; tags are stored as a JSON text column
#[derive(sqlx::FromRow)]
pub(crate) struct LessonRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub audio_url: String,
    pub pdf_url: String,
    pub markdown_content: String,
    pub tags: String,
    pub created_at: i64,
    pub last_updated: i64,
    pub deleted_at: i64,
}

/// Column list matching `LessonRow`
pub(crate) const LESSON_COLUMNS: &str = "id, user_id, title, description, audio_url, \
     pdf_url, markdown_content, tags, created_at, last_updated, deleted_at";

impl LessonRow {
    pub(crate) fn into_lesson(self, flashcards: Vec<Flashcard>) -> Result<Lesson> {
        let tags: Vec<String> = serde_json::from_str(&self.tags)?;

        Ok(Lesson {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            description: self.description,
            audio_url: self.audio_url,
            pdf_url: self.pdf_url,
            markdown_content: self.markdown_content,
            tags,
            created_at: self.created_at,
            last_updated: self.last_updated,
            deleted_at: self.deleted_at,
            flashcards,
        })
    }
}

/// Lesson repository
pub struct LessonRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> LessonRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new lesson
    pub async fn create(&self, lesson: &Lesson) -> Result<()> {
        let tags = serde_json::to_string(&lesson.tags)?;

        sqlx::query(
            r#"
            INSERT INTO lessons (id, user_id, title, description, audio_url, pdf_url,
                                 markdown_content, tags, created_at, last_updated, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&lesson.id)
        .bind(&lesson.user_id)
        .bind(&lesson.title)
        .bind(&lesson.description)
        .bind(&lesson.audio_url)
        .bind(&lesson.pdf_url)
        .bind(&lesson.markdown_content)
        .bind(&tags)
        .bind(lesson.created_at)
        .bind(lesson.last_updated)
        .bind(lesson.deleted_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Overwrite a lesson's mutable fields, scope-checked
    pub async fn update(&self, lesson: &Lesson) -> Result<bool> {
        let tags = serde_json::to_string(&lesson.tags)?;

        let result = sqlx::query(
            r#"
            UPDATE lessons
            SET title = ?, description = ?, audio_url = ?, pdf_url = ?,
                markdown_content = ?, tags = ?, last_updated = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&lesson.title)
        .bind(&lesson.description)
        .bind(&lesson.audio_url)
        .bind(&lesson.pdf_url)
        .bind(&lesson.markdown_content)
        .bind(&tags)
        .bind(lesson.last_updated)
        .bind(&lesson.id)
        .bind(&lesson.user_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get one lesson (any tombstone state) in scope, live cards nested
    pub async fn get(&self, id: &str, user_id: &str) -> Result<Option<Lesson>> {
        let sql = format!("SELECT {} FROM lessons WHERE id = ? AND user_id = ?", LESSON_COLUMNS);
        let row = sqlx::query_as::<_, LessonRow>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(self.pool)
            .await?;

        match row {
            Some(row) => {
                let cards = self.live_cards(std::slice::from_ref(&row.id)).await?;
                let cards = cards.into_values().flatten().collect();
                Ok(Some(row.into_lesson(cards)?))
            }
            None => Ok(None),
        }
    }

    /// List live lessons for a user, live cards nested
    pub async fn list_live(&self, user_id: &str) -> Result<Vec<Lesson>> {
        let sql = format!(
            "SELECT {} FROM lessons WHERE user_id = ? AND deleted_at = 0 ORDER BY created_at ASC",
            LESSON_COLUMNS
        );
        let rows = sqlx::query_as::<_, LessonRow>(&sql)
            .bind(user_id)
            .fetch_all(self.pool)
            .await?;

        self.attach_cards(rows).await
    }

    /// List tombstoned lessons for a user (trash view), live cards nested
    pub async fn list_trash(&self, user_id: &str) -> Result<Vec<Lesson>> {
        let sql = format!(
            "SELECT {} FROM lessons WHERE user_id = ? AND deleted_at > 0 ORDER BY deleted_at DESC",
            LESSON_COLUMNS
        );
        let rows = sqlx::query_as::<_, LessonRow>(&sql)
            .bind(user_id)
            .fetch_all(self.pool)
            .await?;

        self.attach_cards(rows).await
    }

    /// Tombstone a lesson in scope
    pub async fn tombstone(&self, id: &str, user_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE lessons SET deleted_at = ?, last_updated = ? WHERE id = ? AND user_id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Clear a lesson's tombstone. Bumps `last_updated` so peers re-learn it.
    pub async fn restore(&self, id: &str, user_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE lessons SET deleted_at = 0, last_updated = ? WHERE id = ? AND user_id = ?",
        )
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn attach_cards(&self, rows: Vec<LessonRow>) -> Result<Vec<Lesson>> {
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut cards_by_lesson = self.live_cards(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let cards = cards_by_lesson.remove(&row.id).unwrap_or_default();
                row.into_lesson(cards)
            })
            .collect()
    }

    /// Fetch live cards for a set of lessons, grouped by lesson id
    async fn live_cards(&self, lesson_ids: &[String]) -> Result<HashMap<String, Vec<Flashcard>>> {
        if lesson_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders: Vec<&str> = lesson_ids.iter().map(|_| "?").collect();
        let sql = format!(
            r#"
            SELECT id, lesson_id, front, back, is_user_created, interval, repetition,
                   efactor, next_review, last_updated, deleted_at
            FROM flashcards
            WHERE lesson_id IN ({}) AND deleted_at = 0
            "#,
            placeholders.join(", ")
        );

        let mut query = sqlx::query_as::<_, Flashcard>(&sql);
        for id in lesson_ids {
            query = query.bind(id);
        }

        let cards = query.fetch_all(self.pool).await?;

        let mut grouped: HashMap<String, Vec<Flashcard>> = HashMap::new();
        for card in cards {
            grouped.entry(card.lesson_id.clone()).or_default().push(card);
        }

        Ok(grouped)
    }
}
