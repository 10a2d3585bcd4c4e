//! Database access
//!
//! SQLite pool setup, schema migration, and per-entity repositories.

use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

pub mod cards;
pub mod lessons;
pub mod users;

pub use cards::{CardRepository, Flashcard};
pub use lessons::{Lesson, LessonRepository};
pub use users::{ApiKey, User, UserRepository};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// All entity timestamps (`created_at`, `last_updated`, `deleted_at`) and
/// the sync watermark use this representation.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Open a connection pool for the given database URL
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Initialize the schema (idempotent)
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS api_keys (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_api_keys_user ON api_keys(user_id);

        CREATE TABLE IF NOT EXISTS lessons (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            audio_url TEXT NOT NULL DEFAULT '',
            pdf_url TEXT NOT NULL DEFAULT '',
            markdown_content TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            last_updated INTEGER NOT NULL,
            deleted_at INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_lessons_user ON lessons(user_id);
        CREATE INDEX IF NOT EXISTS idx_lessons_updated ON lessons(last_updated);

        CREATE TABLE IF NOT EXISTS flashcards (
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            front TEXT NOT NULL DEFAULT '',
            back TEXT NOT NULL DEFAULT '',
            is_user_created INTEGER NOT NULL DEFAULT 0,
            interval INTEGER NOT NULL DEFAULT 0,
            repetition INTEGER NOT NULL DEFAULT 0,
            efactor REAL NOT NULL DEFAULT 2.5,
            next_review INTEGER NOT NULL DEFAULT 0,
            last_updated INTEGER NOT NULL,
            deleted_at INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_flashcards_lesson ON flashcards(lesson_id);
        CREATE INDEX IF NOT EXISTS idx_flashcards_updated ON flashcards(last_updated);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
