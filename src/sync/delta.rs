//! Delta computation
//!
//! Given a scope and a watermark, computes the outbound delta: lessons to
//! (re)send, tombstone id lists, and card-level progress. A lesson is
//! resent whenever any of its nested cards changed, even if the lesson
//! record itself is untouched, because clients nest cards under lessons.

use std::collections::HashMap;

use sqlx::SqliteConnection;

use crate::db::cards::Flashcard;
use crate::db::lessons::{LessonRow, LESSON_COLUMNS};
use crate::error::Result;
use crate::sync::types::{CardProgress, UpdateSet};

/// Compute the delta a client needs to catch up from watermark `since`.
///
/// `since == 0` means initial sync: the full live snapshot is returned. The
/// tombstone lists use the same `> since` comparison in that case, so a
/// fresh client is told about every tombstone; those are harmless no-ops on
/// an empty client and keep the protocol uniform.
pub async fn compute_delta(
    conn: &mut SqliteConnection,
    user_id: &str,
    since: i64,
) -> Result<UpdateSet> {
    let lessons = changed_lessons(conn, user_id, since).await?;
    let deleted_lesson_ids = deleted_lesson_ids(conn, user_id, since).await?;
    let deleted_card_ids = deleted_card_ids(conn, user_id, since).await?;
    let remote_progress = remote_progress(conn, user_id, since).await?;

    tracing::debug!(
        lessons = lessons.len(),
        deleted_lessons = deleted_lesson_ids.len(),
        deleted_cards = deleted_card_ids.len(),
        progress = remote_progress.len(),
        since,
        "computed delta"
    );

    Ok(UpdateSet {
        lessons,
        deleted_lesson_ids,
        deleted_card_ids,
        remote_progress,
    })
}

/// Live lessons the client must (re)apply: new since the watermark, touched
/// since the watermark, or containing a live card touched since the
/// watermark. Each is populated only with its live cards.
async fn changed_lessons(
    conn: &mut SqliteConnection,
    user_id: &str,
    since: i64,
) -> Result<Vec<crate::db::Lesson>> {
    let rows: Vec<LessonRow> = if since == 0 {
        let sql = format!(
            "SELECT {} FROM lessons WHERE user_id = ? AND deleted_at = 0",
            LESSON_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?
    } else {
        // The nested-card condition is a subquery so large collections do
        // not hit SQLite's bound-variable limit.
        let sql = format!(
            r#"
            SELECT {}
            FROM lessons
            WHERE user_id = ? AND deleted_at = 0
              AND (created_at > ? OR last_updated > ? OR id IN (
                    SELECT f.lesson_id
                    FROM flashcards f
                    JOIN lessons l ON l.id = f.lesson_id
                    WHERE f.last_updated > ? AND f.deleted_at = 0 AND l.user_id = ?))
            "#,
            LESSON_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(user_id)
            .bind(since)
            .bind(since)
            .bind(since)
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?
    };

    let lesson_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut cards_by_lesson = live_cards(conn, &lesson_ids).await?;

    rows.into_iter()
        .map(|row| {
            let cards = cards_by_lesson.remove(&row.id).unwrap_or_default();
            row.into_lesson(cards)
        })
        .collect()
}

async fn live_cards(
    conn: &mut SqliteConnection,
    lesson_ids: &[String],
) -> Result<HashMap<String, Vec<Flashcard>>> {
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

    let cards = query.fetch_all(&mut *conn).await?;

    let mut grouped: HashMap<String, Vec<Flashcard>> = HashMap::new();
    for card in cards {
        grouped.entry(card.lesson_id.clone()).or_default().push(card);
    }

    Ok(grouped)
}

async fn deleted_lesson_ids(
    conn: &mut SqliteConnection,
    user_id: &str,
    since: i64,
) -> Result<Vec<String>> {
    let ids: Vec<(String,)> =
        sqlx::query_as("SELECT id FROM lessons WHERE user_id = ? AND deleted_at > ?")
            .bind(user_id)
            .bind(since)
            .fetch_all(&mut *conn)
            .await?;

    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Tombstoned cards since the watermark, reported whether or not the owning
/// lesson is itself tombstoned.
async fn deleted_card_ids(
    conn: &mut SqliteConnection,
    user_id: &str,
    since: i64,
) -> Result<Vec<String>> {
    let ids: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT f.id
        FROM flashcards f
        JOIN lessons l ON l.id = f.lesson_id
        WHERE l.user_id = ? AND f.deleted_at > ?
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Scheduling state of live cards touched since the watermark. Duplicates
/// data nested in `lessons` so card-level clients can update without
/// re-walking lesson trees.
async fn remote_progress(
    conn: &mut SqliteConnection,
    user_id: &str,
    since: i64,
) -> Result<Vec<CardProgress>> {
    let cards: Vec<Flashcard> = sqlx::query_as(
        r#"
        SELECT f.id, f.lesson_id, f.front, f.back, f.is_user_created, f.interval,
               f.repetition, f.efactor, f.next_review, f.last_updated, f.deleted_at
        FROM flashcards f
        JOIN lessons l ON l.id = f.lesson_id
        WHERE l.user_id = ? AND f.last_updated > ? AND f.deleted_at = 0
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(&mut *conn)
    .await?;

    Ok(cards
        .into_iter()
        .map(|card| CardProgress {
            card_id: card.id,
            interval: card.interval,
            repetition: card.repetition,
            efactor: card.efactor,
            next_review: card.next_review,
            last_updated: card.last_updated,
        })
        .collect())
}
