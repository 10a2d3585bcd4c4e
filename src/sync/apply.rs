//! Change application
//!
//! Applies one inbound change batch to server state under last-write-wins.
//! Each item is handled independently and tolerantly: an item that fails its
//! ownership check or loses its timestamp comparison is silently skipped and
//! never aborts the rest of the batch. Because every merge is keyed on
//! `last_updated`, re-applying an already-applied batch is a no-op, which is
//! what makes client retries safe.
//!
//! LWW merges are written as conditional UPDATEs (`AND last_updated < ?`) so
//! they behave as compare-and-swap under the enclosing transaction rather
//! than read-modify-write.

use sqlx::SqliteConnection;

use crate::db::now_ms;
use crate::error::Result;
use crate::sync::types::{CardProgress, ChangeSet, NewCard};

/// Apply a client's change batch for the given scope.
///
/// Runs on a plain connection so the orchestrator can hold the whole
/// exchange inside one transaction.
pub async fn apply_changes(
    conn: &mut SqliteConnection,
    user_id: &str,
    changes: &ChangeSet,
) -> Result<()> {
    tracing::debug!(
        created = changes.created_cards.len(),
        modified = changes.modified_cards.len(),
        deleted_cards = changes.deleted_card_ids.len(),
        deleted_lessons = changes.deleted_lesson_ids.len(),
        progress = changes.progress_updates.len(),
        "applying change batch"
    );

    for new_card in &changes.created_cards {
        apply_created_card(conn, user_id, new_card).await?;
    }

    for card in &changes.modified_cards {
        apply_modified_card(conn, user_id, &card.id, &card.front, &card.back, card.last_updated)
            .await?;
    }

    tombstone_cards(conn, user_id, &changes.deleted_card_ids).await?;
    tombstone_lessons(conn, user_id, &changes.deleted_lesson_ids).await?;

    for progress in &changes.progress_updates {
        apply_progress_update(conn, user_id, progress).await?;
    }

    Ok(())
}

/// Insert a client-created card, or merge it if the id already exists.
///
/// The target lesson must exist and belong to the scope; otherwise the item
/// is dropped. An existing card with the same id degrades the item to an
/// LWW merge of the full record, provided the existing card's owning lesson
/// is also in scope (an id collision against another user's card is dropped).
async fn apply_created_card(
    conn: &mut SqliteConnection,
    user_id: &str,
    new_card: &NewCard,
) -> Result<()> {
    let target_lesson: Option<(String,)> =
        sqlx::query_as("SELECT id FROM lessons WHERE id = ? AND user_id = ?")
            .bind(&new_card.lesson_id)
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;

    if target_lesson.is_none() {
        tracing::debug!(
            lesson_id = %new_card.lesson_id,
            card_id = %new_card.card.id,
            "target lesson not found in scope, dropping created card"
        );
        return Ok(());
    }

    let card = &new_card.card;
    let existing: Option<(String, i64)> =
        sqlx::query_as("SELECT lesson_id, last_updated FROM flashcards WHERE id = ?")
            .bind(&card.id)
            .fetch_optional(&mut *conn)
            .await?;

    match existing {
        Some((existing_lesson_id, stored_last_updated)) => {
            let owned: Option<(String,)> =
                sqlx::query_as("SELECT id FROM lessons WHERE id = ? AND user_id = ?")
                    .bind(&existing_lesson_id)
                    .bind(user_id)
                    .fetch_optional(&mut *conn)
                    .await?;

            if owned.is_none() {
                tracing::debug!(
                    card_id = %card.id,
                    "existing card belongs to another scope, dropping created card"
                );
                return Ok(());
            }

            if card.last_updated > stored_last_updated {
                // Merge the full record; the stored lesson_id is kept.
                sqlx::query(
                    r#"
                    UPDATE flashcards
                    SET front = ?, back = ?, is_user_created = ?, interval = ?,
                        repetition = ?, efactor = ?, next_review = ?, last_updated = ?
                    WHERE id = ? AND last_updated < ?
                    "#,
                )
                .bind(&card.front)
                .bind(&card.back)
                .bind(card.is_user_created)
                .bind(card.interval)
                .bind(card.repetition)
                .bind(card.efactor)
                .bind(card.next_review)
                .bind(card.last_updated)
                .bind(&card.id)
                .bind(card.last_updated)
                .execute(&mut *conn)
                .await?;
            }
        }
        None => {
            let last_updated = if card.last_updated > 0 {
                card.last_updated
            } else {
                now_ms()
            };

            sqlx::query(
                r#"
                INSERT INTO flashcards (id, lesson_id, front, back, is_user_created, interval,
                                        repetition, efactor, next_review, last_updated, deleted_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
                "#,
            )
            .bind(&card.id)
            .bind(&new_card.lesson_id)
            .bind(&card.front)
            .bind(&card.back)
            .bind(card.is_user_created)
            .bind(card.interval)
            .bind(card.repetition)
            .bind(card.efactor)
            .bind(card.next_review)
            .bind(last_updated)
            .execute(&mut *conn)
            .await?;
        }
    }

    Ok(())
}

/// LWW content merge: the whole front/back pair wins or loses together.
/// The timestamp comparison is strict, so ties and stale writes are no-ops.
async fn apply_modified_card(
    conn: &mut SqliteConnection,
    user_id: &str,
    card_id: &str,
    front: &str,
    back: &str,
    last_updated: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE flashcards
        SET front = ?, back = ?, last_updated = ?
        WHERE id = ? AND last_updated < ?
          AND lesson_id IN (SELECT id FROM lessons WHERE user_id = ?)
        "#,
    )
    .bind(front)
    .bind(back)
    .bind(last_updated)
    .bind(card_id)
    .bind(last_updated)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Tombstone cards owned by the scope. Deletion always wins over content
/// edits: `deleted_at` and `last_updated` are set to server time
/// unconditionally, which keeps `last_updated` monotone since server time
/// only increases.
async fn tombstone_cards(
    conn: &mut SqliteConnection,
    user_id: &str,
    card_ids: &[String],
) -> Result<()> {
    if card_ids.is_empty() {
        return Ok(());
    }

    let now = now_ms();
    let placeholders: Vec<&str> = card_ids.iter().map(|_| "?").collect();
    let sql = format!(
        r#"
        UPDATE flashcards
        SET deleted_at = ?, last_updated = ?
        WHERE id IN ({}) AND lesson_id IN (SELECT id FROM lessons WHERE user_id = ?)
        "#,
        placeholders.join(", ")
    );

    let mut query = sqlx::query(&sql).bind(now).bind(now);
    for id in card_ids {
        query = query.bind(id);
    }
    query = query.bind(user_id);

    query.execute(&mut *conn).await?;
    Ok(())
}

/// Tombstone lessons owned by the scope. Does not cascade to the lessons'
/// cards: clients treat a lesson tombstone as covering its cards.
async fn tombstone_lessons(
    conn: &mut SqliteConnection,
    user_id: &str,
    lesson_ids: &[String],
) -> Result<()> {
    if lesson_ids.is_empty() {
        return Ok(());
    }

    let now = now_ms();
    let placeholders: Vec<&str> = lesson_ids.iter().map(|_| "?").collect();
    let sql = format!(
        "UPDATE lessons SET deleted_at = ?, last_updated = ? WHERE id IN ({}) AND user_id = ?",
        placeholders.join(", ")
    );

    let mut query = sqlx::query(&sql).bind(now).bind(now);
    for id in lesson_ids {
        query = query.bind(id);
    }
    query = query.bind(user_id);

    query.execute(&mut *conn).await?;
    Ok(())
}

/// LWW merge of the scheduling state. The four fields move as one unit
/// keyed by `last_updated`; the server never computes scheduling itself.
async fn apply_progress_update(
    conn: &mut SqliteConnection,
    user_id: &str,
    progress: &CardProgress,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE flashcards
        SET interval = ?, repetition = ?, efactor = ?, next_review = ?, last_updated = ?
        WHERE id = ? AND last_updated < ?
          AND lesson_id IN (SELECT id FROM lessons WHERE user_id = ?)
        "#,
    )
    .bind(progress.interval)
    .bind(progress.repetition)
    .bind(progress.efactor)
    .bind(progress.next_review)
    .bind(progress.last_updated)
    .bind(&progress.card_id)
    .bind(progress.last_updated)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CardRepository, Flashcard, Lesson, LessonRepository};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        crate::db::migrate(&pool).await.unwrap();
        pool
    }

    async fn seed_lesson(pool: &SqlitePool, id: &str, user_id: &str, ts: i64) {
        let lesson = Lesson {
            id: id.to_string(),
            user_id: user_id.to_string(),
            title: "Lesson".to_string(),
            description: String::new(),
            audio_url: String::new(),
            pdf_url: String::new(),
            markdown_content: String::new(),
            tags: vec![],
            created_at: ts,
            last_updated: ts,
            deleted_at: 0,
            flashcards: vec![],
        };
        LessonRepository::new(pool).create(&lesson).await.unwrap();
    }

    async fn seed_card(pool: &SqlitePool, id: &str, lesson_id: &str, ts: i64) {
        let card = Flashcard {
            id: id.to_string(),
            lesson_id: lesson_id.to_string(),
            front: "front".to_string(),
            back: "back".to_string(),
            efactor: 2.5,
            last_updated: ts,
            ..Flashcard::default()
        };
        CardRepository::new(pool).create(&card).await.unwrap();
    }

    async fn apply(pool: &SqlitePool, user_id: &str, changes: &ChangeSet) {
        let mut conn = pool.acquire().await.unwrap();
        apply_changes(&mut conn, user_id, changes).await.unwrap();
    }

    async fn fetch_card(pool: &SqlitePool, id: &str) -> Flashcard {
        sqlx::query_as::<_, Flashcard>(
            "SELECT id, lesson_id, front, back, is_user_created, interval, repetition, \
             efactor, next_review, last_updated, deleted_at FROM flashcards WHERE id = ?",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    fn created(lesson_id: &str, card: Flashcard) -> ChangeSet {
        ChangeSet {
            created_cards: vec![NewCard {
                lesson_id: lesson_id.to_string(),
                card,
            }],
            ..ChangeSet::default()
        }
    }

    #[tokio::test]
    async fn test_created_card_inserted_with_client_timestamp() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;

        let card = Flashcard {
            id: "c1".to_string(),
            front: "hola".to_string(),
            last_updated: 100,
            ..Flashcard::default()
        };
        apply(&pool, "u1", &created("l1", card)).await;

        let stored = fetch_card(&pool, "c1").await;
        assert_eq!(stored.lesson_id, "l1");
        assert_eq!(stored.last_updated, 100);
        assert_eq!(stored.deleted_at, 0);
    }

    #[tokio::test]
    async fn test_created_card_without_timestamp_takes_server_time() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;

        let card = Flashcard {
            id: "c1".to_string(),
            ..Flashcard::default()
        };
        let before = now_ms();
        apply(&pool, "u1", &created("l1", card)).await;

        let stored = fetch_card(&pool, "c1").await;
        assert!(stored.last_updated >= before);
    }

    #[tokio::test]
    async fn test_created_card_dropped_for_foreign_lesson() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;

        let card = Flashcard {
            id: "c1".to_string(),
            last_updated: 100,
            ..Flashcard::default()
        };
        // u2 does not own l1; the item is dropped without error
        apply(&pool, "u2", &created("l1", card)).await;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM flashcards")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_created_card_with_existing_id_degrades_to_lww_merge() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;
        seed_card(&pool, "c1", "l1", 200).await;

        // Older duplicate is dropped
        let older = Flashcard {
            id: "c1".to_string(),
            front: "older".to_string(),
            last_updated: 150,
            ..Flashcard::default()
        };
        apply(&pool, "u1", &created("l1", older)).await;
        assert_eq!(fetch_card(&pool, "c1").await.front, "front");

        // Newer duplicate wins and merges the whole record
        let newer = Flashcard {
            id: "c1".to_string(),
            front: "newer".to_string(),
            interval: 3,
            efactor: 2.6,
            last_updated: 250,
            ..Flashcard::default()
        };
        apply(&pool, "u1", &created("l1", newer)).await;

        let stored = fetch_card(&pool, "c1").await;
        assert_eq!(stored.front, "newer");
        assert_eq!(stored.interval, 3);
        assert_eq!(stored.last_updated, 250);
    }

    #[tokio::test]
    async fn test_created_card_id_collision_across_scopes_dropped() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;
        seed_lesson(&pool, "l2", "u2", 50).await;
        seed_card(&pool, "c1", "l1", 100).await;

        // u2 submits a card reusing u1's card id under u2's own lesson
        let card = Flashcard {
            id: "c1".to_string(),
            front: "hijack".to_string(),
            last_updated: 999,
            ..Flashcard::default()
        };
        apply(&pool, "u2", &created("l2", card)).await;

        let stored = fetch_card(&pool, "c1").await;
        assert_eq!(stored.front, "front");
        assert_eq!(stored.lesson_id, "l1");
        assert_eq!(stored.last_updated, 100);
    }

    #[tokio::test]
    async fn test_modified_card_last_write_wins() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;
        seed_card(&pool, "c1", "l1", 100).await;

        // Device A writes at 200
        let device_a = ChangeSet {
            modified_cards: vec![Flashcard {
                id: "c1".to_string(),
                front: "A".to_string(),
                last_updated: 200,
                ..Flashcard::default()
            }],
            ..ChangeSet::default()
        };
        apply(&pool, "u1", &device_a).await;

        // Device B writes at 180 — dropped
        let device_b = ChangeSet {
            modified_cards: vec![Flashcard {
                id: "c1".to_string(),
                front: "B".to_string(),
                last_updated: 180,
                ..Flashcard::default()
            }],
            ..ChangeSet::default()
        };
        apply(&pool, "u1", &device_b).await;

        let stored = fetch_card(&pool, "c1").await;
        assert_eq!(stored.front, "A");
        assert_eq!(stored.last_updated, 200);
    }

    #[tokio::test]
    async fn test_modified_card_tie_is_noop() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;
        seed_card(&pool, "c1", "l1", 100).await;

        let tie = ChangeSet {
            modified_cards: vec![Flashcard {
                id: "c1".to_string(),
                front: "tie".to_string(),
                last_updated: 100,
                ..Flashcard::default()
            }],
            ..ChangeSet::default()
        };
        apply(&pool, "u1", &tie).await;

        assert_eq!(fetch_card(&pool, "c1").await.front, "front");
    }

    #[tokio::test]
    async fn test_modified_card_scope_isolation() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;
        seed_card(&pool, "c1", "l1", 100).await;

        let foreign = ChangeSet {
            modified_cards: vec![Flashcard {
                id: "c1".to_string(),
                front: "intruder".to_string(),
                last_updated: 999,
                ..Flashcard::default()
            }],
            ..ChangeSet::default()
        };
        apply(&pool, "u2", &foreign).await;

        assert_eq!(fetch_card(&pool, "c1").await.front, "front");
    }

    #[tokio::test]
    async fn test_deletion_wins_over_newer_content() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;
        // Card edited "in the future" relative to the server clock
        seed_card(&pool, "c1", "l1", i64::MAX - 1).await;

        let delete = ChangeSet {
            deleted_card_ids: vec!["c1".to_string()],
            ..ChangeSet::default()
        };
        apply(&pool, "u1", &delete).await;

        let stored = fetch_card(&pool, "c1").await;
        assert!(stored.deleted_at > 0);
    }

    #[tokio::test]
    async fn test_lesson_tombstone_does_not_cascade_to_cards() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;
        seed_card(&pool, "c1", "l1", 100).await;

        let delete = ChangeSet {
            deleted_lesson_ids: vec!["l1".to_string()],
            ..ChangeSet::default()
        };
        apply(&pool, "u1", &delete).await;

        let lesson_deleted: (i64,) =
            sqlx::query_as("SELECT deleted_at FROM lessons WHERE id = 'l1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(lesson_deleted.0 > 0);

        // The child card keeps its own tombstone state
        assert_eq!(fetch_card(&pool, "c1").await.deleted_at, 0);
    }

    #[tokio::test]
    async fn test_progress_update_merges_all_four_fields() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;
        seed_card(&pool, "c1", "l1", 100).await;

        let progress = ChangeSet {
            progress_updates: vec![CardProgress {
                card_id: "c1".to_string(),
                interval: 6,
                repetition: 2,
                efactor: 2.36,
                next_review: 700,
                last_updated: 300,
            }],
            ..ChangeSet::default()
        };
        apply(&pool, "u1", &progress).await;

        let stored = fetch_card(&pool, "c1").await;
        assert_eq!(stored.interval, 6);
        assert_eq!(stored.repetition, 2);
        assert!((stored.efactor - 2.36).abs() < f64::EPSILON);
        assert_eq!(stored.next_review, 700);
        assert_eq!(stored.last_updated, 300);
        // Content untouched
        assert_eq!(stored.front, "front");
    }

    #[tokio::test]
    async fn test_stale_progress_update_is_noop() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;
        seed_card(&pool, "c1", "l1", 400).await;

        let progress = ChangeSet {
            progress_updates: vec![CardProgress {
                card_id: "c1".to_string(),
                interval: 6,
                repetition: 2,
                efactor: 2.36,
                next_review: 700,
                last_updated: 300,
            }],
            ..ChangeSet::default()
        };
        apply(&pool, "u1", &progress).await;

        let stored = fetch_card(&pool, "c1").await;
        assert_eq!(stored.interval, 0);
        assert_eq!(stored.last_updated, 400);
    }

    #[tokio::test]
    async fn test_partial_application_bad_item_does_not_abort_batch() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;
        seed_card(&pool, "c1", "l1", 100).await;

        let mixed = ChangeSet {
            created_cards: vec![NewCard {
                lesson_id: "no-such-lesson".to_string(),
                card: Flashcard {
                    id: "c2".to_string(),
                    last_updated: 100,
                    ..Flashcard::default()
                },
            }],
            modified_cards: vec![Flashcard {
                id: "c1".to_string(),
                front: "updated".to_string(),
                last_updated: 200,
                ..Flashcard::default()
            }],
            ..ChangeSet::default()
        };
        apply(&pool, "u1", &mixed).await;

        // The bad created card was dropped, the valid modify still applied
        assert_eq!(fetch_card(&pool, "c1").await.front, "updated");
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM flashcards WHERE id = 'c2'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_idempotent_reapplication() {
        let pool = setup_test_db().await;
        seed_lesson(&pool, "l1", "u1", 50).await;

        let batch = ChangeSet {
            created_cards: vec![NewCard {
                lesson_id: "l1".to_string(),
                card: Flashcard {
                    id: "c1".to_string(),
                    front: "hola".to_string(),
                    last_updated: 100,
                    ..Flashcard::default()
                },
            }],
            modified_cards: vec![Flashcard {
                id: "c1".to_string(),
                front: "hola!".to_string(),
                last_updated: 150,
                ..Flashcard::default()
            }],
            ..ChangeSet::default()
        };

        apply(&pool, "u1", &batch).await;
        let first = fetch_card(&pool, "c1").await;

        apply(&pool, "u1", &batch).await;
        let second = fetch_card(&pool, "c1").await;

        assert_eq!(first.front, second.front);
        assert_eq!(first.last_updated, second.last_updated);
        assert_eq!(first.deleted_at, second.deleted_at);
    }
}
