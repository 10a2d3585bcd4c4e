//! Sync wire types
//!
//! The synchronization exchange is a single request/response pair. The
//! client sends its last-known watermark plus everything it changed locally;
//! the server applies those changes and answers with the delta the client
//! needs plus a new watermark. Watermarks are opaque to the client: it must
//! only echo the value back unmodified on its next exchange.

use serde::{Deserialize, Serialize};

use crate::db::{Flashcard, Lesson};

/// A synchronization request: watermark + locally-made changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Watermark returned by the previous exchange; 0 means initial sync
    #[serde(rename = "lastSyncTimestamp", default)]
    pub last_sync_timestamp: i64,
    /// Changes made on the client since that watermark
    #[serde(default)]
    pub changes: ChangeSet,
}

/// One inbound batch of client-side changes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Cards created on the client, each targeting an existing lesson
    #[serde(rename = "createdCards", default)]
    pub created_cards: Vec<NewCard>,
    /// Content edits (front/back) to existing cards
    #[serde(rename = "modifiedCards", default)]
    pub modified_cards: Vec<Flashcard>,
    /// Cards deleted on the client
    #[serde(rename = "deletedCardIds", default)]
    pub deleted_card_ids: Vec<String>,
    /// Lessons deleted on the client
    #[serde(rename = "deletedLessonIds", default)]
    pub deleted_lesson_ids: Vec<String>,
    /// Scheduling-state updates from reviews done on the client
    #[serde(rename = "progressUpdates", default)]
    pub progress_updates: Vec<CardProgress>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.created_cards.is_empty()
            && self.modified_cards.is_empty()
            && self.deleted_card_ids.is_empty()
            && self.deleted_lesson_ids.is_empty()
            && self.progress_updates.is_empty()
    }
}

/// A client-created card and the lesson it belongs under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCard {
    #[serde(rename = "lessonId")]
    pub lesson_id: String,
    pub card: Flashcard,
}

/// A card's scheduling state, merged as one atomic unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardProgress {
    #[serde(rename = "cardId")]
    pub card_id: String,
    pub interval: i64,
    pub repetition: i64,
    pub efactor: f64,
    #[serde(rename = "nextReview")]
    pub next_review: i64,
    #[serde(rename = "lastUpdated")]
    pub last_updated: i64,
}

/// A synchronization response: new watermark + the delta to apply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    /// The new watermark; echo back as `lastSyncTimestamp` next time
    #[serde(rename = "serverTimestamp")]
    pub server_timestamp: i64,
    pub updates: UpdateSet,
}

/// The outbound delta bringing a client up to date
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSet {
    /// Lessons created or touched since the watermark (including lessons
    /// whose own fields are unchanged but contain a changed card), each
    /// populated only with its live cards
    pub lessons: Vec<Lesson>,
    /// Lessons tombstoned since the watermark
    #[serde(rename = "deletedLessonIds")]
    pub deleted_lesson_ids: Vec<String>,
    /// Cards tombstoned since the watermark, whether or not their owning
    /// lesson is also tombstoned
    #[serde(rename = "deletedCardIds")]
    pub deleted_card_ids: Vec<String>,
    /// Scheduling state of every live card updated since the watermark, for
    /// clients that track card-level state without re-walking lessons
    #[serde(rename = "remoteProgress")]
    pub remote_progress: Vec<CardProgress>,
}
