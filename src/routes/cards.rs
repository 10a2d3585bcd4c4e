//! Flashcard API routes
//!
//! Direct card CRUD for the web app. Devices normally create and edit cards
//! through the sync endpoint instead.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::{now_ms, CardRepository, Flashcard, LessonRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

const DEFAULT_EFACTOR: f64 = 2.5;

/// Create the cards router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_card))
        .route("/:id", put(update_card))
        .route("/:id", delete(delete_card))
}

async fn create_card(
    State(state): State<AppState>,
    user: AuthUser,
    Json(mut card): Json<Flashcard>,
) -> Result<impl IntoResponse> {
    if card.id.is_empty() {
        card.id = Uuid::new_v4().to_string();
    }
    if card.lesson_id.is_empty() {
        return Err(AppError::BadRequest("lessonId is required".to_string()));
    }

    // Verify the target lesson belongs to the caller
    LessonRepository::new(state.db())
        .get(&card.lesson_id, &user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Lesson not found".to_string()))?;

    let now = now_ms();
    card.last_updated = now;
    card.deleted_at = 0;
    if card.interval == 0 {
        // Fresh scheduling state
        card.repetition = 0;
        card.efactor = DEFAULT_EFACTOR;
        card.next_review = now;
    }

    CardRepository::new(state.db()).create(&card).await?;

    Ok((StatusCode::CREATED, Json(card)))
}

#[derive(Debug, Deserialize)]
struct UpdateCardRequest {
    #[serde(default)]
    front: String,
    #[serde(default)]
    back: String,
}

async fn update_card(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateCardRequest>,
) -> Result<Json<serde_json::Value>> {
    let updated = CardRepository::new(state.db())
        .update_content(&id, &user.user_id, &req.front, &req.back, now_ms())
        .await?;

    if updated {
        Ok(Json(serde_json::json!({"message": "Card updated"})))
    } else {
        Err(AppError::NotFound("Card not found".to_string()))
    }
}

async fn delete_card(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let deleted = CardRepository::new(state.db())
        .tombstone(&id, &user.user_id, now_ms())
        .await?;

    if deleted {
        Ok(Json(serde_json::json!({"message": "Card deleted"})))
    } else {
        Err(AppError::NotFound("Card not found".to_string()))
    }
}
