//! Lesson API routes
//!
//! Lessons are authored through this REST surface (the web app), while
//! devices sync cards and review progress through the sync endpoint. Create
//! and update take multipart forms so audio/PDF attachments ride along with
//! the text fields.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::{now_ms, Lesson, LessonRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the lessons router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_lessons))
        .route("/", post(create_lesson))
        .route("/trash", get(list_trash))
        .route("/:id", put(update_lesson))
        .route("/:id", delete(delete_lesson))
        .route("/:id/restore", post(restore_lesson))
}

/// Fields collected from a lesson multipart form
#[derive(Default)]
struct LessonForm {
    title: Option<String>,
    description: Option<String>,
    markdown: Option<String>,
    tags: Option<String>,
    audio_url: Option<String>,
    pdf_url: Option<String>,
}

impl LessonForm {
    /// Drain the multipart stream, saving any attachments for `lesson_id`
    async fn collect(
        state: &AppState,
        lesson_id: &str,
        mut multipart: Multipart,
    ) -> Result<Self> {
        let mut form = LessonForm::default();

        while let Some(field) = multipart.next_field().await? {
            match field.name().unwrap_or("") {
                "title" => form.title = Some(field.text().await?),
                "description" => form.description = Some(field.text().await?),
                "markdown" => form.markdown = Some(field.text().await?),
                "tags" => form.tags = Some(field.text().await?),
                "audio" => {
                    let filename = field.file_name().map(str::to_owned);
                    let data = field.bytes().await?;
                    let url = state
                        .uploads()
                        .save(lesson_id, "audio", filename.as_deref(), &data)
                        .await?;
                    form.audio_url = Some(url);
                }
                "pdf" => {
                    let filename = field.file_name().map(str::to_owned);
                    let data = field.bytes().await?;
                    let url = state
                        .uploads()
                        .save(lesson_id, "pdf", filename.as_deref(), &data)
                        .await?;
                    form.pdf_url = Some(url);
                }
                _ => {}
            }
        }

        Ok(form)
    }
}

fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_owned)
        .collect()
}

async fn list_lessons(State(state): State<AppState>, user: AuthUser) -> Result<Json<Vec<Lesson>>> {
    let lessons = LessonRepository::new(state.db())
        .list_live(&user.user_id)
        .await?;
    Ok(Json(lessons))
}

async fn create_lesson(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<impl IntoResponse> {
    let lesson_id = Uuid::new_v4().to_string();
    let form = LessonForm::collect(&state, &lesson_id, multipart).await?;

    let title = form
        .title
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("Title is required".to_string()))?;

    let now = now_ms();
    let lesson = Lesson {
        id: lesson_id,
        user_id: user.user_id,
        title,
        description: form.description.unwrap_or_default(),
        audio_url: form.audio_url.unwrap_or_default(),
        pdf_url: form.pdf_url.unwrap_or_default(),
        markdown_content: form.markdown.unwrap_or_default(),
        tags: form.tags.as_deref().map(parse_tags).unwrap_or_default(),
        created_at: now,
        last_updated: now,
        deleted_at: 0,
        flashcards: vec![],
    };

    LessonRepository::new(state.db()).create(&lesson).await?;

    Ok((StatusCode::CREATED, Json(lesson)))
}

async fn update_lesson(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<Lesson>> {
    let repo = LessonRepository::new(state.db());
    let mut lesson = repo
        .get(&id, &user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Lesson not found".to_string()))?;

    let form = LessonForm::collect(&state, &id, multipart).await?;

    if let Some(title) = form.title.filter(|t| !t.is_empty()) {
        lesson.title = title;
    }
    // Description, markdown and tags may be cleared by the form
    lesson.description = form.description.unwrap_or_default();
    lesson.markdown_content = form.markdown.unwrap_or_default();
    lesson.tags = form.tags.as_deref().map(parse_tags).unwrap_or_default();
    if let Some(url) = form.audio_url {
        lesson.audio_url = url;
    }
    if let Some(url) = form.pdf_url {
        lesson.pdf_url = url;
    }
    lesson.last_updated = now_ms();

    repo.update(&lesson).await?;

    Ok(Json(lesson))
}

async fn delete_lesson(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let deleted = LessonRepository::new(state.db())
        .tombstone(&id, &user.user_id, now_ms())
        .await?;

    if deleted {
        Ok(Json(serde_json::json!({"message": "Lesson deleted"})))
    } else {
        Err(AppError::NotFound("Lesson not found".to_string()))
    }
}

async fn list_trash(State(state): State<AppState>, user: AuthUser) -> Result<Json<Vec<Lesson>>> {
    let lessons = LessonRepository::new(state.db())
        .list_trash(&user.user_id)
        .await?;
    Ok(Json(lessons))
}

async fn restore_lesson(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let restored = LessonRepository::new(state.db())
        .restore(&id, &user.user_id, now_ms())
        .await?;

    if restored {
        Ok(Json(serde_json::json!({"message": "Lesson restored"})))
    } else {
        Err(AppError::NotFound("Lesson not found".to_string()))
    }
}
