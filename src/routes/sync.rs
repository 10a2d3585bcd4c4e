//! Sync API endpoint
//!
//! A single POST carrying the client's watermark and change batch; the
//! response holds the delta and the next watermark. Malformed bodies are
//! rejected before any processing, so a failed parse never advances state.

use axum::{extract::State, routing::post, Json, Router};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::state::AppState;
use crate::sync::{self, SyncRequest, SyncResponse};

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(sync_handler))
}

async fn sync_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>> {
    let response = sync::sync_exchange(state.db(), &user.user_id, &request).await?;
    Ok(Json(response))
}
