//! LingoLift server
//!
//! A self-hosted server of record for language lessons and flashcards. The
//! web app authors lessons over REST; devices reconcile offline edits
//! through a single sync exchange per request (see [`sync`]).

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod sync;

pub use state::AppState;

/// Build the application router
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .nest("/health", routes::health::router())
        .nest("/auth", routes::auth::router())
        .nest("/lessons", routes::lessons::router())
        .nest("/cards", routes::cards::router())
        .nest("/sync", routes::sync::router());

    Router::new()
        .nest("/api", api)
        .nest_service("/uploads", ServeDir::new(state.uploads().dir()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
