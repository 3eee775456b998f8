pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::errors::AppError;
use crate::pipeline::handlers;
use crate::state::AppState;

async fn not_found() -> AppError {
    AppError::NotFound("no such route".to_string())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Analysis API
        .route("/api/v1/analysis", post(handlers::handle_full_analysis))
        .route(
            "/api/v1/analysis/keywords",
            post(handlers::handle_keyword_analysis),
        )
        .route(
            "/api/v1/analysis/score",
            post(handlers::handle_score_analysis),
        )
        .route(
            "/api/v1/analysis/stream",
            post(handlers::handle_stream_analysis),
        )
        .route("/api/v1/analysis/retry", post(handlers::handle_retry_stage))
        // Cover letters
        .route("/api/v1/cover-letters", post(handlers::handle_cover_letters))
        .fallback(not_found)
        .with_state(state)
}
