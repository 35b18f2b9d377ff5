//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, patch, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - REST-ish API under `/api/v1/...`
/// - CORS (allow any origin/method/headers) - adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        // Classes and integrity
        .route("/api/v1/classes/:id", put(http::http_put_class))
        .route("/api/v1/integrity", get(http::http_get_dashboard))
        // Assignments, rubrics, submissions
        .route("/api/v1/assignments/:id", put(http::http_put_assignment))
        .route("/api/v1/assignments/:id/rubric", put(http::http_put_rubric))
        .route("/api/v1/assignments/:id/rubric/generate", post(http::http_post_rubric_generate))
        .route("/api/v1/assignments/:id/rubric/score", post(http::http_post_rubric_score))
        .route("/api/v1/assignments/:id/submissions", post(http::http_post_submission))
        .route("/api/v1/classes/:id/integrity", get(http::http_get_integrity))
        // Quizzes
        .route("/api/v1/quizzes/:id", put(http::http_put_quiz))
        .route("/api/v1/quizzes/:id/submit", post(http::http_post_quiz_submit))
        .route("/api/v1/quizzes/:id/attempt", post(http::http_post_attempt).patch(http::http_patch_attempt))
        .route("/api/v1/quizzes/:id/attempt/submit", post(http::http_post_attempt_submit))
        // Practicum
        .route("/api/v1/practicum/enrollments/:id", put(http::http_put_enrollment))
        .route("/api/v1/practicum/enrollments/:id/final", get(http::http_get_final))
        .route("/api/v1/practicum/enrollments/:id/grades", patch(http::http_patch_grade))
        .route("/api/v1/practicum/:id/calculate", post(http::http_post_calculate))
        .route("/api/v1/practicum/:id/sync-supervisor", post(http::http_post_sync_supervisor))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
