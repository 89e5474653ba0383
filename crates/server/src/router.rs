//! HTTP router construction.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api;
use crate::state::AppState;

/// Feedstock uploads can be large.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = match state.config.server.cors_origin.as_str() {
        "*" => CorsLayer::new().allow_origin(Any),
        origin => match origin.parse::<axum::http::HeaderValue>() {
            Ok(value) => CorsLayer::new().allow_origin(value),
            Err(_) => CorsLayer::permissive(),
        },
    }
    .allow_methods(Any)
    .allow_headers(Any);

    Router::new()
        .route("/health", get(api::health))
        .route("/convert", post(api::convert))
        .route("/ingest", post(api::ingest))
        .route("/status", get(api::status_list).post(api::status_list))
        .route("/status/{id}", get(api::status_get))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}
