//! Follow Graph Server
//!
//! Follow-relationship store served as JSON over HTTP. SQLite holds the
//! relationships; a Redis or in-process cache fronts the hot reads.

pub mod config;
pub mod handlers;
pub mod services;
pub mod storage;

use axum::{
    routing::{get, post},
    Router,
};
use services::RelationshipService;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RelationshipService>,
    pub cache_backend: &'static str,
}

/// Routes without the transport layers, which the binary adds.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    use handlers::relationships as rel;

    Router::new()
        .route("/follow", post(rel::follow))
        .route("/unfollow", post(rel::unfollow))
        .route("/is-following", get(rel::is_following))
        .route("/follow-status", get(rel::follow_status))
        .route("/users/:id/following", get(rel::following))
        .route("/users/:id/followers", get(rel::followers))
        .route("/users/:id/following/count", get(rel::following_count))
        .route("/users/:id/followers/count", get(rel::follower_count))
        .route("/users/:id/mutual/:other", get(rel::mutual))
}
