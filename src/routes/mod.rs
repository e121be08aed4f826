// ============================================================================
// Axum Routes Module
// ============================================================================
//
// Structure:
// - mod.rs: Main router assembly and middleware
// - health.rs: Health check and metrics endpoints
// - messages.rs: Message submission and fetch
// - challenge.rs: Rate limit challenge endpoints
// - extractors.rs: Credentials, access key and client address extractors
//
// ============================================================================

mod challenge;
mod extractors;
mod health;
mod messages;

pub use extractors::{AuthenticatedDevice, UNIDENTIFIED_ACCESS_KEY_HEADER};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use courier_config::MAX_MULTI_RECIPIENT_BODY_SIZE;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

/// Create the main application router with all routes
pub fn create_router(app_context: Arc<AppContext>) -> Router {
    Router::new()
        // Health and monitoring
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        // Messages
        .route("/v1/messages", get(messages::get_pending_messages))
        .route(
            "/v1/messages/multi_recipient",
            put(messages::send_multi_recipient_message)
                .layer(DefaultBodyLimit::max(MAX_MULTI_RECIPIENT_BODY_SIZE)),
        )
        .route("/v1/messages/:destination", put(messages::send_message))
        // Challenges
        .route("/v1/challenge", put(challenge::answer_challenge))
        .route("/v1/challenge/push", post(challenge::request_push_challenge))
        .route("/v1/challenge/options", get(challenge::challenge_options))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(app_context)
}
