//! Web server module for handling inbound webhooks.
//!
//! This module provides the HTTP surface over the receivers:
//! - Parses form, multipart and JSON bodies into webhook parameters
//! - Verifies authenticity with the provider's receiver
//! - Transforms the payload and reports each message
//!
//! Unknown providers answer 404, forged requests 401 and malformed ones 400.

pub mod extract;
pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

pub use extract::WebhookParams;
pub use handlers::{
    error_status, health, webhook, AppState, HealthResponse, MessageSummary, WebhookResponse,
};

/// Largest accepted request body; inbound mail with attachments is bulky.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Build the router serving health checks and every provider's webhook.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/:provider", post(webhook))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
