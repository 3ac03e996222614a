//! Route definitions
//!
//! Defines all HTTP API endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{chat, get_chat, health, legacy_chat, list_chats, new_chat};
use crate::server::AppState;

/// Create the API router
pub fn routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Chat endpoint (`/chat` answers in the older `{response}` shape)
        .route("/api/chat", post(chat))
        .route("/chat", post(legacy_chat))
        // Session management
        .route("/api/chat/new", post(new_chat))
        .route("/api/chat/{chat_id}", get(get_chat))
        .route("/api/chats", get(list_chats))
}
