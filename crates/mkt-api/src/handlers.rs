//! HTTP API handlers
//!
//! Chat and session history endpoints.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mkt_core::{Exchange, ExchangeTarget, Turn, SYSTEM_PROMPT};

use crate::error::{ApiError, Result};
use crate::server::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

/// Chat request payload
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// User message
    #[serde(alias = "query")]
    pub message: String,
    /// Session to continue; a new one is created when absent
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Client-held history used to seed a new session
    #[serde(default, alias = "chat_history")]
    pub history: Option<Vec<Turn>>,
}

/// Chat response payload
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Model reply
    pub reply: String,
    /// Session ID (for subsequent requests)
    pub chat_id: String,
}

/// Response shape of the older `/chat` endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct LegacyChatResponse {
    pub response: String,
    pub chat_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewChatResponse {
    pub chat_id: String,
}

/// Full history of one session
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatHistoryResponse {
    pub chat_id: String,
    pub messages: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatListResponse {
    pub chats: Vec<ChatSummary>,
}

// ============================================================================
// Handler functions
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "marketer"
    }))
}

/// Chat endpoint - send one message and get the model's reply
pub async fn chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>> {
    let exchange = run_chat(&state, payload).await?;
    Ok(Json(ChatResponse {
        reply: exchange.reply,
        chat_id: exchange.chat_id,
    }))
}

/// `/chat` - same exchange, answered as `{response, chat_id}` for older frontends
pub async fn legacy_chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<LegacyChatResponse>> {
    let exchange = run_chat(&state, payload).await?;
    Ok(Json(LegacyChatResponse {
        response: exchange.reply,
        chat_id: exchange.chat_id,
    }))
}

async fn run_chat(
    state: &AppState,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Exchange> {
    let Json(req) = payload.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    let question = req.message.trim();
    if question.is_empty() {
        return Err(ApiError::InvalidRequest("message must not be empty".to_string()));
    }

    let chat_id = req
        .chat_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    debug!(
        "Chat request: chat_id={:?}, history={}, chars={}",
        chat_id,
        req.history.as_ref().map(Vec::len).unwrap_or(0),
        question.len()
    );

    let target = match chat_id {
        Some(id) => ExchangeTarget::Existing(id),
        None => ExchangeTarget::New {
            seed: req.history.filter(|turns| !turns.is_empty()),
        },
    };

    let model = Arc::clone(&state.model);
    let exchange = state
        .sessions
        .exchange(target, question, move |history| async move {
            model.complete(SYSTEM_PROMPT, &history, question).await
        })
        .await?;

    info!(
        "Chat reply for {} from {}: {} chars, {} turns",
        exchange.chat_id,
        state.model.model(),
        exchange.reply.len(),
        exchange.turn_count
    );

    Ok(exchange)
}

/// Start a new chat seeded with the greeting
pub async fn new_chat(State(state): State<AppState>) -> Json<NewChatResponse> {
    let session = state.sessions.create().await;
    Json(NewChatResponse {
        chat_id: session.id,
    })
}

/// Get the history of one chat
pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ChatHistoryResponse>> {
    debug!("Chat history request: {}", chat_id);

    let session = state.sessions.get(&chat_id).await?;
    Ok(Json(ChatHistoryResponse {
        chat_id: session.id,
        messages: session.turns,
        created_at: session.created_at,
    }))
}

/// List all chats
pub async fn list_chats(State(state): State<AppState>) -> Json<ChatListResponse> {
    let chats = state
        .sessions
        .list()
        .await
        .into_iter()
        .map(|summary| ChatSummary {
            chat_id: summary.id,
            created_at: summary.created_at,
            message_count: summary.turn_count,
        })
        .collect();

    Json(ChatListResponse { chats })
}
