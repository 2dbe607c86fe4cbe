use super::AppState;
use crate::engine::EngineState;
use crate::session::ChatMessage;
use crate::usage::SessionStats;
use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::instrument;

#[derive(Serialize)]
pub struct ContextStatus {
    pub state: EngineState,
    pub ready: bool,
    pub pages: usize,
    pub chunks: usize,
    pub messages: usize,
    pub model: String,
}

#[derive(Serialize)]
pub struct MessageList {
    pub messages: Vec<ChatMessage>,
    pub count: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "ready": state.engine.is_ready() }))
}

#[instrument(skip(state))]
pub async fn context_status(State(state): State<AppState>) -> Json<ContextStatus> {
    Json(ContextStatus {
        state: state.engine.state(),
        ready: state.engine.is_ready(),
        pages: state.engine.page_count(),
        chunks: state.engine.chunk_count(),
        messages: state.session.len(),
        model: state.engine.chat_model().to_string(),
    })
}

#[instrument(skip(state))]
pub async fn list_messages(State(state): State<AppState>) -> Json<MessageList> {
    let messages = state.session.all();
    let count = messages.len();
    Json(MessageList { messages, count })
}

#[instrument(skip(state))]
pub async fn clear_messages(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.session.clear();
    Json(json!({ "status": "cleared", "messages_removed": cleared }))
}

#[instrument(skip(state))]
pub async fn usage_stats(State(state): State<AppState>) -> Json<SessionStats> {
    Json(state.usage.snapshot())
}
