use super::AppState;
use crate::engine::StreamEvent;
use crate::errors::AppError;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub context_pages: Vec<usize>,
    pub chunks_used: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[instrument(skip(state, payload))]
pub async fn chat(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    let query = validated_message(&payload)?;

    // Log the question first; the prompt builder skips the newest turn, so
    // the current query never appears twice in one prompt
    state.session.push_user(&query);
    let history = state.session.turns();

    let outcome = state.engine.answer(&query, &history).await;
    if outcome.success {
        state.session.push_assistant(&outcome.answer);
    }

    Ok(Json(ChatResponse {
        answer: outcome.answer,
        context_pages: outcome.context_pages,
        chunks_used: outcome.chunks_used,
        success: outcome.success,
        error: outcome.error,
    }))
}

#[instrument(skip(state, payload))]
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let query = validated_message(&payload)?;

    state.session.push_user(&query);
    let history = state.session.turns();

    let session = state.session.clone();
    let stream = state
        .engine
        .clone()
        .answer_stream(query, history)
        .map(move |event| {
            if let StreamEvent::Done { text } = &event {
                session.push_assistant(text);
            }
            Event::default().json_data(&event)
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn validated_message(payload: &ChatRequest) -> Result<String, AppError> {
    let trimmed = payload.message.trim();
    if trimmed.is_empty() {
        return Err(AppError::ValidationError(
            "Message must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}
