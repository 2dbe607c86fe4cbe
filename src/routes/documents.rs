use super::AppState;
use crate::errors::AppError;
use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::{info, instrument};

#[derive(Serialize)]
pub struct UploadResponse {
    pub status: String,
    pub pages: usize,
    pub chunks_indexed: usize,
}

/// Ingest a PDF, replacing any previously loaded document.
///
/// The conversation log is cleared so answers never mix context from the
/// outgoing document with history about it.
#[instrument(skip(state, body))]
pub async fn upload_document(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    if body.is_empty() {
        return Err(AppError::ValidationError(
            "Request body is empty; expected a PDF document".to_string(),
        ));
    }
    if body.len() > state.max_upload_bytes {
        return Err(AppError::PayloadTooLarge {
            size: body.len(),
            limit: state.max_upload_bytes,
        });
    }

    let chunks_indexed = state.engine.initialize(body.to_vec()).await?;
    let cleared = state.session.clear();
    if cleared > 0 {
        info!(cleared, "Conversation history reset for new document");
    }

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            status: "ready".to_string(),
            pages: state.engine.page_count(),
            chunks_indexed,
        }),
    ))
}
