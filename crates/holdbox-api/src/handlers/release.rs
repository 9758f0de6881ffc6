//! Release handler

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use holdbox_common::types::MessageRef;
use holdbox_core::ReleaseError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AppState;

/// Request body for releasing a message
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseRequest {
    /// Recipient addresses
    #[serde(rename = "To", alias = "to", default)]
    pub to: Vec<String>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn error_response(e: ReleaseError) -> (StatusCode, Json<ErrorResponse>) {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    (
        status,
        Json(ErrorResponse {
            error: e.code().to_string(),
            message: e.to_string(),
        }),
    )
}

/// Release a captured message to new recipients
///
/// POST /api/v1/message/:id/release
pub async fn release_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ReleaseRequest>,
) -> Result<&'static str, (StatusCode, Json<ErrorResponse>)> {
    let pipeline = state
        .release
        .as_ref()
        .ok_or_else(|| error_response(ReleaseError::RelayDisabled))?;

    let Some(reference) = MessageRef::parse(&id) else {
        // Recipients are checked before the message is looked up.
        pipeline.validate_recipients(&req.to).map_err(error_response)?;
        return Err(error_response(ReleaseError::NotFound(id)));
    };

    pipeline
        .release(reference, &req.to)
        .await
        .map_err(error_response)?;

    Ok("ok")
}
