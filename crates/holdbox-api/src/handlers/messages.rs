//! Message handlers

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use holdbox_common::types::MessageRef;
use holdbox_core::RawMessage;
use holdbox_storage::{MessageRepositoryTrait, StoredMessage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;
const RAW_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// List messages query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ListMessagesQuery {
    pub start: Option<i64>,
    pub limit: Option<i64>,
}

/// Message list response
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub total: i64,
    pub unread: i64,
    pub start: i64,
    pub count: usize,
    pub messages: Vec<MessageSummary>,
}

/// Message summary (for list view)
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: Uuid,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub size: i64,
    pub read: bool,
    pub created: chrono::DateTime<chrono::Utc>,
}

impl From<StoredMessage> for MessageSummary {
    fn from(msg: StoredMessage) -> Self {
        Self {
            id: msg.id,
            to: msg.to_vec(),
            message_id: msg.message_id_header,
            subject: msg.subject,
            from: msg.from_address,
            size: msg.size,
            read: msg.read,
            created: msg.created_at,
        }
    }
}

/// Mark messages read or unread; no IDs marks everything
#[derive(Debug, Deserialize)]
pub struct SetReadRequest {
    #[serde(default)]
    pub ids: Vec<Uuid>,
    pub read: bool,
}

/// Raw source query parameters
#[derive(Debug, Default, Deserialize)]
pub struct RawQuery {
    /// `1` serves the source as an `.eml` attachment
    pub dl: Option<String>,
}

/// Delete messages; no IDs deletes everything
#[derive(Debug, Default, Deserialize)]
pub struct DeleteMessagesRequest {
    #[serde(default)]
    pub ids: Vec<Uuid>,
}

/// Number of messages affected by a bulk operation
#[derive(Debug, Serialize, Deserialize)]
pub struct AffectedResponse {
    pub affected: u64,
}

fn parse_reference(id: &str) -> Result<MessageRef, StatusCode> {
    MessageRef::parse(id).ok_or_else(|| {
        warn!("Invalid message reference: {}", id);
        StatusCode::NOT_FOUND
    })
}

fn database_error(e: holdbox_common::Error) -> StatusCode {
    error!("Database error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

/// List messages, newest first
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<MessageListResponse>, StatusCode> {
    let start = query.start.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let total = state.messages.count().await.map_err(database_error)?;
    let unread = state.messages.count_unread().await.map_err(database_error)?;
    let messages = state
        .messages
        .list(limit, start)
        .await
        .map_err(database_error)?;

    let messages: Vec<MessageSummary> = messages.into_iter().map(Into::into).collect();

    Ok(Json(MessageListResponse {
        total,
        unread,
        start,
        count: messages.len(),
        messages,
    }))
}

/// Get a single message summary
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageSummary>, StatusCode> {
    let reference = parse_reference(&id)?;

    let message = state
        .messages
        .resolve(reference)
        .await
        .map_err(database_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(message.into()))
}

async fn load_raw(state: &AppState, id: &str) -> Result<Vec<u8>, StatusCode> {
    let reference = parse_reference(id)?;

    state
        .messages
        .load_raw(reference)
        .await
        .map_err(database_error)?
        .ok_or(StatusCode::NOT_FOUND)
}

/// Original message source, optionally as a download
pub async fn get_raw(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Response, StatusCode> {
    if query.dl.as_deref() != Some("1") {
        let raw = load_raw(&state, &id).await?;
        return Ok(([(header::CONTENT_TYPE, RAW_CONTENT_TYPE)], raw).into_response());
    }

    // Downloads are named after the stored id, also for `latest`.
    let message = state
        .messages
        .resolve(parse_reference(&id)?)
        .await
        .map_err(database_error)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let raw = state
        .messages
        .load_raw(MessageRef::Id(message.id))
        .await
        .map_err(database_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let disposition = format!("attachment; filename=\"{}.eml\"", message.id);
    Ok((
        [
            (header::CONTENT_TYPE, RAW_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        raw,
    )
        .into_response())
}

/// Message headers as name to values, in source order per name
pub async fn get_headers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BTreeMap<String, Vec<String>>>, StatusCode> {
    let raw = load_raw(&state, &id).await?;

    let message = RawMessage::parse(&raw).map_err(|e| {
        warn!("Cannot read headers of {}: {}", id, e);
        StatusCode::UNPROCESSABLE_ENTITY
    })?;

    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in message.fields() {
        headers.entry(name.to_string()).or_default().push(value);
    }

    Ok(Json(headers))
}

/// Mark messages read or unread
pub async fn set_read(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetReadRequest>,
) -> Result<Json<AffectedResponse>, StatusCode> {
    let affected = if req.ids.is_empty() {
        state.messages.set_all_read(req.read).await
    } else {
        state.messages.set_read(&req.ids, req.read).await
    }
    .map_err(database_error)?;

    info!(affected, read = req.read, "Updated read status");
    Ok(Json(AffectedResponse { affected }))
}

/// Delete messages
pub async fn delete_messages(
    State(state): State<Arc<AppState>>,
    body: Option<Json<DeleteMessagesRequest>>,
) -> Result<Json<AffectedResponse>, StatusCode> {
    let Json(req) = body.unwrap_or_default();

    let affected = if req.ids.is_empty() {
        state.messages.delete_all().await
    } else {
        state.messages.delete(&req.ids).await
    }
    .map_err(database_error)?;

    info!(affected, "Deleted messages");
    Ok(Json(AffectedResponse { affected }))
}
