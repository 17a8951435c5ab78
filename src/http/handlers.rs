//! Axum HTTP handlers for the web server
//!
//! Provides the SSE session endpoint, its message endpoint and the public metadata
//! endpoints.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::sse::{KeepAlive, KeepAliveStream, Sse},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use crate::errors::AppError;
use crate::http::sessions::SessionStream;
use crate::mcp::session::Session;
use crate::registry::AggregateHealth;
use crate::AppState;

/// Messages a session may have queued before a POST waits for room.
const INBOUND_QUEUE: usize = 32;

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub host: String,
    pub sse_endpoint: &'static str,
    pub messages_endpoint: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub session_id: Option<String>,
}

/// Aggregate health as the body. Always 200; unhealthy is a body field.
pub async fn health(State(state): State<AppState>) -> Json<AggregateHealth> {
    Json(state.dispatcher.registry().aggregate_health().await)
}

pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        host: state.dispatcher.registry().host().to_string(),
        sse_endpoint: "/sse",
        messages_endpoint: "/messages",
    })
}

/// Opens a session whose outbound messages are streamed as SSE events.
pub async fn sse(State(state): State<AppState>) -> Sse<KeepAliveStream<SessionStream>> {
    let (session, outbound) = Session::new(Arc::clone(&state.dispatcher));
    let session_id = session.id().to_string();
    let (inbound, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

    state.sessions.insert(&session_id, inbound);
    tokio::spawn(session.run(inbound_rx));
    info!(session_id = %session_id, sessions = state.sessions.len(), "sse client connected");

    Sse::new(SessionStream::new(
        Arc::clone(&state.sessions),
        &session_id,
        outbound,
    ))
    .keep_alive(KeepAlive::default())
}

/// Queues one message, or a batch, on the named session. The result arrives over
/// the session's SSE stream.
pub async fn messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let session_id = query
        .session_id
        .map(|session_id| session_id.trim().to_string())
        .filter(|session_id| !session_id.is_empty())
        .ok_or_else(|| AppError::bad_request("missing_session_id", "session_id is required"))?;

    let inbound = state.sessions.get(&session_id).ok_or_else(|| {
        AppError::not_found("unknown_session", format!("no open session {session_id}"))
    })?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| AppError::bad_request("parse_error", "request body is not valid JSON"))?;

    inbound.send(payload).await.map_err(|_| {
        AppError::not_found("session_closed", format!("session {session_id} has closed"))
    })?;

    Ok(StatusCode::ACCEPTED)
}
