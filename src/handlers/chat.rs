use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    error::Result,
    models::chat::{InboundEvent, OutboundMessage},
    state::AppState,
};

/// The messages the transport must deliver for one event.
#[derive(Serialize)]
pub struct ChatResponse {
    pub messages: Vec<OutboundMessage>,
}

/// Handles one inbound chat event.
///
/// Events that start a job resolve when the job is terminal, so the
/// transport should allow for the configured job timeout.
#[axum::debug_handler]
pub async fn handle_event(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let event: InboundEvent = sonic_rs::from_slice(&body)?;
    tracing::debug!("💬 Event {:?} from {}", event.kind, event.identity);

    let messages = state.conversations.handle(event).await;
    let response = sonic_rs::to_string(&ChatResponse { messages })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        response,
    )
        .into_response())
}
