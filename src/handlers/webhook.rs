use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::{
    error::{AppError, Result},
    services::reconciler::ReconcileOutcome,
    state::AppState,
};

fn acknowledge() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"status":"ok"}"#,
    )
        .into_response()
}

/// Receives payment gateway notifications.
///
/// Malformed notifications are acknowledged so the gateway stops
/// redelivering something that can never succeed. Ledger failures are not:
/// the gateway retries, and the payment id keeps the retry idempotent.
#[axum::debug_handler]
pub async fn payment_webhook(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    match state.reconciler.handle_event(&body).await {
        Ok(ReconcileOutcome::Granted(subscription)) => {
            tracing::info!(
                "✅ Webhook granted {} to {}",
                subscription.plan,
                subscription.identity
            );
            Ok(acknowledge())
        }
        Ok(outcome) => {
            tracing::debug!("Webhook handled: {:?}", outcome);
            Ok(acknowledge())
        }
        Err(AppError::MalformedWebhook(reason)) => {
            tracing::warn!("❌ Rejected payment notification: {}", reason);
            Ok(acknowledge())
        }
        Err(e) => Err(e),
    }
}
