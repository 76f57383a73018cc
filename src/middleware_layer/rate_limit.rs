use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sonic_rs::JsonValueTrait;

use crate::{error::AppError, models::subscription::Identity, state::AppState};

/// Chat events are small; anything larger is rejected by the handler anyway.
const MAX_EVENT_BYTES: usize = 64 * 1024;

/// Reads `identity` and whether the event is a button press from a chat event body.
fn peek_event(body_bytes: &[u8]) -> Option<(Identity, bool)> {
    let json = sonic_rs::from_slice::<sonic_rs::Value>(body_bytes).ok()?;
    let identity = json.get("identity").and_then(|v| v.as_i64())?;
    let is_button = json
        .get("kind")
        .and_then(|v| v.as_str())
        .is_some_and(|kind| kind == "button");
    Some((identity, is_button))
}

/// A middleware that rate limits chat events per identity.
///
/// Button presses and plain messages draw from separate limiters. A denied
/// event never reaches the conversation engine and yields exactly one notice.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response`.
pub async fn rate_limit_chat(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, MAX_EVENT_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return AppError::Validation("Event body too large".to_string()).into_response();
        }
    };

    if let Some((identity, is_button)) = peek_event(&body_bytes) {
        let limiter = if is_button {
            &state.button_limiter
        } else {
            &state.message_limiter
        };

        if !limiter.admit(identity, tokio::time::Instant::now()).await {
            return AppError::RateLimitExceeded(format!(
                "⏳ Too many requests. Please wait up to {} seconds and try again.",
                limiter.window().as_secs()
            ))
            .into_response();
        }
    }

    let new_req = Request::from_parts(parts, Body::from(body_bytes));
    next.run(new_req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peeks_identity_and_kind() {
        assert_eq!(peek_event(br#"{"identity":5,"kind":"button","payload":"help"}"#), Some((5, true)));
        assert_eq!(peek_event(br#"{"identity":5,"kind":"text"}"#), Some((5, false)));
        assert_eq!(peek_event(br#"{"kind":"text"}"#), None);
        assert_eq!(peek_event(b"not json"), None);
    }
}
