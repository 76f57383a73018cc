use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::{error::AppError, state::AppState};

/// Extracts the bearer token from the `Authorization` header.
fn extract_bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// A middleware that requires the admin API token.
///
/// The admin API is closed entirely when no token is configured.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response`.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin_api_token.as_ref() else {
        tracing::warn!("❌ Admin API called but ADMIN_API_TOKEN is not set");
        return AppError::Unauthorized.into_response();
    };

    let authorized = extract_bearer_token(&request)
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);

    if !authorized {
        tracing::warn!("❌ Invalid admin token");
        return AppError::Unauthorized.into_response();
    }

    next.run(request).await
}
