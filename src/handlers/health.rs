use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};

/// Liveness check.
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"status":"healthy"}"#,
    )
}
