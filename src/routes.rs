use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::{handlers, middleware_layer, state::AppState};

/// `POST /api/chat/events`, behind the per-identity chat limiter.
pub fn chat_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat/events", post(handlers::chat::handle_event))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_chat,
        ))
        .with_state(state)
}

/// `POST /api/payments/webhook`.
pub fn webhook_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/payments/webhook", post(handlers::webhook::payment_webhook))
        .with_state(state)
}

/// Privileged operations. Not rate limited.
pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/admin/grant", post(handlers::admin::grant))
        .route(
            "/api/admin/subscriptions/{identity}",
            get(handlers::admin::get_subscription),
        )
        .route("/api/admin/stats", get(handlers::admin::stats))
        .route(
            "/api/admin/users/{identity}/stats",
            get(handlers::admin::user_stats),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_admin,
        ))
        .with_state(state)
}

/// Every route, without transport-level layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .merge(chat_routes(state.clone()))
        .merge(webhook_routes(state.clone()))
        .merge(admin_routes(state))
}
