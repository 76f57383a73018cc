use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};

use crate::{
    error::{AppError, Result},
    models::{stats::format_minor_units, subscription::Identity},
    state::AppState,
    validation::admin::{validate_grant_request, GrantRequest},
};

fn json(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Grants a subscription on behalf of an operator.
#[axum::debug_handler]
pub async fn grant(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let request: GrantRequest = sonic_rs::from_slice(&body)?;
    validate_grant_request(&request)?;

    let plans = state.ledger.plans();
    let plan_id = request.plan.unwrap_or(plans.default_plan);
    let plan = plans
        .get(plan_id)
        .ok_or_else(|| AppError::Validation(format!("Plan {} is not offered", plan_id)))?;
    let duration = request
        .duration_days
        .map(Duration::days)
        .unwrap_or(plan.duration);

    let subscription = state
        .ledger
        .grant(
            request.identity,
            plan_id,
            duration,
            format!("admin:{}", request.reason.trim()),
        )
        .await?;

    tracing::info!(
        "✅ Admin grant of {} to {} ({})",
        plan_id,
        request.identity,
        request.reason.trim()
    );

    Ok(json(StatusCode::CREATED, sonic_rs::to_string(&subscription)?))
}

/// Returns the subscription row of an identity.
#[axum::debug_handler]
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(identity): Path<Identity>,
) -> Result<Response> {
    let subscription = state.ledger.describe(identity).await?.ok_or(AppError::NotFound)?;
    let entitled = state.ledger.is_entitled(identity, Utc::now()).await?;

    let response = sonic_rs::to_string(&sonic_rs::json!({
        "identity": subscription.identity,
        "plan": subscription.plan.as_str(),
        "active": subscription.active && entitled,
        "entitled": entitled,
        "expires_at": subscription.expires_at.map(|at| at.to_rfc3339()),
        "source_reference": subscription.source_reference,
    }))?;

    Ok(json(StatusCode::OK, response))
}

/// Service-wide usage and revenue counters.
#[axum::debug_handler]
pub async fn stats(State(state): State<AppState>) -> Result<Response> {
    let stats = state.ledger.usage_stats(Utc::now()).await?;

    let response = sonic_rs::to_string(&sonic_rs::json!({
        "generations": {
            "total": stats.total_generations,
            "successful": stats.successful_generations,
            "last_24h": stats.generations_24h,
            "successful_last_24h": stats.successful_generations_24h,
            "avg_processing_time_ms": stats.avg_processing_time_ms,
        },
        "active_subscribers": stats.active_subscribers,
        "revenue": {
            "currency": state.ledger.plans().currency.as_str(),
            "processed_payments": stats.processed_payments,
            "total": format_minor_units(stats.total_revenue),
            "last_24h": format_minor_units(stats.revenue_24h),
        },
    }))?;

    Ok(json(StatusCode::OK, response))
}

/// Generation and payment counters of one identity.
#[axum::debug_handler]
pub async fn user_stats(
    State(state): State<AppState>,
    Path(identity): Path<Identity>,
) -> Result<Response> {
    let stats = state.ledger.user_stats(identity).await?;
    Ok(json(StatusCode::OK, sonic_rs::to_string(&stats)?))
}
