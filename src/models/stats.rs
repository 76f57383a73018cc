use serde::Serialize;

use crate::models::subscription::Identity;

/// Service-wide counters for operators.
///
/// `*_24h` fields cover the reporting window ending at the time of the query.
/// Revenue only counts processed payments, in minor currency units.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStats {
    pub total_generations: i64,
    pub successful_generations: i64,
    pub generations_24h: i64,
    pub successful_generations_24h: i64,
    pub avg_processing_time_ms: f64,
    pub active_subscribers: i64,
    pub processed_payments: i64,
    pub total_revenue: i64,
    pub revenue_24h: i64,
}

/// Counters for one identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserStats {
    pub identity: Identity,
    pub total_generations: i64,
    pub successful_generations: i64,
    pub avg_processing_time_ms: f64,
    pub total_payments: i64,
    pub total_paid_amount: i64,
}

/// Formats minor units the way the gateway does, e.g. `"999.00"`.
pub fn format_minor_units(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let minor = minor.unsigned_abs();
    format!("{}{}.{:02}", sign, minor / 100, minor % 100)
}
