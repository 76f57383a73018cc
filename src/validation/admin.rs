use garde::Validate;
use serde::Deserialize;

use crate::{
    error::{AppError, Result},
    models::subscription::{Identity, PlanId},
};

/// Body of `POST /api/admin/grant`.
#[derive(Debug, Deserialize, Validate)]
pub struct GrantRequest {
    #[garde(range(min = 1))]
    pub identity: Identity,
    /// Defaults to the catalog's default plan.
    #[garde(skip)]
    pub plan: Option<PlanId>,
    /// Defaults to the plan's duration.
    #[garde(range(min = 1, max = 3650))]
    pub duration_days: Option<i64>,
    #[garde(length(min = 3, max = 200))]
    pub reason: String,
}

/// Validates an admin grant request.
///
/// # Arguments
///
/// * `request` - The decoded request body.
///
/// # Returns
///
/// A `Result<()>` indicating whether the request is valid.
pub fn validate_grant_request(request: &GrantRequest) -> Result<()> {
    request
        .validate()
        .map_err(|report| AppError::Validation(report.to_string().trim().to_string()))?;

    if request.reason.trim().is_empty() {
        return Err(AppError::Validation("Reason must not be blank".to_string()));
    }

    Ok(())
}
