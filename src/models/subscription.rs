use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque user handle issued by the chat transport.
pub type Identity = i64;

/// The subscription plans on offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanId {
    #[serde(rename = "1_month")]
    OneMonth,
    #[serde(rename = "3_months")]
    ThreeMonths,
    #[serde(rename = "1_year")]
    OneYear,
}

impl PlanId {
    /// Every plan, in display order.
    pub const ALL: [PlanId; 3] = [PlanId::OneMonth, PlanId::ThreeMonths, PlanId::OneYear];

    /// The identifier used in payment metadata and button codes.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::OneMonth => "1_month",
            PlanId::ThreeMonths => "3_months",
            PlanId::OneYear => "1_year",
        }
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1_month" => Ok(PlanId::OneMonth),
            "3_months" => Ok(PlanId::ThreeMonths),
            "1_year" => Ok(PlanId::OneYear),
            other => Err(format!("unknown plan '{}'", other)),
        }
    }
}

/// Price and duration of a plan.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: PlanId,
    /// Price in whole currency units.
    pub price: i64,
    pub duration: Duration,
    pub display_name: String,
}

impl Plan {
    /// Price in minor currency units, as reported by the gateway.
    pub fn price_minor(&self) -> i64 {
        self.price * 100
    }
}

/// The single source of plan semantics, shared by checkout and reconciliation.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
    /// ISO 4217 currency code for every plan.
    pub currency: String,
    /// The plan granted by admin activation when none is named.
    pub default_plan: PlanId,
}

impl PlanCatalog {
    /// Creates a catalog from an explicit plan list.
    pub fn new(plans: Vec<Plan>, currency: impl Into<String>, default_plan: PlanId) -> Self {
        Self {
            plans,
            currency: currency.into(),
            default_plan,
        }
    }

    /// Looks up a plan by id.
    pub fn get(&self, id: PlanId) -> Option<&Plan> {
        self.plans.iter().find(|plan| plan.id == id)
    }

    /// Iterates the plans in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Plan> {
        self.plans.iter()
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(
            vec![
                Plan {
                    id: PlanId::OneMonth,
                    price: 999,
                    duration: Duration::days(30),
                    display_name: "1 month".to_string(),
                },
                Plan {
                    id: PlanId::ThreeMonths,
                    price: 1499,
                    duration: Duration::days(90),
                    display_name: "3 months".to_string(),
                },
                Plan {
                    id: PlanId::OneYear,
                    price: 4999,
                    duration: Duration::days(365),
                    display_name: "1 year".to_string(),
                },
            ],
            "RUB",
            PlanId::OneMonth,
        )
    }
}

/// The effective subscription of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub identity: Identity,
    pub plan: PlanId,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Payment id or `admin:<reason>` of the grant that produced this row.
    pub source_reference: String,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether the subscription entitles its owner at `now`.
    pub fn covers(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_some_and(|expires_at| expires_at > now)
    }

    /// Still flagged active although the paid period is over.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.covers(now)
    }
}

/// A fully computed grant, ready to supersede the current row.
#[derive(Debug, Clone)]
pub struct SubscriptionGrant {
    pub identity: Identity,
    pub plan: PlanId,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source_reference: String,
}

impl SubscriptionGrant {
    /// The row this grant produces.
    pub fn to_subscription(&self) -> Subscription {
        Subscription {
            identity: self.identity,
            plan: self.plan,
            active: true,
            expires_at: Some(self.expires_at),
            source_reference: self.source_reference.clone(),
            updated_at: self.starts_at,
        }
    }
}
