use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

use crate::models::subscription::{Identity, PlanCatalog};

/// Settings of the external image provider.
#[derive(Clone)]
pub struct ProviderConfig {
    /// API token, sent as a bearer credential.
    pub api_token: Zeroizing<String>,
    /// Base URL of the provider API.
    pub base_url: String,
    /// Model slug used for both generation and editing.
    pub model: String,
    /// Delay between two status polls.
    pub poll_interval: Duration,
    /// Upper bound on how long a job may take.
    pub job_timeout: Duration,
    /// Prompts shorter than this (in characters) are rejected locally.
    pub min_prompt_chars: usize,
}

/// Credentials of the hosted checkout used by the purchase flow.
#[derive(Clone)]
pub struct CheckoutConfig {
    pub shop_id: String,
    pub secret_key: Zeroizing<String>,
    pub base_url: String,
    /// Where the payer lands after paying.
    pub return_url: String,
}

/// Sliding-window limiter settings.
#[derive(Debug, Clone, Copy)]
pub struct LimitConfig {
    pub capacity: usize,
    pub window: Duration,
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// The URL of the PostgreSQL database. Without it the ledger lives in memory.
    pub database_url: Option<String>,
    pub provider: ProviderConfig,
    /// Absent when the gateway credentials are not configured.
    pub checkout: Option<CheckoutConfig>,
    /// Limiter for free-text and photo messages.
    pub message_limit: LimitConfig,
    /// Limiter for button presses.
    pub button_limit: LimitConfig,
    /// Identities allowed to run admin chat commands.
    pub admin_ids: Vec<Identity>,
    /// Bearer token for the admin HTTP API; the API is closed when unset.
    pub admin_api_token: Option<Zeroizing<String>>,
    pub plans: PlanCatalog,
    /// Period of the maintenance task (expiry sweep, idle pruning).
    pub maintenance_interval: Duration,
    /// Sessions untouched for this long are dropped.
    pub session_idle_ttl: Duration,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_token = get("REPLICATE_API_TOKEN")
            .or_else(|| get("REPLICATE_API_KEY"))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .context("REPLICATE_API_TOKEN must be set")?;

        let provider = ProviderConfig {
            api_token: Zeroizing::new(api_token),
            base_url: get("REPLICATE_BASE_URL")
                .unwrap_or_else(|| "https://api.replicate.com/v1".to_string()),
            model: get("REPLICATE_MODEL").unwrap_or_else(|| "google/nano-banana".to_string()),
            poll_interval: Duration::from_secs(parse_or(&get, "JOB_POLL_INTERVAL_SECS", 5)?),
            job_timeout: Duration::from_secs(parse_or(&get, "JOB_TIMEOUT_SECS", 300)?),
            min_prompt_chars: parse_or(&get, "MIN_PROMPT_CHARS", 10)?,
        };

        let checkout = match (get("YOOKASSA_SHOP_ID"), get("YOOKASSA_SECRET_KEY")) {
            (Some(shop_id), Some(secret_key)) => {
                let shop_id = strip_quotes(&shop_id);
                if shop_id.is_empty() || !shop_id.chars().all(|c| c.is_ascii_digit()) {
                    anyhow::bail!("YOOKASSA_SHOP_ID must contain only digits");
                }
                Some(CheckoutConfig {
                    shop_id,
                    secret_key: Zeroizing::new(strip_quotes(&secret_key)),
                    base_url: get("YOOKASSA_BASE_URL")
                        .unwrap_or_else(|| "https://api.yookassa.ru/v3".to_string()),
                    return_url: get("RETURN_URL")
                        .filter(|url| url.starts_with("http"))
                        .unwrap_or_else(|| "https://t.me".to_string()),
                })
            }
            _ => None,
        };

        let admin_ids = match get("ADMIN_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| id.parse::<Identity>().context("Invalid ADMIN_IDS entry"))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR")
                .unwrap_or_else(|| "127.0.0.1:8000".to_string())
                .parse()
                .context("Invalid BIND_ADDR")?,
            database_url: get("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            provider,
            checkout,
            message_limit: LimitConfig {
                capacity: parse_or(&get, "MESSAGE_RATE_LIMIT", 10)?,
                window: Duration::from_secs(parse_or(&get, "MESSAGE_RATE_WINDOW_SECS", 60)?),
            },
            button_limit: LimitConfig {
                capacity: parse_or(&get, "BUTTON_RATE_LIMIT", 30)?,
                window: Duration::from_secs(parse_or(&get, "BUTTON_RATE_WINDOW_SECS", 60)?),
            },
            admin_ids,
            admin_api_token: get("ADMIN_API_TOKEN")
                .filter(|token| !token.is_empty())
                .map(Zeroizing::new),
            plans: PlanCatalog::default(),
            maintenance_interval: Duration::from_secs(parse_or(
                &get,
                "MAINTENANCE_INTERVAL_SECS",
                3600,
            )?),
            session_idle_ttl: Duration::from_secs(parse_or(&get, "SESSION_IDLE_TTL_SECS", 3600)?),
        })
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}

/// Dashboards tend to hand out credentials wrapped in quotes.
fn strip_quotes(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}
