use chrono::Utc;
use std::sync::Arc;
use crate::config::Config;
use crate::error::Result;
use crate::repositories::{memory::MemoryStore, store::{LedgerStore, PgStore}};
use crate::services::{
    checkout::{CheckoutProvider, YooKassaCheckout},
    conversation::ConversationEngine,
    generation::{ImageProvider, JobClient, ReplicateProvider},
    ledger::SubscriptionLedger,
    rate_limiter::RateLimiter,
    reconciler::PaymentReconciler,
};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// The subscription ledger.
    pub ledger: Arc<SubscriptionLedger>,
    /// The payment webhook reconciler.
    pub reconciler: Arc<PaymentReconciler>,
    /// Per-identity conversation sessions.
    pub conversations: Arc<ConversationEngine>,
    /// The limiter for text and photo messages.
    pub message_limiter: RateLimiter,
    /// The limiter for button presses.
    pub button_limiter: RateLimiter,
}

/// What one maintenance pass cleaned up.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired_subscriptions: u64,
    pub idle_rate_windows: usize,
    pub idle_sessions: usize,
}

impl AppState {
    /// Creates a new `AppState` from configuration, connecting real collaborators.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn LedgerStore> = match &config.database_url {
            Some(url) => {
                let pool = crate::db::create_pool(url)?;
                crate::db::init_schema(&pool).await?;
                tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");
                Arc::new(PgStore::new(pool))
            }
            None => {
                tracing::warn!("DATABASE_URL not set, subscriptions are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };

        let provider: Arc<dyn ImageProvider> = Arc::new(ReplicateProvider::new(config.provider.clone()));
        tracing::info!("✅ Image provider configured ({})", config.provider.model);

        let checkout: Option<Arc<dyn CheckoutProvider>> = match &config.checkout {
            Some(checkout) => {
                tracing::info!("✅ Checkout configured for shop {}", checkout.shop_id);
                Some(Arc::new(YooKassaCheckout::new(checkout.clone())))
            }
            None => {
                tracing::warn!("Checkout credentials not set, purchases are disabled");
                None
            }
        };

        Ok(Self::with_collaborators(config, store, provider, checkout))
    }

    /// Assembles the state around the given collaborators.
    pub fn with_collaborators(
        config: &Config,
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn ImageProvider>,
        checkout: Option<Arc<dyn CheckoutProvider>>,
    ) -> Self {
        let ledger = Arc::new(SubscriptionLedger::new(store, config.plans.clone()));
        let reconciler = Arc::new(PaymentReconciler::new(ledger.clone()));
        let jobs = Arc::new(JobClient::new(
            provider,
            config.provider.poll_interval,
            config.provider.min_prompt_chars,
        ));
        let conversations = Arc::new(ConversationEngine::new(
            ledger.clone(),
            jobs,
            checkout,
            config.admin_ids.clone(),
            config.provider.job_timeout,
        ));

        AppState {
            config: config.clone(),
            ledger,
            reconciler,
            conversations,
            message_limiter: RateLimiter::new(config.message_limit),
            button_limiter: RateLimiter::new(config.button_limit),
        }
    }

    /// Runs one maintenance pass: expiry sweep, limiter and session pruning.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let now = tokio::time::Instant::now();
        let report = MaintenanceReport {
            expired_subscriptions: self.ledger.sweep_expired(Utc::now()).await?,
            idle_rate_windows: self.message_limiter.purge_idle(now).await
                + self.button_limiter.purge_idle(now).await,
            idle_sessions: self.conversations.prune_idle(self.config.session_idle_ttl).await,
        };
        Ok(report)
    }
}
