#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use artbot::{
    config::Config,
    error::{AppError, JobError, Result},
    models::{
        generation::{GenerationLogEntry, JobKind, Prediction, PredictionStatus, ProviderOutput},
        payment::{PaymentEvent, Settlement},
        stats::{UsageStats, UserStats},
        subscription::{Identity, Plan, Subscription, SubscriptionGrant},
    },
    repositories::{memory::MemoryStore, store::LedgerStore},
    services::{checkout::CheckoutProvider, generation::ImageProvider},
    state::AppState,
};

pub const RESULT_URL: &str = "https://replicate.delivery/out/result.png";

/// How the fake provider finishes every job.
#[derive(Clone)]
pub enum Outcome {
    Succeed,
    Fail(String),
    Hang,
}

pub struct FakeProvider {
    outcome: Mutex<Outcome>,
    submissions: AtomicUsize,
    polls: AtomicUsize,
    last_source: Mutex<Option<String>>,
}

impl FakeProvider {
    pub fn new(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(outcome),
            submissions: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            last_source: Mutex::new(None),
        })
    }

    pub fn set_outcome(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn last_source(&self) -> Option<String> {
        self.last_source.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageProvider for FakeProvider {
    async fn create_prediction(
        &self,
        _kind: JobKind,
        _prompt: &str,
        source_image: Option<&str>,
    ) -> std::result::Result<Prediction, JobError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        *self.last_source.lock().unwrap() = source_image.map(str::to_string);
        Ok(Prediction {
            id: format!("pred_{}", n),
            status: PredictionStatus::Starting,
            output: None,
            error: None,
        })
    }

    async fn fetch_prediction(&self, id: &str) -> std::result::Result<Prediction, JobError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcome.lock().unwrap().clone();
        let (status, output, error) = match outcome {
            Outcome::Succeed => (
                PredictionStatus::Succeeded,
                Some(ProviderOutput::Many(vec![RESULT_URL.to_string()])),
                None,
            ),
            Outcome::Fail(message) => (PredictionStatus::Failed, None, Some(message)),
            Outcome::Hang => (PredictionStatus::Processing, None, None),
        };
        Ok(Prediction {
            id: id.to_string(),
            status,
            output,
            error,
        })
    }
}

pub struct FakeCheckout;

#[async_trait]
impl CheckoutProvider for FakeCheckout {
    async fn create_payment(&self, identity: Identity, plan: &Plan, _currency: &str) -> Result<String> {
        Ok(format!("https://pay.example/{}/{}", identity, plan.id))
    }
}

/// A store whose backend is always down.
pub struct DownStore;

fn down<T>() -> Result<T> {
    Err(AppError::MissingData("connection refused".to_string()))
}

#[async_trait]
impl LedgerStore for DownStore {
    async fn find_subscription(&self, _: Identity) -> Result<Option<Subscription>> {
        down()
    }
    async fn expire_if_lapsed(&self, _: Identity, _: DateTime<Utc>) -> Result<bool> {
        down()
    }
    async fn deactivate_expired(&self, _: DateTime<Utc>) -> Result<u64> {
        down()
    }
    async fn apply_grant(&self, _: &SubscriptionGrant) -> Result<Subscription> {
        down()
    }
    async fn record_payment(&self, _: &PaymentEvent) -> Result<()> {
        down()
    }
    async fn settle_payment(&self, _: &PaymentEvent, _: &SubscriptionGrant) -> Result<Settlement> {
        down()
    }
    async fn log_generation(&self, _: &GenerationLogEntry) -> Result<()> {
        down()
    }
    async fn usage_stats(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<UsageStats> {
        down()
    }
    async fn user_stats(&self, _: Identity) -> Result<UserStats> {
        down()
    }
}

pub fn config(overrides: &[(&str, &str)]) -> Config {
    let mut env: HashMap<String, String> = HashMap::new();
    env.insert("REPLICATE_API_TOKEN".to_string(), "r8_test".to_string());
    env.insert("ADMIN_IDS".to_string(), "1000".to_string());
    env.insert("ADMIN_API_TOKEN".to_string(), "admin-secret".to_string());
    for (key, value) in overrides {
        env.insert(key.to_string(), value.to_string());
    }
    Config::from_lookup(|key| env.get(key).cloned()).unwrap()
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<FakeProvider>,
}

impl TestContext {
    pub fn new(overrides: &[(&str, &str)]) -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = FakeProvider::new(Outcome::Succeed);
        let state = AppState::with_collaborators(
            &config(overrides),
            store.clone(),
            provider.clone(),
            Some(Arc::new(FakeCheckout)),
        );
        Self { state, store, provider }
    }

    pub fn without_checkout() -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = FakeProvider::new(Outcome::Succeed);
        let state = AppState::with_collaborators(&config(&[]), store.clone(), provider.clone(), None);
        Self { state, store, provider }
    }

    pub fn with_ledger_down() -> AppState {
        AppState::with_collaborators(
            &config(&[]),
            Arc::new(DownStore),
            FakeProvider::new(Outcome::Succeed),
            None,
        )
    }
}
