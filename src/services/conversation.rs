use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{FailureKind, JobError},
    models::{
        chat::{Action, Button, EventKind, InboundEvent, OutboundMessage},
        generation::{GenerationJob, GenerationLogEntry, JobKind},
        session::{ConversationState, Session},
        stats::format_minor_units,
        subscription::{Identity, PlanId},
    },
    services::{checkout::CheckoutProvider, generation::JobClient, ledger::SubscriptionLedger},
};

const LEDGER_DOWN: &str = "⚠️ Subscription service is temporarily unavailable. Please try again later.";

/// Sequences multi-step image requests, one session per identity.
///
/// The session lock is only held for state reads and writes, never while a
/// job is submitted or polled. Each job is tagged with the session generation
/// it started under; a result arriving after the session moved on is dropped.
pub struct ConversationEngine {
    sessions: Mutex<HashMap<Identity, Session>>,
    ledger: Arc<SubscriptionLedger>,
    jobs: Arc<JobClient>,
    checkout: Option<Arc<dyn CheckoutProvider>>,
    admin_ids: Vec<Identity>,
    job_timeout: Duration,
}

impl ConversationEngine {
    pub fn new(
        ledger: Arc<SubscriptionLedger>,
        jobs: Arc<JobClient>,
        checkout: Option<Arc<dyn CheckoutProvider>>,
        admin_ids: Vec<Identity>,
        job_timeout: Duration,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ledger,
            jobs,
            checkout,
            admin_ids,
            job_timeout,
        }
    }

    /// Handles one inbound event and returns the messages to deliver.
    ///
    /// Job-driving events resolve only once the job is terminal. An empty
    /// list means the event was superseded and nothing is to be sent.
    pub async fn handle(&self, event: InboundEvent) -> Vec<OutboundMessage> {
        let identity = event.identity;
        self.touch(identity).await;

        match event.kind {
            EventKind::Button => match event.payload.parse::<Action>() {
                Ok(action) => self.on_action(identity, action).await,
                Err(e) => {
                    tracing::warn!("Unknown button from {}: {}", identity, e);
                    vec![main_menu(identity, "Unknown action. Choose one from the menu:")]
                }
            },
            EventKind::Text => {
                let text = event.payload.trim();
                match text.strip_prefix('/') {
                    Some(command) => self.on_command(identity, command).await,
                    None => self.on_text(identity, text).await,
                }
            }
            EventKind::Photo => self.on_photo(identity, event.payload).await,
        }
    }

    /// The current state of an identity's session.
    pub async fn state_of(&self, identity: Identity) -> ConversationState {
        self.sessions
            .lock()
            .await
            .get(&identity)
            .map(|session| session.state)
            .unwrap_or_default()
    }

    /// Drops sessions untouched for `ttl` that have no job in flight.
    pub async fn prune_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.in_flight.is_some() || session.last_seen.elapsed() < ttl);
        before - sessions.len()
    }

    async fn touch(&self, identity: Identity) {
        let now = Instant::now();
        self.sessions
            .lock()
            .await
            .entry(identity)
            .or_insert_with(|| Session::new(now))
            .last_seen = now;
    }

    async fn reset(&self, identity: Identity) -> Option<String> {
        self.sessions
            .lock()
            .await
            .get_mut(&identity)
            .and_then(Session::reset)
    }

    async fn on_action(&self, identity: Identity, action: Action) -> Vec<OutboundMessage> {
        match action {
            Action::Generate => self.begin(identity, ConversationState::AwaitingGenerationPrompt).await,
            Action::Edit => self.begin(identity, ConversationState::AwaitingEditSourceImage).await,
            Action::Subscription => self.subscription_status(identity).await,
            Action::SelectPlan => vec![self.plan_list(identity, "Choose a plan:")],
            Action::BuyPlan(plan) => self.purchase(identity, plan).await,
            Action::MainMenu => {
                self.reset(identity).await;
                vec![main_menu(identity, "Main menu:")]
            }
            Action::Help => vec![help(identity)],
        }
    }

    async fn on_command(&self, identity: Identity, command: &str) -> Vec<OutboundMessage> {
        let mut parts = command.split_whitespace();
        let name = parts
            .next()
            .unwrap_or_default()
            .split('@')
            .next()
            .unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match name {
            "start" => {
                self.reset(identity).await;
                vec![main_menu(
                    identity,
                    "👋 Welcome! I can generate images from a description and edit your photos.",
                )]
            }
            "help" => vec![help(identity)],
            "subscription" => self.subscription_status(identity).await,
            "cancel" => match self.reset(identity).await {
                Some(prompt) => vec![main_menu(
                    identity,
                    &format!("Cancelled the request \"{}\". Main menu:", prompt),
                )],
                None => vec![main_menu(identity, "Cancelled. Main menu:")],
            },
            "admin_activate" => vec![self.admin_activate(identity, &args).await],
            "admin_status" => vec![self.admin_status(identity).await],
            "stats" => vec![self.own_stats(identity).await],
            _ => vec![main_menu(identity, "Unknown command. Choose an action:")],
        }
    }

    async fn on_text(&self, identity: Identity, text: &str) -> Vec<OutboundMessage> {
        match self.state_of(identity).await {
            ConversationState::Idle => vec![main_menu(identity, "Choose an action:")],
            ConversationState::AwaitingGenerationPrompt => self.drive(identity, JobKind::Generate, text).await,
            ConversationState::AwaitingEditSourceImage => vec![OutboundMessage::text(
                identity,
                "📷 Please send the photo you want to edit.",
            )],
            ConversationState::AwaitingEditPrompt => self.drive(identity, JobKind::Edit, text).await,
        }
    }

    async fn on_photo(&self, identity: Identity, reference: String) -> Vec<OutboundMessage> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(identity)
            .or_insert_with(|| Session::new(Instant::now()));

        match session.state {
            ConversationState::AwaitingEditSourceImage | ConversationState::AwaitingEditPrompt => {
                if reference.trim().is_empty() {
                    return vec![OutboundMessage::text(
                        identity,
                        "❌ Could not read the photo. Please send it again.",
                    )];
                }
                session.pending_source_image_reference = Some(reference);
                session.state = ConversationState::AwaitingEditPrompt;
                vec![OutboundMessage::text(
                    identity,
                    "✏️ Now describe what to change in the photo.",
                )]
            }
            ConversationState::AwaitingGenerationPrompt => vec![OutboundMessage::text(
                identity,
                "🎨 Please describe the image you want to create in words. To edit a photo, go back and choose ✏️ Edit.",
            )
            .with_buttons(vec![Button::new("🔙 Main menu", Action::MainMenu)])],
            ConversationState::Idle => vec![main_menu(identity, "To edit a photo, choose ✏️ Edit first.")],
        }
    }

    /// Gated entry into a multi-step flow.
    async fn begin(&self, identity: Identity, target: ConversationState) -> Vec<OutboundMessage> {
        let entitled = self.ledger.is_entitled(identity, Utc::now()).await;
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(identity)
            .or_insert_with(|| Session::new(Instant::now()));
        session.reset();

        match entitled {
            Ok(true) => {
                session.state = target;
                let prompt = match target {
                    ConversationState::AwaitingEditSourceImage => "📷 Send the photo you want to edit.",
                    _ => "🎨 Describe the image you want to create.",
                };
                vec![OutboundMessage::text(identity, prompt)
                    .with_buttons(vec![Button::new("🔙 Main menu", Action::MainMenu)])]
            }
            Ok(false) => vec![self.plan_list(
                identity,
                "🔒 This feature requires an active subscription. Choose a plan:",
            )],
            Err(e) => {
                tracing::error!("❌ Entitlement check failed for {}: {}", identity, e);
                vec![OutboundMessage::text(identity, LEDGER_DOWN)]
            }
        }
    }

    /// Submits a job for the session and waits for its outcome.
    async fn drive(&self, identity: Identity, kind: JobKind, prompt: &str) -> Vec<OutboundMessage> {
        let (generation, cancel, source) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .entry(identity)
                .or_insert_with(|| Session::new(Instant::now()));

            if let Err(e) = self
                .jobs
                .validate(kind, prompt, session.pending_source_image_reference.as_deref())
            {
                return vec![OutboundMessage::text(identity, format!("✍️ {}", validation_text(&e)))];
            }

            let source = session.pending_source_image_reference.take();
            session.state = ConversationState::Idle;
            session.pending_prompt = Some(prompt.to_string());
            let generation = session.supersede();
            let cancel = CancellationToken::new();
            session.in_flight = Some(cancel.clone());
            (generation, cancel, source)
        };

        let started = tokio::time::Instant::now();
        let result = match self.jobs.submit(kind, prompt, source.as_deref()).await {
            Ok(job) => self.jobs.await_result(job, self.job_timeout, &cancel).await,
            Err(e) => Err(e),
        };
        let elapsed = started.elapsed();

        let current = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(&identity) {
                Some(session) if session.generation == generation => {
                    session.in_flight = None;
                    session.pending_prompt = None;
                    true
                }
                _ => false,
            }
        };

        if !matches!(result, Err(JobError::Cancelled)) {
            self.log_outcome(identity, kind, prompt, &result, elapsed).await;
        }

        if !current {
            tracing::debug!("Discarding superseded {} result for {}", kind.as_str(), identity);
            return Vec::new();
        }

        match result {
            Ok(job) => vec![success_message(identity, &job)],
            Err(JobError::Cancelled) => Vec::new(),
            Err(e) => {
                tracing::warn!("❌ {} job for {} failed: {}", kind.as_str(), identity, e);
                vec![failure_message(identity, kind, &e)]
            }
        }
    }

    async fn log_outcome(
        &self,
        identity: Identity,
        kind: JobKind,
        prompt: &str,
        result: &Result<GenerationJob, JobError>,
        elapsed: Duration,
    ) {
        let entry = GenerationLogEntry {
            identity,
            kind,
            prompt: result
                .as_ref()
                .map(|job| job.input_prompt.clone())
                .unwrap_or_else(|_| prompt.trim().to_string()),
            result_reference: result.as_ref().ok().and_then(|job| job.result_reference.clone()),
            success: result.is_ok(),
            processing_time_ms: i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
            created_at: Utc::now(),
        };
        if let Err(e) = self.ledger.log_generation(&entry).await {
            tracing::warn!("Failed to log generation for {}: {}", identity, e);
        }
    }

    async fn subscription_status(&self, identity: Identity) -> Vec<OutboundMessage> {
        let entitled = match self.ledger.is_entitled(identity, Utc::now()).await {
            Ok(entitled) => entitled,
            Err(e) => {
                tracing::error!("❌ Entitlement check failed for {}: {}", identity, e);
                return vec![OutboundMessage::text(identity, LEDGER_DOWN)];
            }
        };

        let subscription = match self.ledger.describe(identity).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!("❌ Subscription lookup failed for {}: {}", identity, e);
                return vec![OutboundMessage::text(identity, LEDGER_DOWN)];
            }
        };

        match subscription.filter(|_| entitled) {
            Some(sub) => {
                let plan = self
                    .ledger
                    .plans()
                    .get(sub.plan)
                    .map(|plan| plan.display_name.clone())
                    .unwrap_or_else(|| sub.plan.to_string());
                let until = sub
                    .expires_at
                    .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_default();
                vec![OutboundMessage::text(
                    identity,
                    format!("💎 Your subscription is active.\nPlan: {}\nValid until: {}", plan, until),
                )
                .with_buttons(vec![Button::new("🔙 Main menu", Action::MainMenu)])]
            }
            None => vec![OutboundMessage::text(identity, "You have no active subscription.").with_buttons(vec![
                Button::new("💳 Choose a plan", Action::SelectPlan),
                Button::new("🔙 Main menu", Action::MainMenu),
            ])],
        }
    }

    fn plan_list(&self, identity: Identity, text: &str) -> OutboundMessage {
        let plans = self.ledger.plans();
        let mut buttons: Vec<Button> = plans
            .iter()
            .map(|plan| {
                Button::new(
                    format!("📅 {} - {} {}", plan.display_name, plan.price, plans.currency),
                    Action::BuyPlan(plan.id),
                )
            })
            .collect();
        buttons.push(Button::new("🔙 Main menu", Action::MainMenu));
        OutboundMessage::text(identity, text).with_buttons(buttons)
    }

    async fn purchase(&self, identity: Identity, plan_id: PlanId) -> Vec<OutboundMessage> {
        let back = vec![Button::new("🔙 Back to plans", Action::SelectPlan)];
        let Some(plan) = self.ledger.plans().get(plan_id) else {
            return vec![OutboundMessage::text(identity, "This plan is not available.").with_buttons(back)];
        };
        let Some(checkout) = &self.checkout else {
            return vec![OutboundMessage::text(identity, "💳 Payments are currently unavailable.").with_buttons(back)];
        };

        let currency = &self.ledger.plans().currency;
        match checkout.create_payment(identity, plan, currency).await {
            Ok(url) => vec![OutboundMessage::text(
                identity,
                format!(
                    "💳 {} for {} {}\nPay here: {}\nThe subscription activates automatically once the payment is confirmed.",
                    plan.display_name, plan.price, currency, url
                ),
            )
            .with_buttons(back)],
            Err(e) => {
                tracing::error!("❌ Checkout failed for {}: {}", identity, e);
                vec![OutboundMessage::text(
                    identity,
                    "❌ Could not create a payment right now. Please try again later.",
                )
                .with_buttons(back)]
            }
        }
    }

    async fn admin_status(&self, identity: Identity) -> OutboundMessage {
        if !self.admin_ids.contains(&identity) {
            tracing::warn!("Rejected admin command from {}", identity);
            return OutboundMessage::text(identity, "⛔ This command is for administrators only.");
        }

        match self.ledger.usage_stats(Utc::now()).await {
            Ok(stats) => {
                let currency = &self.ledger.plans().currency;
                OutboundMessage::text(
                    identity,
                    format!(
                        "📊 Service status\n\
                         Active subscribers: {}\n\
                         Generations: {} total, {} successful\n\
                         Last 24h: {} generations, {} successful\n\
                         Average processing time: {:.1} s\n\
                         Revenue: {} {} from {} payments ({} {} in the last 24h)",
                        stats.active_subscribers,
                        stats.total_generations,
                        stats.successful_generations,
                        stats.generations_24h,
                        stats.successful_generations_24h,
                        stats.avg_processing_time_ms / 1000.0,
                        format_minor_units(stats.total_revenue),
                        currency,
                        stats.processed_payments,
                        format_minor_units(stats.revenue_24h),
                        currency,
                    ),
                )
            }
            Err(e) => {
                tracing::error!("❌ Stats query failed: {}", e);
                OutboundMessage::text(identity, LEDGER_DOWN)
            }
        }
    }

    async fn own_stats(&self, identity: Identity) -> OutboundMessage {
        match self.ledger.user_stats(identity).await {
            Ok(stats) => OutboundMessage::text(
                identity,
                format!(
                    "📊 Your images: {} requested, {} delivered.\nPayments: {}, total paid {} {}",
                    stats.total_generations,
                    stats.successful_generations,
                    stats.total_payments,
                    format_minor_units(stats.total_paid_amount),
                    self.ledger.plans().currency,
                ),
            )
            .with_buttons(vec![Button::new("🔙 Main menu", Action::MainMenu)]),
            Err(e) => {
                tracing::error!("❌ Stats lookup failed for {}: {}", identity, e);
                OutboundMessage::text(identity, LEDGER_DOWN)
            }
        }
    }

    async fn admin_activate(&self, identity: Identity, args: &[&str]) -> OutboundMessage {
        if !self.admin_ids.contains(&identity) {
            tracing::warn!("Rejected admin command from {}", identity);
            return OutboundMessage::text(identity, "⛔ This command is for administrators only.");
        }

        let target = match args.first() {
            Some(raw) => match raw.parse::<Identity>() {
                Ok(target) => target,
                Err(_) => return OutboundMessage::text(identity, "Usage: /admin_activate [user_id]"),
            },
            None => identity,
        };

        let plans = self.ledger.plans();
        let Some(plan) = plans.get(plans.default_plan) else {
            return OutboundMessage::text(identity, "❌ The default plan is not configured.");
        };

        match self
            .ledger
            .grant(target, plan.id, plan.duration, format!("admin:activation_by_{}", identity))
            .await
        {
            Ok(sub) => OutboundMessage::text(
                identity,
                format!(
                    "✅ Subscription {} activated for {} until {}",
                    plan.display_name,
                    target,
                    sub.expires_at
                        .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
                        .unwrap_or_default()
                ),
            ),
            Err(e) => {
                tracing::error!("❌ Admin activation for {} failed: {}", target, e);
                OutboundMessage::text(identity, LEDGER_DOWN)
            }
        }
    }
}

fn main_menu(identity: Identity, text: &str) -> OutboundMessage {
    OutboundMessage::text(identity, text).with_buttons(vec![
        Button::new("🎨 Generate image", Action::Generate),
        Button::new("✏️ Edit image", Action::Edit),
        Button::new("💎 My subscription", Action::Subscription),
        Button::new("ℹ️ Help", Action::Help),
    ])
}

fn help(identity: Identity) -> OutboundMessage {
    OutboundMessage::text(
        identity,
        "ℹ️ How it works:\n\
         🎨 Generate: describe a picture and receive an image.\n\
         ✏️ Edit: send a photo, then describe the changes.\n\
         Both need an active subscription. Use /cancel to stop at any step.",
    )
    .with_buttons(vec![Button::new("🔙 Main menu", Action::MainMenu)])
}

fn validation_text(error: &JobError) -> String {
    match error {
        JobError::Validation(msg) => format!("{} Please describe it in more detail.", msg),
        other => other.to_string(),
    }
}

fn retry_buttons(kind: JobKind) -> Vec<Button> {
    let retry = match kind {
        JobKind::Generate => Button::new("🎨 Try again", Action::Generate),
        JobKind::Edit => Button::new("✏️ Try again", Action::Edit),
    };
    vec![retry, Button::new("🔙 Main menu", Action::MainMenu)]
}

fn success_message(identity: Identity, job: &GenerationJob) -> OutboundMessage {
    let (text, again) = match job.kind {
        JobKind::Generate => ("✅ Your image is ready!", Button::new("🎨 Create another", Action::Generate)),
        JobKind::Edit => ("✅ Your photo has been edited!", Button::new("✏️ Edit another", Action::Edit)),
    };
    let message = OutboundMessage::text(identity, text)
        .with_buttons(vec![again, Button::new("🔙 Main menu", Action::MainMenu)]);
    match &job.result_reference {
        Some(url) => message.with_image(url.clone()),
        None => message,
    }
}

fn failure_message(identity: Identity, kind: JobKind, error: &JobError) -> OutboundMessage {
    let text = match (error, kind) {
        (JobError::Validation(_), _) => validation_text(error),
        (JobError::Provider(_), _) => {
            "⚠️ The image service is not responding right now. Please try again in a few minutes.".to_string()
        }
        (JobError::Generation { kind: FailureKind::Flagged, .. }, JobKind::Generate) => {
            "🚫 The description was rejected by the content filter. Try rephrasing it.".to_string()
        }
        (JobError::Generation { kind: FailureKind::Flagged, .. }, JobKind::Edit) => {
            "🚫 The photo or the description was flagged as sensitive content. Try another photo or different wording."
                .to_string()
        }
        (JobError::Generation { .. }, JobKind::Generate) => {
            "❌ Could not generate the image. Try a different description.".to_string()
        }
        (JobError::Generation { .. }, JobKind::Edit) => "❌ Could not edit the photo. Possible causes:\n\
             • the photo contains sensitive content\n\
             • the description is unclear\n\
             • a temporary problem with the image service"
            .to_string(),
        (JobError::Timeout(_), _) => "⏱️ The image is taking too long. Please try again later.".to_string(),
        (JobError::Cancelled, _) => "Cancelled.".to_string(),
    };
    OutboundMessage::text(identity, text).with_buttons(retry_buttons(kind))
}
