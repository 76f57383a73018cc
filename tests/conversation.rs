mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use artbot::models::{
    chat::{Action, InboundEvent, OutboundMessage},
    session::ConversationState,
    subscription::PlanId,
};
use common::{Outcome, TestContext, RESULT_URL};

const USER: i64 = 501;
const ADMIN: i64 = 1000;

async fn subscribe(context: &TestContext, identity: i64) {
    context
        .state
        .ledger
        .grant(identity, PlanId::OneMonth, ChronoDuration::days(30), "admin:test")
        .await
        .unwrap();
}

fn texts(messages: &[OutboundMessage]) -> String {
    messages
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_without_subscription_shows_plans() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;

        let messages = engine.handle(InboundEvent::button(USER, Action::Generate)).await;

        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("subscription"));
        assert!(messages[0]
            .buttons
            .iter()
            .any(|b| b.action == Action::BuyPlan(PlanId::OneMonth)));
        assert_eq!(engine.state_of(USER).await, ConversationState::Idle);
        assert_eq!(context.provider.submissions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_flow() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;
        subscribe(&context, USER).await;

        // Step 1: Choose generate
        engine.handle(InboundEvent::button(USER, Action::Generate)).await;
        assert_eq!(engine.state_of(USER).await, ConversationState::AwaitingGenerationPrompt);

        // Step 2: A short prompt is rejected locally
        let messages = engine.handle(InboundEvent::text(USER, "cat")).await;
        assert!(texts(&messages).contains("too short"));
        assert_eq!(engine.state_of(USER).await, ConversationState::AwaitingGenerationPrompt);
        assert_eq!(context.provider.submissions(), 0);

        // Step 3: A valid prompt drives the job to completion
        let messages = engine
            .handle(InboundEvent::text(USER, "a lighthouse in a thunderstorm"))
            .await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].image.as_deref(), Some(RESULT_URL));
        assert_eq!(engine.state_of(USER).await, ConversationState::Idle);
        assert_eq!(context.provider.submissions(), 1);

        let log = context.store.generation_log().await;
        assert_eq!(log.len(), 1);
        assert!(log[0].success);
        assert_eq!(log[0].prompt, "a lighthouse in a thunderstorm");
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_flow() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;
        subscribe(&context, USER).await;

        engine.handle(InboundEvent::button(USER, Action::Edit)).await;
        assert_eq!(engine.state_of(USER).await, ConversationState::AwaitingEditSourceImage);

        // Step 1: Text instead of a photo re-prompts
        let messages = engine.handle(InboundEvent::text(USER, "here it comes")).await;
        assert!(texts(&messages).contains("photo"));
        assert_eq!(engine.state_of(USER).await, ConversationState::AwaitingEditSourceImage);

        // Step 2: The photo is stored
        engine
            .handle(InboundEvent::photo(USER, "https://files.example/photo.jpg"))
            .await;
        assert_eq!(engine.state_of(USER).await, ConversationState::AwaitingEditPrompt);

        // Step 3: The edit runs against the stored photo
        let messages = engine
            .handle(InboundEvent::text(USER, "make the sky purple"))
            .await;
        assert_eq!(messages[0].image.as_deref(), Some(RESULT_URL));
        assert_eq!(
            context.provider.last_source().as_deref(),
            Some("https://files.example/photo.jpg")
        );
        assert_eq!(engine.state_of(USER).await, ConversationState::Idle);

        // Step 4: The source was consumed; a new edit starts from scratch
        engine.handle(InboundEvent::button(USER, Action::Edit)).await;
        assert_eq!(engine.state_of(USER).await, ConversationState::AwaitingEditSourceImage);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flagged_edit_returns_to_idle() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;
        subscribe(&context, USER).await;
        context
            .provider
            .set_outcome(Outcome::Fail("Prediction flagged as sensitive content (E005)".to_string()));

        engine.handle(InboundEvent::button(USER, Action::Edit)).await;
        engine.handle(InboundEvent::photo(USER, "https://files.example/p.jpg")).await;
        let messages = engine
            .handle(InboundEvent::text(USER, "remove the background"))
            .await;

        assert!(texts(&messages).contains("sensitive"));
        assert!(messages[0].image.is_none());
        assert_eq!(engine.state_of(USER).await, ConversationState::Idle);

        let log = context.store.generation_log().await;
        assert_eq!(log.len(), 1);
        assert!(!log[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_edit_failure_lists_causes() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;
        subscribe(&context, USER).await;
        context.provider.set_outcome(Outcome::Fail("CUDA out of memory".to_string()));

        engine.handle(InboundEvent::button(USER, Action::Edit)).await;
        engine.handle(InboundEvent::photo(USER, "https://files.example/p.jpg")).await;
        let messages = engine
            .handle(InboundEvent::text(USER, "remove the background"))
            .await;

        assert!(texts(&messages).contains("Possible causes"));
        assert_eq!(engine.state_of(USER).await, ConversationState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout_returns_to_idle() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;
        subscribe(&context, USER).await;
        context.provider.set_outcome(Outcome::Hang);

        engine.handle(InboundEvent::button(USER, Action::Generate)).await;
        let messages = engine
            .handle(InboundEvent::text(USER, "a lighthouse in a thunderstorm"))
            .await;

        assert!(texts(&messages).contains("too long"));
        assert_eq!(engine.state_of(USER).await, ConversationState::Idle);
        assert_eq!(context.provider.polls(), 59);
    }

    #[tokio::test(start_paused = true)]
    async fn test_main_menu_discards_in_flight_job() {
        let context = TestContext::new(&[]);
        let engine = Arc::clone(&context.state.conversations);
        subscribe(&context, USER).await;
        context.provider.set_outcome(Outcome::Hang);

        engine.handle(InboundEvent::button(USER, Action::Generate)).await;
        let running = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .handle(InboundEvent::text(USER, "a lighthouse in a thunderstorm"))
                    .await
            })
        };

        // Step 1: Let the job reach its first poll
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(context.provider.polls(), 1);

        // Step 2: The user moves on
        let menu = engine.handle(InboundEvent::button(USER, Action::MainMenu)).await;
        assert_eq!(menu.len(), 1);

        // Step 3: The superseded job produces nothing
        let stale = running.await.unwrap();
        assert!(stale.is_empty());
        assert_eq!(engine.state_of(USER).await, ConversationState::Idle);
        assert!(context.store.generation_log().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_names_the_abandoned_request() {
        let context = TestContext::new(&[]);
        let engine = Arc::clone(&context.state.conversations);
        subscribe(&context, USER).await;
        context.provider.set_outcome(Outcome::Hang);

        engine.handle(InboundEvent::button(USER, Action::Generate)).await;
        let running = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .handle(InboundEvent::text(USER, "a lighthouse in a thunderstorm"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(7)).await;

        let messages = engine.handle(InboundEvent::text(USER, "/cancel")).await;
        assert!(texts(&messages).contains("Cancelled the request \"a lighthouse in a thunderstorm\""));
        assert!(running.await.unwrap().is_empty());

        // Nothing is in flight anymore.
        let messages = engine.handle(InboundEvent::text(USER, "/cancel")).await;
        assert_eq!(texts(&messages), "Cancelled. Main menu:");
    }

    #[tokio::test]
    async fn test_cancel_discards_pending_data() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;
        subscribe(&context, USER).await;

        engine.handle(InboundEvent::button(USER, Action::Edit)).await;
        engine.handle(InboundEvent::photo(USER, "https://files.example/p.jpg")).await;
        engine.handle(InboundEvent::text(USER, "/cancel")).await;
        assert_eq!(engine.state_of(USER).await, ConversationState::Idle);

        // A prompt after cancel is not an edit prompt anymore.
        engine.handle(InboundEvent::text(USER, "make the sky purple")).await;
        assert_eq!(context.provider.submissions(), 0);
    }

    #[tokio::test]
    async fn test_photo_outside_edit_flow_is_ignored() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;

        let messages = engine
            .handle(InboundEvent::photo(USER, "https://files.example/p.jpg"))
            .await;
        assert!(texts(&messages).contains("Edit"));
        assert_eq!(engine.state_of(USER).await, ConversationState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_photo_while_awaiting_prompt_reprompts() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;
        subscribe(&context, USER).await;

        engine.handle(InboundEvent::button(USER, Action::Generate)).await;

        // Step 1: A photo is not a description
        let messages = engine
            .handle(InboundEvent::photo(USER, "https://files.example/p.jpg"))
            .await;
        assert!(texts(&messages).contains("describe the image"));
        assert_eq!(engine.state_of(USER).await, ConversationState::AwaitingGenerationPrompt);

        // Step 2: The flow continues with a text prompt
        let messages = engine
            .handle(InboundEvent::text(USER, "a lighthouse in a thunderstorm"))
            .await;
        assert_eq!(messages[0].image.as_deref(), Some(RESULT_URL));
        assert_eq!(context.provider.last_source(), None);
    }

    #[tokio::test]
    async fn test_ledger_outage_denies_by_default() {
        let state = TestContext::with_ledger_down();
        let engine = &state.conversations;

        let messages = engine.handle(InboundEvent::button(USER, Action::Generate)).await;
        assert!(texts(&messages).contains("temporarily unavailable"));
        assert_eq!(engine.state_of(USER).await, ConversationState::Idle);
    }

    #[tokio::test]
    async fn test_subscription_status() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;

        let messages = engine.handle(InboundEvent::button(USER, Action::Subscription)).await;
        assert!(texts(&messages).contains("no active subscription"));

        subscribe(&context, USER).await;
        let messages = engine.handle(InboundEvent::text(USER, "/subscription")).await;
        assert!(texts(&messages).contains("active"));
        assert!(texts(&messages).contains("1 month"));
    }

    #[tokio::test]
    async fn test_expired_subscription_is_flipped_on_check() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;
        context
            .state
            .ledger
            .grant_at(
                USER,
                PlanId::OneMonth,
                ChronoDuration::days(30),
                "pay_old",
                Utc::now() - ChronoDuration::days(31),
            )
            .await
            .unwrap();

        let messages = engine.handle(InboundEvent::button(USER, Action::Generate)).await;
        assert!(texts(&messages).contains("requires an active subscription"));
        assert!(!context.state.ledger.describe(USER).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_purchase_returns_checkout_link() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;

        let messages = engine
            .handle(InboundEvent::button(USER, Action::BuyPlan(PlanId::OneYear)))
            .await;
        assert!(texts(&messages).contains("https://pay.example/501/1_year"));

        let disabled = TestContext::without_checkout();
        let messages = disabled
            .state
            .conversations
            .handle(InboundEvent::button(USER, Action::BuyPlan(PlanId::OneYear)))
            .await;
        assert!(texts(&messages).contains("unavailable"));
    }

    #[tokio::test]
    async fn test_admin_activation() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;

        let denied = engine.handle(InboundEvent::text(USER, "/admin_activate 900")).await;
        assert!(texts(&denied).contains("administrators only"));
        assert!(context.state.ledger.describe(900).await.unwrap().is_none());

        let granted = engine.handle(InboundEvent::text(ADMIN, "/admin_activate 900")).await;
        assert!(texts(&granted).contains("activated for 900"));
        assert!(context.state.ledger.is_entitled(900, Utc::now()).await.unwrap());

        let sub = context.state.ledger.describe(900).await.unwrap().unwrap();
        assert_eq!(sub.plan, PlanId::OneMonth);
        assert_eq!(sub.source_reference, "admin:activation_by_1000");
    }

    #[tokio::test]
    async fn test_unknown_button_shows_menu() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;

        let event: InboundEvent =
            serde_json::from_value(serde_json::json!({ "identity": USER, "kind": "button", "payload": "style_vintage" }))
                .unwrap();
        let messages = engine.handle(event).await;
        assert!(texts(&messages).contains("Unknown action"));
        assert_eq!(messages[0].buttons.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_commands() {
        let context = TestContext::new(&[]);
        let engine = &context.state.conversations;
        subscribe(&context, USER).await;

        engine.handle(InboundEvent::button(USER, Action::Generate)).await;
        engine
            .handle(InboundEvent::text(USER, "a lighthouse in a thunderstorm"))
            .await;

        // Step 1: Users see their own counters
        let messages = engine.handle(InboundEvent::text(USER, "/stats")).await;
        assert!(texts(&messages).contains("1 requested, 1 delivered"));

        // Step 2: Service status is for administrators
        let denied = engine.handle(InboundEvent::text(USER, "/admin_status")).await;
        assert!(texts(&denied).contains("administrators only"));

        let status = engine.handle(InboundEvent::text(ADMIN, "/admin_status")).await;
        assert!(texts(&status).contains("Active subscribers: 1"));
        assert!(texts(&status).contains("Generations: 1 total, 1 successful"));
    }
}
