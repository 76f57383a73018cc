use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::subscription::{Identity, PlanId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Text,
    Photo,
    Button,
}

/// One user action delivered by the chat transport.
///
/// For `photo` events the payload is a fetchable URL of the image; for
/// `button` events it is the action code of the pressed button.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub identity: Identity,
    pub kind: EventKind,
    #[serde(default)]
    pub payload: String,
}

impl InboundEvent {
    pub fn text(identity: Identity, text: impl Into<String>) -> Self {
        Self { identity, kind: EventKind::Text, payload: text.into() }
    }

    pub fn photo(identity: Identity, url: impl Into<String>) -> Self {
        Self { identity, kind: EventKind::Photo, payload: url.into() }
    }

    pub fn button(identity: Identity, action: Action) -> Self {
        Self { identity, kind: EventKind::Button, payload: action.to_string() }
    }
}

/// Button actions understood by the conversation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Generate,
    Edit,
    Subscription,
    SelectPlan,
    BuyPlan(PlanId),
    MainMenu,
    Help,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Generate => f.write_str("generate_image"),
            Action::Edit => f.write_str("edit_image"),
            Action::Subscription => f.write_str("subscription"),
            Action::SelectPlan => f.write_str("select_plan"),
            Action::BuyPlan(plan) => write!(f, "plan_{}", plan),
            Action::MainMenu => f.write_str("main_menu"),
            Action::Help => f.write_str("help"),
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate_image" => Ok(Action::Generate),
            "edit_image" => Ok(Action::Edit),
            "subscription" => Ok(Action::Subscription),
            "select_plan" => Ok(Action::SelectPlan),
            "main_menu" => Ok(Action::MainMenu),
            "help" => Ok(Action::Help),
            other => other
                .strip_prefix("plan_")
                .and_then(|plan| plan.parse().ok())
                .map(Action::BuyPlan)
                .ok_or_else(|| format!("unknown action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    #[serde(serialize_with = "serialize_action")]
    pub action: Action,
}

fn serialize_action<S: serde::Serializer>(action: &Action, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(action)
}

impl Button {
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self { label: label.into(), action }
    }
}

/// A message for the transport to deliver. Formatting is the transport's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub identity: Identity,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
}

impl OutboundMessage {
    pub fn text(identity: Identity, text: impl Into<String>) -> Self {
        Self { identity, text: text.into(), image: None, buttons: Vec::new() }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.buttons = buttons;
        self
    }
}
