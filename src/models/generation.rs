use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::subscription::Identity;

/// What the provider is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Generate,
    Edit,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Generate => "generate",
            JobKind::Edit => "edit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    /// No further polling happens once a job is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut)
    }
}

/// One generation or edit request, alive for a single request/response cycle.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub job_id: String,
    pub kind: JobKind,
    pub input_prompt: String,
    pub source_image_reference: Option<String>,
    pub status: JobStatus,
    pub result_reference: Option<String>,
    pub error: Option<String>,
}

/// Lifecycle states reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

/// Provider output is either a single URL or a list of URLs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProviderOutput {
    Single(String),
    Many(Vec<String>),
}

impl ProviderOutput {
    /// The reference delivered to the user.
    ///
    /// Multi-image outputs are reduced to their first element; the bot only
    /// ever shows one image per request.
    pub fn primary(&self) -> Option<&str> {
        match self {
            ProviderOutput::Single(url) => Some(url.as_str()).filter(|url| !url.is_empty()),
            ProviderOutput::Many(urls) => urls.first().map(String::as_str),
        }
    }
}

/// A provider-side view of a job.
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Option<ProviderOutput>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Audit row for a finished job.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationLogEntry {
    pub identity: Identity,
    pub kind: JobKind,
    pub prompt: String,
    pub result_reference: Option<String>,
    pub success: bool,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}
