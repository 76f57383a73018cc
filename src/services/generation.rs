use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ProviderConfig,
    error::{FailureKind, JobError},
    models::generation::{GenerationJob, JobKind, JobStatus, Prediction, PredictionStatus},
};

/// The external compute provider.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Starts a prediction.
    async fn create_prediction(
        &self,
        kind: JobKind,
        prompt: &str,
        source_image: Option<&str>,
    ) -> Result<Prediction, JobError>;

    /// Reads the current state of a prediction.
    async fn fetch_prediction(&self, id: &str) -> Result<Prediction, JobError>;
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    input: PredictionInput<'a>,
}

#[derive(Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_input: Option<[&'a str; 1]>,
    output_format: &'static str,
}

/// Replicate-style prediction API.
pub struct ReplicateProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl ReplicateProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn read_prediction(response: reqwest::Response) -> Result<Prediction, JobError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| JobError::Provider(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(JobError::Provider(format!("API error {}: {}", status, body)));
        }

        sonic_rs::from_str(&body).map_err(|e| JobError::Provider(format!("Unexpected response: {}", e)))
    }
}

#[async_trait]
impl ImageProvider for ReplicateProvider {
    async fn create_prediction(
        &self,
        kind: JobKind,
        prompt: &str,
        source_image: Option<&str>,
    ) -> Result<Prediction, JobError> {
        let request = PredictionRequest {
            input: PredictionInput {
                prompt,
                image_input: source_image.map(|url| [url]),
                output_format: "png",
            },
        };
        let body = sonic_rs::to_string(&request).map_err(|e| JobError::Provider(e.to_string()))?;

        let url = format!(
            "{}/models/{}/predictions",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        tracing::debug!("Submitting {} job to {}", kind.as_str(), url);

        let response = self
            .client
            .post(url)
            .bearer_auth(self.config.api_token.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| JobError::Provider(format!("Request failed: {}", e)))?;

        Self::read_prediction(response).await
    }

    async fn fetch_prediction(&self, id: &str) -> Result<Prediction, JobError> {
        let url = format!("{}/predictions/{}", self.config.base_url.trim_end_matches('/'), id);
        let response = self
            .client
            .get(url)
            .bearer_auth(self.config.api_token.as_str())
            .send()
            .await
            .map_err(|e| JobError::Provider(format!("Request failed: {}", e)))?;

        Self::read_prediction(response).await
    }
}

/// Submits jobs to the provider and drives them to a terminal state.
pub struct JobClient {
    provider: Arc<dyn ImageProvider>,
    poll_interval: Duration,
    min_prompt_chars: usize,
}

impl JobClient {
    pub fn new(provider: Arc<dyn ImageProvider>, poll_interval: Duration, min_prompt_chars: usize) -> Self {
        Self {
            provider,
            poll_interval,
            min_prompt_chars,
        }
    }

    /// Checks a request locally, without touching the provider.
    pub fn validate(&self, kind: JobKind, prompt: &str, source_image: Option<&str>) -> Result<(), JobError> {
        let length = prompt.trim().chars().count();
        if length < self.min_prompt_chars {
            return Err(JobError::Validation(format!(
                "The description is too short: at least {} characters are needed.",
                self.min_prompt_chars
            )));
        }
        if kind == JobKind::Edit && source_image.is_none_or(|url| url.trim().is_empty()) {
            return Err(JobError::Validation("An image to edit is required.".to_string()));
        }
        Ok(())
    }

    /// Submits a job. Submission failures are not retried.
    ///
    /// # Arguments
    ///
    /// * `kind` - Generate or edit.
    /// * `prompt` - The user's description.
    /// * `source_image` - The image to edit; required for `JobKind::Edit`.
    ///
    /// # Returns
    ///
    /// The submitted `GenerationJob`, already terminal if the provider
    /// finished synchronously.
    pub async fn submit(
        &self,
        kind: JobKind,
        prompt: &str,
        source_image: Option<&str>,
    ) -> Result<GenerationJob, JobError> {
        self.validate(kind, prompt, source_image)?;
        let prompt = prompt.trim();

        let prediction = self
            .provider
            .create_prediction(kind, prompt, source_image)
            .await?;

        let mut job = GenerationJob {
            job_id: prediction.id.clone(),
            kind,
            input_prompt: prompt.to_string(),
            source_image_reference: source_image.map(str::to_string),
            status: JobStatus::Submitted,
            result_reference: None,
            error: None,
        };
        apply_prediction(&mut job, &prediction);

        tracing::info!(
            "🚀 Submitted {} job {} (source image: {})",
            kind.as_str(),
            job.job_id,
            job.source_image_reference.as_deref().unwrap_or("none")
        );
        Ok(job)
    }

    /// Polls a job until it is terminal, the deadline passes or `cancel` fires.
    ///
    /// No poll is issued once the deadline has passed. Transient errors while
    /// polling are logged and polling continues.
    pub async fn await_result(
        &self,
        mut job: GenerationJob,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<GenerationJob, JobError> {
        let deadline = Instant::now() + timeout;

        loop {
            if job.status.is_terminal() {
                return finish(job, timeout);
            }

            let wake = (Instant::now() + self.poll_interval).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = sleep_until(wake) => {}
            }

            if Instant::now() >= deadline {
                job.status = JobStatus::TimedOut;
                continue;
            }

            let poll = tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                poll = timeout_at(deadline, self.provider.fetch_prediction(&job.job_id)) => poll,
            };

            match poll {
                Ok(Ok(prediction)) => apply_prediction(&mut job, &prediction),
                Ok(Err(e)) => tracing::warn!("Polling job {} failed: {}", job.job_id, e),
                Err(_) => job.status = JobStatus::TimedOut,
            }
        }
    }
}

fn apply_prediction(job: &mut GenerationJob, prediction: &Prediction) {
    match prediction.status {
        PredictionStatus::Starting | PredictionStatus::Unknown => {}
        PredictionStatus::Processing => job.status = JobStatus::Running,
        PredictionStatus::Succeeded => {
            job.result_reference = prediction
                .output
                .as_ref()
                .and_then(|output| output.primary())
                .map(str::to_string);
            if job.result_reference.is_some() {
                job.status = JobStatus::Succeeded;
            } else {
                job.status = JobStatus::Failed;
                job.error = Some("The provider returned no image".to_string());
            }
        }
        PredictionStatus::Failed => {
            job.status = JobStatus::Failed;
            job.error = Some(
                prediction
                    .error
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
            );
        }
        PredictionStatus::Canceled => {
            job.status = JobStatus::Failed;
            job.error = Some("The job was canceled by the provider".to_string());
        }
    }
}

fn finish(job: GenerationJob, timeout: Duration) -> Result<GenerationJob, JobError> {
    match job.status {
        JobStatus::Succeeded => Ok(job),
        JobStatus::TimedOut => {
            tracing::warn!("⏱️ Job {} timed out after {:?}", job.job_id, timeout);
            Err(JobError::Timeout(timeout))
        }
        _ => {
            let message = job.error.unwrap_or_else(|| "Unknown error".to_string());
            let kind = classify_failure(&message);
            Err(JobError::Generation { message, kind })
        }
    }
}

/// Providers report content-policy rejections only through the error text.
pub fn classify_failure(message: &str) -> FailureKind {
    let lowered = message.to_lowercase();
    if ["sensitive", "flagged", "nsfw"].iter().any(|marker| lowered.contains(marker)) {
        FailureKind::Flagged
    } else {
        FailureKind::Generic
    }
}
