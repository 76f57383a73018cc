use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where a user is within a multi-step image request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingGenerationPrompt,
    AwaitingEditSourceImage,
    AwaitingEditPrompt,
}

/// Per-identity conversation state. Lives in memory only; a restart drops it.
#[derive(Debug)]
pub struct Session {
    pub state: ConversationState,
    /// Prompt of the job currently in flight.
    pub pending_prompt: Option<String>,
    /// Fetchable URL of the image to edit, resolved by the transport.
    pub pending_source_image_reference: Option<String>,
    /// Bumped whenever the user starts something new; stale job results are
    /// compared against it and dropped.
    pub generation: u64,
    /// Cancels the poll loop of the job started under the current generation.
    pub in_flight: Option<CancellationToken>,
    pub last_seen: Instant,
}

impl Session {
    pub fn new(now: Instant) -> Self {
        Self {
            state: ConversationState::Idle,
            pending_prompt: None,
            pending_source_image_reference: None,
            generation: 0,
            in_flight: None,
            last_seen: now,
        }
    }

    /// Returns to `Idle`, discarding pending data and superseding any job.
    ///
    /// Returns the prompt of the job that was abandoned, if one was running.
    pub fn reset(&mut self) -> Option<String> {
        self.state = ConversationState::Idle;
        self.pending_source_image_reference = None;
        self.supersede();
        self.pending_prompt.take()
    }

    /// Starts a new generation, cancelling the job of the previous one.
    pub fn supersede(&mut self) -> u64 {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        self.generation += 1;
        self.generation
    }
}
