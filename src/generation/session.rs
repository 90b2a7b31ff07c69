//! The two-phase request/continuation protocol for one file.
//!
//! ```text
//! Idle -> Phase1Sent -> Phase1Done -+-> Complete                  (stop sentinel seen)
//!                                   +-> Phase2Sent -> Phase2Done -> Complete
//! ```
use serde::Serialize;
use tracing::{debug, info};

use super::prompts::{self, FileRequest};
use super::{GenerationError, Generator, Phase, Prompt, RetryPolicy};
use crate::stitch::cleanup::strip_stop_sentinel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Phase1Sent,
    Phase1Done,
    Phase2Sent,
    Phase2Done,
    Complete,
}

/// The fragments a session produced, with the stop sentinel removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationOutcome {
    pub part_one: String,
    /// `None` when phase 1 already ended with the stop sentinel.
    pub part_two: Option<String>,
    pub completed_in_phase_one: bool,
}

pub struct ContinuationSession<'g> {
    generator: &'g dyn Generator,
    policy: RetryPolicy,
    path: String,
    source: String,
    instruction: String,
    stop_sentinel: String,
    state: SessionState,
    pending: Option<Prompt>,
    raw_part_one: Option<String>,
    raw_part_two: Option<String>,
}

impl<'g> ContinuationSession<'g> {
    pub fn new(
        generator: &'g dyn Generator,
        policy: RetryPolicy,
        path: impl Into<String>,
        source: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            policy,
            path: path.into(),
            source: source.into(),
            instruction: instruction.into(),
            stop_sentinel: prompts::STOP_SENTINEL.to_string(),
            state: SessionState::Idle,
            pending: None,
            raw_part_one: None,
            raw_part_two: None,
        }
    }

    #[must_use]
    pub fn with_stop_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.stop_sentinel = sentinel.into();
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn request(&self) -> FileRequest<'_> {
        FileRequest {
            path: &self.path,
            source: &self.source,
            instruction: &self.instruction,
            stop_sentinel: &self.stop_sentinel,
        }
    }

    /// Advance by one transition and return the new state.
    ///
    /// On error the session stays in its `*Sent` state, so calling `step`
    /// again re-sends the same prompt.
    pub fn step(&mut self) -> Result<SessionState, GenerationError> {
        self.state = match self.state {
            SessionState::Idle => {
                self.pending = Some(prompts::request_prompt(&self.request()));
                SessionState::Phase1Sent
            }
            SessionState::Phase1Sent => {
                let text = self.send(Phase::Request)?;
                debug!("{}: phase 1 returned {} bytes", self.path, text.len());
                self.raw_part_one = Some(text);
                SessionState::Phase1Done
            }
            SessionState::Phase1Done => {
                let part_one = self.raw_part_one.as_deref().unwrap_or_default();
                if part_one.contains(&self.stop_sentinel) {
                    info!("{}: complete after phase 1", self.path);
                    SessionState::Complete
                } else {
                    self.pending = Some(prompts::continuation_prompt(&self.request(), part_one));
                    SessionState::Phase2Sent
                }
            }
            SessionState::Phase2Sent => {
                let text = self.send(Phase::Continuation)?;
                debug!("{}: phase 2 returned {} bytes", self.path, text.len());
                self.raw_part_two = Some(text);
                SessionState::Phase2Done
            }
            SessionState::Phase2Done | SessionState::Complete => SessionState::Complete,
        };
        Ok(self.state)
    }

    fn send(&self, phase: Phase) -> Result<String, GenerationError> {
        let prompt = self
            .pending
            .clone()
            .unwrap_or_else(|| prompts::request_prompt(&self.request()));
        self.policy.call(self.generator, &prompt, phase)
    }

    /// Drive the session to completion.
    pub fn run(mut self) -> Result<GenerationOutcome, GenerationError> {
        while self.step()? != SessionState::Complete {}

        let part_one = self.raw_part_one.unwrap_or_default();
        let completed_in_phase_one = self.raw_part_two.is_none();
        Ok(GenerationOutcome {
            part_one: strip_stop_sentinel(&part_one, &self.stop_sentinel),
            part_two: self
                .raw_part_two
                .map(|t| strip_stop_sentinel(&t, &self.stop_sentinel)),
            completed_in_phase_one,
        })
    }
}
