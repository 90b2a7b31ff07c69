/// Talking to the text-generation service.
///
/// The service is anything implementing [`Generator`]. Calls go through
/// [`RetryPolicy`], and [`session::ContinuationSession`] drives the two-phase
/// request/continuation protocol on top of it.
pub mod client;
pub mod mock;
pub mod prompts;
pub mod session;

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Hard ceiling on attempts per call, whatever the configuration says.
pub const MAX_ATTEMPTS: u32 = 5;

/// Which half of the protocol a call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Request,
    Continuation,
    /// Asking which files a request concerns, before phase 1.
    Selection,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Request => write!(f, "phase 1"),
            Phase::Continuation => write!(f, "phase 2"),
            Phase::Selection => write!(f, "file selection"),
        }
    }
}

/// Errors that can occur while calling the generation service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// Network failure, timeout, rate limit or server error.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("empty response")]
    EmptyResponse,

    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("{phase} gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        phase: Phase,
        attempts: u32,
        last: Box<GenerationError>,
    },
}

impl GenerationError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::EmptyResponse)
    }
}

/// A chat-style prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Trait for text-generation backends.
///
/// Implementations must be `Send + Sync` so one client can serve several
/// files.
pub trait Generator: Send + Sync {
    /// Produce a completion for `prompt`.
    fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// `max_attempts` is clamped to `1..=MAX_ATTEMPTS`.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS),
            base_delay,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause after failed attempt `attempt` (1-based): `base * 2^attempt`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1 << attempt.min(16))
    }

    /// Call `generator` until it returns non-blank text, a non-retryable
    /// error occurs, or the attempts run out.
    pub fn call(
        &self,
        generator: &dyn Generator,
        prompt: &Prompt,
        phase: Phase,
    ) -> Result<String, GenerationError> {
        let mut last = GenerationError::EmptyResponse;

        for attempt in 1..=self.max_attempts {
            let outcome = generator.generate(prompt).and_then(|text| {
                if text.trim().is_empty() {
                    Err(GenerationError::EmptyResponse)
                } else {
                    Ok(text)
                }
            });

            match outcome {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "{phase}: attempt {attempt}/{} failed: {e}",
                        self.max_attempts
                    );
                    last = e;
                    if attempt < self.max_attempts {
                        let delay = self.delay_after(attempt);
                        if !delay.is_zero() {
                            warn!("{phase}: retrying in {}s", delay.as_secs_f32());
                            thread::sleep(delay);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(GenerationError::Exhausted {
            phase,
            attempts: self.max_attempts,
            last: Box::new(last),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedGenerator;
    use super::*;

    fn prompt() -> Prompt {
        Prompt {
            system: "sys".to_string(),
            user: "user".to_string(),
        }
    }

    #[test]
    fn test_attempts_are_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
        assert_eq!(RetryPolicy::new(3, Duration::ZERO).max_attempts(), 3);
        assert_eq!(RetryPolicy::new(50, Duration::ZERO).max_attempts(), 5);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(16));
    }

    #[test]
    fn test_blank_responses_exhaust_attempts() {
        let generator = ScriptedGenerator::new(vec![
            Ok(String::new()),
            Ok("   \n".to_string()),
            Ok(String::new()),
            Ok(String::new()),
            Ok(String::new()),
            Ok("too late".to_string()),
        ]);
        let err = RetryPolicy::new(5, Duration::ZERO)
            .call(&generator, &prompt(), Phase::Request)
            .unwrap_err();

        assert_eq!(generator.calls(), 5);
        assert_eq!(
            err,
            GenerationError::Exhausted {
                phase: Phase::Request,
                attempts: 5,
                last: Box::new(GenerationError::EmptyResponse),
            }
        );
    }

    #[test]
    fn test_transient_then_success() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::Transient("timeout".to_string())),
            Ok("print(1)".to_string()),
        ]);
        let text = RetryPolicy::new(5, Duration::ZERO)
            .call(&generator, &prompt(), Phase::Continuation)
            .unwrap();
        assert_eq!(text, "print(1)");
        assert_eq!(generator.calls(), 2);
    }

    #[test]
    fn test_auth_is_not_retried() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::Auth("bad key".to_string())),
            Ok("never".to_string()),
        ]);
        let err = RetryPolicy::new(5, Duration::ZERO)
            .call(&generator, &prompt(), Phase::Request)
            .unwrap_err();
        assert!(matches!(err, GenerationError::Auth(_)));
        assert_eq!(generator.calls(), 1);
    }

    #[test]
    fn test_rejection_is_not_retried() {
        let generator = ScriptedGenerator::new(vec![Err(GenerationError::Rejected {
            status: 400,
            body: "bad request".to_string(),
        })]);
        let err = RetryPolicy::new(3, Duration::ZERO)
            .call(&generator, &prompt(), Phase::Request)
            .unwrap_err();
        assert!(matches!(err, GenerationError::Rejected { status: 400, .. }));
        assert_eq!(generator.calls(), 1);
    }
}
