/// Scripted generator for testing purposes.
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{GenerationError, Generator, Prompt};

/// A generator that replays a fixed list of responses in order.
///
/// Once the script runs out every call returns `EmptyResponse`. Prompts are
/// recorded so tests can assert on what was sent.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Generator answering every call with the given texts, in order.
    #[must_use]
    pub fn replies<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(t.into())).collect())
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }

    /// Copies of every prompt received so far.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or(Err(GenerationError::EmptyResponse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replays_in_order_then_runs_dry() {
        let generator = ScriptedGenerator::replies(["a", "b"]);
        let prompt = Prompt {
            system: String::new(),
            user: "hi".to_string(),
        };
        assert_eq!(generator.generate(&prompt).unwrap(), "a");
        assert_eq!(generator.generate(&prompt).unwrap(), "b");
        assert_eq!(
            generator.generate(&prompt).unwrap_err(),
            GenerationError::EmptyResponse
        );
        assert_eq!(generator.calls(), 3);
        assert_eq!(generator.prompts()[0].user, "hi");
    }
}
