//! Blocking client for OpenAI-compatible `/chat/completions` endpoints.
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{GenerationError, Generator, Prompt};
use crate::config::GenerationConfig;

// ── Constants ────────────────────────────────────────────────────────

/// Error bodies longer than this are cut before they reach an error message.
const MAX_ERROR_BODY_CHARS: usize = 2000;

const USER_AGENT: &str = concat!("codemend/", env!("CARGO_PKG_VERSION"));

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

// ── Client ───────────────────────────────────────────────────────────

pub struct ChatClient {
    http: reqwest::blocking::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GenerationError::Transient(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            http,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
        })
    }

    /// Build a client from configuration, reading the key from the environment.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = config.api_key().ok_or_else(|| {
            GenerationError::Auth(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        Self::new(
            &config.api_url,
            api_key,
            &config.model,
            config.temperature,
            config.request_timeout(),
        )
    }
}

impl Generator for ChatClient {
    fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: &prompt.system,
                },
                Message {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            stream: false,
        };

        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| GenerationError::Transient(format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| GenerationError::Transient(format!("reading response failed: {e}")))?;
        debug!("{} answered {status} with {} bytes", self.api_url, body.len());

        classify_status(status.as_u16(), &body)?;
        Ok(extract_content(&body))
    }
}

/// Map a non-success HTTP status to the matching error.
fn classify_status(status: u16, body: &str) -> Result<(), GenerationError> {
    let body = truncate_chars(body, MAX_ERROR_BODY_CHARS);
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(GenerationError::Auth(format!("HTTP {status}: {body}"))),
        408 | 429 | 500..=599 => Err(GenerationError::Transient(format!("HTTP {status}: {body}"))),
        _ => Err(GenerationError::Rejected {
            status,
            body: body.to_string(),
        }),
    }
}

/// Pull the generated text out of a response body.
///
/// Accepts `choices[0].message.content`, then a top-level `result` string,
/// and otherwise returns the raw body.
fn extract_content(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };

    if let Some(content) = json
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        return content.to_string();
    }
    if let Some(result) = json.get("result").and_then(Value::as_str) {
        return result.to_string();
    }
    body.to_string()
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_chat_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"print(1)"}}]}"#;
        assert_eq!(extract_content(body), "print(1)");
    }

    #[test]
    fn test_extract_result_field() {
        assert_eq!(extract_content(r#"{"result":"x = 1"}"#), "x = 1");
    }

    #[test]
    fn test_extract_raw_text() {
        assert_eq!(extract_content("def f(): pass"), "def f(): pass");
        // Empty choices: nothing better than the body itself.
        assert_eq!(extract_content(r#"{"choices":[]}"#), r#"{"choices":[]}"#);
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(200, "").is_ok());
        assert!(matches!(classify_status(401, ""), Err(GenerationError::Auth(_))));
        assert!(matches!(classify_status(403, ""), Err(GenerationError::Auth(_))));
        assert!(matches!(classify_status(429, ""), Err(GenerationError::Transient(_))));
        assert!(matches!(classify_status(503, ""), Err(GenerationError::Transient(_))));
        assert!(matches!(
            classify_status(400, "bad"),
            Err(GenerationError::Rejected { status: 400, .. })
        ));
    }

    #[test]
    fn test_error_body_is_truncated() {
        let body = "é".repeat(MAX_ERROR_BODY_CHARS + 10);
        let Err(GenerationError::Rejected { body: kept, .. }) = classify_status(422, &body) else {
            panic!("expected rejection");
        };
        assert_eq!(kept.chars().count(), MAX_ERROR_BODY_CHARS);
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = GenerationConfig {
            api_key_env: "CODEMEND_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..GenerationConfig::default()
        };
        assert!(matches!(
            ChatClient::from_config(&config),
            Err(GenerationError::Auth(_))
        ));
    }
}
