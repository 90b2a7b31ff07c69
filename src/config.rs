/// Configuration module for codemend.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codec::TRUNCATION_MARKER;
use crate::generation::prompts::STOP_SENTINEL;

pub const DEFAULT_CONFIG_PATH: &str = "codemend.json";

// ── Default value functions ──────────────────────────────────────────

fn default_project_dir() -> String {
    "./".to_string()
}

fn default_api_url() -> String {
    "https://api.deepseek.com/chat/completions".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_secs() -> u64 {
    1
}

fn default_api_key_env() -> String {
    "DEEPSEEK_API_KEY".to_string()
}

fn default_readable_extensions() -> Vec<String> {
    [".py", ".html", ".css", ".js", ".json", ".md", ".txt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_fallback_extensions() -> Vec<String> {
    [".py", ".md", ".txt", ".html", ".js", ".css", ".json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_exclude_patterns() -> Vec<String> {
    vec!["*.bak.*".to_string(), "**/__pycache__/**".to_string()]
}

fn default_min_query_token_chars() -> usize {
    3
}

fn default_context_lines() -> usize {
    2
}

fn default_stop_sentinel() -> String {
    STOP_SENTINEL.to_string()
}

fn default_truncation_marker() -> String {
    TRUNCATION_MARKER.to_string()
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_project_dir")]
    pub project_dir: String,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub files: FilesConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per call, clamped to 1..=5 when the session is built.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FilesConfig {
    #[serde(default = "default_readable_extensions")]
    pub readable_extensions: Vec<String>,

    #[serde(default = "default_fallback_extensions")]
    pub fallback_extensions: Vec<String>,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_min_query_token_chars")]
    pub min_query_token_chars: usize,

    #[serde(default = "default_context_lines")]
    pub context_lines: usize,

    /// Ask the generator which files to change before falling back to
    /// keyword matching.
    #[serde(default)]
    pub generator_selection: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProtocolConfig {
    #[serde(default = "default_stop_sentinel")]
    pub stop_sentinel: String,

    #[serde(default = "default_truncation_marker")]
    pub truncation_marker: String,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            generation: GenerationConfig::default(),
            files: FilesConfig::default(),
            search: SearchConfig::default(),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            readable_extensions: default_readable_extensions(),
            fallback_extensions: default_fallback_extensions(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_query_token_chars: default_min_query_token_chars(),
            context_lines: default_context_lines(),
            generator_selection: false,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            stop_sentinel: default_stop_sentinel(),
            truncation_marker: default_truncation_marker(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl GenerationConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    /// Read the API key from the configured environment variable.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"codemend.json"`.
    /// If the file does not exist, returns a default config and generates a
    /// template file for the default path.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == DEFAULT_CONFIG_PATH {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let mut cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");

        // An empty allow-list would make every scan silently empty.
        if cfg.files.readable_extensions.is_empty() {
            cfg.files.readable_extensions = default_readable_extensions();
        }

        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (1..=5).contains(&self.generation.max_attempts),
            "generation.max_attempts must be between 1 and 5"
        );
        anyhow::ensure!(
            self.generation.request_timeout_secs > 0,
            "generation.request_timeout_secs must be positive"
        );
        anyhow::ensure!(
            (0.0..=2.0).contains(&self.generation.temperature),
            "generation.temperature must be between 0 and 2"
        );
        anyhow::ensure!(
            !self.protocol.stop_sentinel.trim().is_empty(),
            "protocol.stop_sentinel must not be empty"
        );
        anyhow::ensure!(
            !self.files.readable_extensions.is_empty(),
            "at least one readable extension must be specified"
        );
        for pattern in &self.files.exclude_patterns {
            globset::Glob::new(pattern)
                .with_context(|| format!("invalid exclude pattern: {pattern}"))?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
