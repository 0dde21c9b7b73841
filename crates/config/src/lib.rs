//! Configuration loading, validation, and management for ragline.
//!
//! Loads configuration from `~/.ragline/config.toml` with environment
//! variable overrides. Validates all settings at startup. Values are fixed
//! for the lifetime of a process; each request sees one consistent snapshot.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ragline/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Inference engine selection
    #[serde(default)]
    pub engine: EngineConfig,

    /// Context window budgeting
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Persona directive appended to every prompt
    #[serde(default)]
    pub persona: PersonaConfig,

    /// Executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// "echo" (development engine) or "local" (Candle GGUF, needs the `local` feature)
    #[serde(default = "default_engine_kind")]
    pub kind: String,

    /// Preset alias ("tinyllama", "qwen:0.5b", ...) or a path to a `.gguf` file
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature (0.0 = greedy)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Sampling seed
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_engine_kind() -> String {
    "echo".into()
}
fn default_model() -> String {
    "tinyllama".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_seed() -> u64 {
    42
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: default_engine_kind(),
            model: default_model(),
            temperature: default_temperature(),
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Tokens the engine can consider per call (input + output)
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Tokens held back for the generated reply; also the engine's output ceiling
    #[serde(default = "default_reserved_output_tokens")]
    pub reserved_output_tokens: usize,

    /// Characters per estimated token
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Estimated tokens of framing per message (role markers, delimiters)
    #[serde(default = "default_message_overhead")]
    pub message_overhead_tokens: usize,
}

fn default_context_window() -> usize {
    10_000
}
fn default_reserved_output_tokens() -> usize {
    4_000
}
fn default_chars_per_token() -> usize {
    4
}
fn default_message_overhead() -> usize {
    4
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            reserved_output_tokens: default_reserved_output_tokens(),
            chars_per_token: default_chars_per_token(),
            message_overhead_tokens: default_message_overhead(),
        }
    }
}

impl BudgetConfig {
    /// Tokens available for the prompt itself.
    pub fn safe_limit(&self) -> usize {
        self.context_window
            .saturating_sub(self.reserved_output_tokens)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum passages returned per query
    #[serde(default = "default_max_passages")]
    pub max_passages: usize,

    /// Maximum characters per indexed chunk
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Minimum cosine similarity for a passage to be returned
    #[serde(default)]
    pub min_score: f32,

    /// Dimensionality of the hashed bag-of-words embedding
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: usize,
}

fn default_max_passages() -> usize {
    2
}
fn default_chunk_chars() -> usize {
    2_000
}
fn default_embedding_dims() -> usize {
    512
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_passages: default_max_passages(),
            chunk_chars: default_chunk_chars(),
            min_score: 0.0,
            embedding_dims: default_embedding_dims(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// The system-level instruction appended after the conversation
    #[serde(default = "default_persona")]
    pub directive: String,
}

fn default_persona() -> String {
    "You are a helpful assistant.".into()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            directive: default_persona(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Fragments buffered between the engine worker and a request
    #[serde(default = "default_fragment_buffer")]
    pub fragment_buffer: usize,
}

fn default_fragment_buffer() -> usize {
    16
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            fragment_buffer: default_fragment_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Request body limit in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:4200".into()]
}
fn default_body_limit() -> usize {
    4 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: default_cors_origins(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ragline/config.toml).
    ///
    /// Environment variables override file values:
    /// - `RAGLINE_ENGINE`
    /// - `RAGLINE_MODEL`
    /// - `RAGLINE_CONTEXT_WINDOW`
    /// - `RAGLINE_PERSONA`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(kind) = lookup("RAGLINE_ENGINE") {
            self.engine.kind = kind;
        }
        if let Some(model) = lookup("RAGLINE_MODEL") {
            self.engine.model = model;
        }
        if let Some(window) = lookup("RAGLINE_CONTEXT_WINDOW") {
            self.budget.context_window = window.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "RAGLINE_CONTEXT_WINDOW must be a positive integer, got '{window}'"
                ))
            })?;
        }
        if let Some(persona) = lookup("RAGLINE_PERSONA") {
            self.persona.directive = persona;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragline")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.context_window == 0 {
            return Err(ConfigError::ValidationError(
                "budget.context_window must be > 0".into(),
            ));
        }

        if self.budget.reserved_output_tokens >= self.budget.context_window {
            return Err(ConfigError::ValidationError(format!(
                "budget.reserved_output_tokens ({}) must be smaller than budget.context_window ({})",
                self.budget.reserved_output_tokens, self.budget.context_window
            )));
        }

        if self.budget.chars_per_token == 0 {
            return Err(ConfigError::ValidationError(
                "budget.chars_per_token must be > 0".into(),
            ));
        }

        if self.retrieval.chunk_chars == 0 || self.retrieval.embedding_dims == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.chunk_chars and retrieval.embedding_dims must be > 0".into(),
            ));
        }

        if self.engine.temperature < 0.0 || self.engine.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "engine.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !matches!(self.engine.kind.as_str(), "echo" | "local") {
            return Err(ConfigError::ValidationError(format!(
                "engine.kind must be \"echo\" or \"local\", got \"{}\"",
                self.engine.kind
            )));
        }

        if self.executor.fragment_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "executor.fragment_buffer must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.budget.context_window, 10_000);
        assert_eq!(config.budget.reserved_output_tokens, 4_000);
        assert_eq!(config.budget.safe_limit(), 6_000);
        assert_eq!(config.retrieval.max_passages, 2);
        assert_eq!(config.persona.directive, "You are a helpful assistant.");
        assert_eq!(config.gateway.port, 8000);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.engine.kind, config.engine.kind);
        assert_eq!(parsed.budget.context_window, config.budget.context_window);
        assert_eq!(parsed.gateway.cors_origins, config.gateway.cors_origins);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[budget]
context_window = 2048
reserved_output_tokens = 512

[persona]
directive = "Answer in French."
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.budget.context_window, 2048);
        assert_eq!(config.budget.reserved_output_tokens, 512);
        assert_eq!(config.budget.chars_per_token, 4);
        assert_eq!(config.persona.directive, "Answer in French.");
        assert_eq!(config.retrieval.max_passages, 2);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[budget\ncontext_window = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn reserved_output_must_leave_room() {
        let mut config = AppConfig::default();
        config.budget.reserved_output_tokens = config.budget.context_window;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reserved_output_tokens"));
    }

    #[test]
    fn zero_chars_per_token_rejected() {
        let mut config = AppConfig::default();
        config.budget.chars_per_token = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_engine_kind_rejected() {
        let mut config = AppConfig::default();
        config.engine.kind = "cloud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.engine.kind, "echo");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env(|key| match key {
                "RAGLINE_MODEL" => Some("qwen:0.5b".into()),
                "RAGLINE_CONTEXT_WINDOW" => Some("8192".into()),
                "RAGLINE_PERSONA" => Some("Be brief.".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.engine.model, "qwen:0.5b");
        assert_eq!(config.budget.context_window, 8192);
        assert_eq!(config.persona.directive, "Be brief.");
        assert_eq!(config.engine.kind, "echo");
    }

    #[test]
    fn bad_context_window_env_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|key| (key == "RAGLINE_CONTEXT_WINDOW").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("context_window"));
        assert!(toml_str.contains("You are a helpful assistant."));
    }
}
