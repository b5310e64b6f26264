//! Session configuration
//!
//! Defaults target a local LM Studio server. `from_env` layers environment
//! variables (and a `.env` file, via dotenvy) on top of the defaults.

use crate::error::ChatError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://localhost:1234/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-oss-20b";
pub const DEFAULT_TEMPERATURE: f64 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
/// Room for a system message plus the newest user message
pub const MIN_HISTORY_LIMIT: usize = 2;
pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub const MIN_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 1.0;
pub const MAX_TOKENS_LIMIT: u32 = 8192;

/// File holding a Brave Search key, looked up in the working and home directories
pub const BRAVE_KEY_FILE: &str = ".env.brave.api";

/// Clamp a temperature into [0.0, 1.0]; NaN falls back to the default
pub fn clamp_temperature(temperature: f64) -> f64 {
    if temperature.is_nan() {
        return DEFAULT_TEMPERATURE;
    }
    temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

/// Clamp an output token budget into [1, 8192]
pub fn clamp_max_tokens(max_tokens: u32) -> u32 {
    max_tokens.clamp(1, MAX_TOKENS_LIMIT)
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    /// Bearer token for the completion endpoint
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub history_limit: usize,
    pub max_iterations: usize,
    pub timeout: Duration,
    /// Print reasoning fragments (binary only)
    pub show_thinking: bool,
    pub system_prompt: Option<String>,
    pub brave_api_key: Option<String>,
    /// Sandbox root for filesystem tools; the working directory when unset
    pub root: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            show_thinking: false,
            system_prompt: None,
            brave_api_key: None,
            root: None,
        }
    }
}

impl SessionConfig {
    /// Load from the process environment
    ///
    /// A `.env` file in the working directory (or its parent) is read first.
    /// When `BRAVE_API_KEY` is unset the key is read from `.env.brave.api` in
    /// the working directory, then the home directory.
    pub fn from_env() -> Result<Self, ChatError> {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_path("../.env");
        }

        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;

        if config.brave_api_key.is_none() {
            let mut dirs = vec![PathBuf::from(".")];
            if let Some(home) = dirs::home_dir() {
                dirs.push(home);
            }
            config.brave_api_key = brave_key_from_files(&dirs);
        }

        Ok(config)
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(url) = get("AGENTIC_BASE_URL") {
            config.base_url = url;
        }
        if let Some(model) = get("AGENTIC_MODEL") {
            config.model = model;
        }
        if let Some(value) = get("AGENTIC_TEMPERATURE") {
            config.temperature = parse_var("AGENTIC_TEMPERATURE", &value)?;
        }
        if let Some(value) = get("AGENTIC_MAX_TOKENS") {
            config.max_tokens = parse_var("AGENTIC_MAX_TOKENS", &value)?;
        }
        if let Some(value) = get("AGENTIC_HISTORY_LIMIT") {
            config.history_limit = parse_var("AGENTIC_HISTORY_LIMIT", &value)?;
        }
        if let Some(value) = get("AGENTIC_MAX_ITERATIONS") {
            config.max_iterations = parse_var("AGENTIC_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = get("AGENTIC_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_var("AGENTIC_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = get("AGENTIC_SHOW_THINKING") {
            config.show_thinking = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        config.system_prompt = get("AGENTIC_SYSTEM_PROMPT");
        config.api_key = get("LMSTUDIO_API_KEY");
        config.brave_api_key = get("BRAVE_API_KEY");
        config.root = get("AGENTIC_ROOT").map(PathBuf::from);

        Ok(config.normalized())
    }

    /// Clamp numeric settings into their valid ranges
    pub fn normalized(mut self) -> Self {
        self.temperature = clamp_temperature(self.temperature);
        self.max_tokens = clamp_max_tokens(self.max_tokens);
        self.history_limit = self.history_limit.max(MIN_HISTORY_LIMIT);
        self.max_iterations = self.max_iterations.max(1);
        if self.timeout.is_zero() {
            self.timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        }
        self
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ChatError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ChatError::Config(format!("{}={:?}: {}", key, value, e)))
}

/// First non-empty key file found in `dirs`
pub fn brave_key_from_files(dirs: &[PathBuf]) -> Option<String> {
    dirs.iter().find_map(|dir| read_key_file(&dir.join(BRAVE_KEY_FILE)))
}

fn read_key_file(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let key = content.trim();
    if key.is_empty() {
        return None;
    }
    debug!(path = %path.display(), "Loaded Brave API key from file");
    Some(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url, "http://localhost:1234/v1");
        assert_eq!(config.model, "openai/gpt-oss-20b");
        assert_eq!(config.temperature, 0.3);
        assert_eq!(config.max_tokens, 2048);
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert!(config.api_key.is_none());
        assert!(!config.show_thinking);
    }

    #[test]
    fn test_overrides_are_clamped() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("AGENTIC_MODEL", "qwen2.5-7b"),
            ("AGENTIC_TEMPERATURE", "1.5"),
            ("AGENTIC_MAX_TOKENS", "99999"),
            ("AGENTIC_MAX_ITERATIONS", "0"),
            ("AGENTIC_HISTORY_LIMIT", "1"),
            ("AGENTIC_SHOW_THINKING", "TRUE"),
            ("LMSTUDIO_API_KEY", " secret "),
            ("BRAVE_API_KEY", ""),
        ]))
        .unwrap();

        assert_eq!(config.model, "qwen2.5-7b");
        assert_eq!(config.temperature, 1.0);
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.max_iterations, 1);
        assert_eq!(config.history_limit, 2);
        assert!(config.show_thinking);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert!(config.brave_api_key.is_none());
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = SessionConfig::from_lookup(lookup(&[("AGENTIC_MAX_TOKENS", "lots")])).unwrap_err();
        assert!(matches!(err, ChatError::Config(msg) if msg.contains("AGENTIC_MAX_TOKENS")));
    }

    #[test]
    fn test_clamps() {
        assert_eq!(clamp_temperature(-0.5), 0.0);
        assert_eq!(clamp_temperature(0.7), 0.7);
        assert_eq!(clamp_temperature(f64::NAN), DEFAULT_TEMPERATURE);
        assert_eq!(clamp_max_tokens(0), 1);
        assert_eq!(clamp_max_tokens(100_000), 8192);
    }

    #[test]
    fn test_brave_key_file_lookup() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::write(first.path().join(BRAVE_KEY_FILE), "  \n").unwrap();
        std::fs::write(second.path().join(BRAVE_KEY_FILE), "brave-key\n").unwrap();

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(brave_key_from_files(&dirs).as_deref(), Some("brave-key"));
        assert!(brave_key_from_files(&[first.path().to_path_buf()]).is_none());
    }
}
