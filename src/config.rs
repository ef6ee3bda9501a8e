//! Application configuration: `config/assistant.yaml`.
//!
//! ```yaml
//! database_path: ${FORM_ASSISTANT_DB:-~/.form-assistant/assistant.db}
//! inference:
//!   active_model: local
//!   models:
//!     local:
//!       display_name: Local Llama
//!       base_url: http://localhost:11434/v1
//! assistant:
//!   confidence_threshold: 0.7
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are interpolated before parsing, with `~`
//! expanded in defaults. Every `assistant` key has a default.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::confidence::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::inference::ModelsConfig;

/// Env var naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "FORM_ASSISTANT_CONFIG";

/// Relative location searched upward from the working directory.
pub const CONFIG_RELATIVE_PATH: &str = "config/assistant.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

// ─── Types ──────────────────────────────────────────────────────────────────

/// Whole config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub inference: ModelsConfig,
    #[serde(default)]
    pub assistant: AssistantSettings,
    /// SQLite file. Defaults to `assistant.db` in the data directory.
    #[serde(default)]
    pub database_path: Option<String>,
}

/// Behaviour knobs for the conversation graph.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantSettings {
    /// Predictions at or above this score skip the alternative menu.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Entries in the alternative menu.
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: usize,
    /// Unrecognised menu answers tolerated before giving up.
    #[serde(default = "default_max_clarification_retries")]
    pub max_clarification_retries: u32,
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: i64,
    /// New sessions never expire within this window.
    #[serde(default = "default_session_grace_minutes")]
    pub session_grace_minutes: i64,
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: u64,
    #[serde(default = "default_forms_cache_ttl_minutes")]
    pub forms_cache_ttl_minutes: u64,
    #[serde(default = "default_turn_timeout_ms")]
    pub turn_timeout_ms: u64,
    #[serde(default = "default_max_graph_steps")]
    pub max_graph_steps: usize,
    /// History entries kept on a session.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Ask optional fields during normal progression.
    #[serde(default)]
    pub ask_optional_fields: bool,
    /// Let the model pull several answers out of one message.
    #[serde(default)]
    pub multi_field_extraction: bool,
    #[serde(default = "default_search_limit")]
    pub search_default_limit: usize,
    #[serde(default = "default_search_max_limit")]
    pub search_max_limit: usize,
    #[serde(default = "default_report_period_days")]
    pub report_default_days: i64,
}

fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}
fn default_max_alternatives() -> usize {
    3
}
fn default_max_clarification_retries() -> u32 {
    3
}
fn default_session_timeout_minutes() -> i64 {
    120
}
fn default_session_grace_minutes() -> i64 {
    10
}
fn default_cleanup_interval_minutes() -> u64 {
    10
}
fn default_forms_cache_ttl_minutes() -> u64 {
    30
}
fn default_turn_timeout_ms() -> u64 {
    60_000
}
fn default_max_graph_steps() -> usize {
    8
}
fn default_max_history() -> usize {
    50
}
fn default_search_limit() -> usize {
    10
}
fn default_search_max_limit() -> usize {
    50
}
fn default_report_period_days() -> i64 {
    30
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_alternatives: default_max_alternatives(),
            max_clarification_retries: default_max_clarification_retries(),
            session_timeout_minutes: default_session_timeout_minutes(),
            session_grace_minutes: default_session_grace_minutes(),
            cleanup_interval_minutes: default_cleanup_interval_minutes(),
            forms_cache_ttl_minutes: default_forms_cache_ttl_minutes(),
            turn_timeout_ms: default_turn_timeout_ms(),
            max_graph_steps: default_max_graph_steps(),
            max_history: default_max_history(),
            ask_optional_fields: false,
            multi_field_extraction: false,
            search_default_limit: default_search_limit(),
            search_max_limit: default_search_max_limit(),
            report_default_days: default_report_period_days(),
        }
    }
}

impl AssistantSettings {
    /// Reject values that would make the graph misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid {
                key: "confidence_threshold".into(),
                reason: format!("{} is outside [0, 1]", self.confidence_threshold),
            });
        }
        if self.max_alternatives == 0 {
            return Err(ConfigError::Invalid {
                key: "max_alternatives".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.cleanup_interval_minutes == 0 {
            return Err(ConfigError::Invalid {
                key: "cleanup_interval_minutes".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.max_graph_steps < 2 {
            return Err(ConfigError::Invalid {
                key: "max_graph_steps".into(),
                reason: "must be at least 2".into(),
            });
        }
        Ok(())
    }

    pub fn turn_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.turn_timeout_ms)
    }

    pub fn forms_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.forms_cache_ttl_minutes * 60)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_minutes * 60)
    }
}

// ─── Loading ────────────────────────────────────────────────────────────────

/// Locate the config file: explicit path, then `FORM_ASSISTANT_CONFIG`, then
/// an upward search from `start` for `config/assistant.yaml`.
pub fn find_config_path(explicit: Option<&Path>, start: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points to a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_RELATIVE_PATH);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Read, interpolate and parse a config file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

/// Parse config text (after env-var interpolation).
pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    let mut config: AppConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
    config.assistant.validate()?;
    config.database_path = config.database_path.map(|p| expand_tilde(&p));
    Ok(config)
}

/// Resolve and load, falling back to built-in defaults when no file exists.
pub fn load_or_default(explicit: Option<&Path>) -> Result<(AppConfig, Option<PathBuf>), ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match find_config_path(explicit, &cwd) {
        Some(path) => {
            let config = load_config(&path)?;
            tracing::info!(path = %path.display(), "loaded config");
            Ok((config, Some(path)))
        }
        None => {
            tracing::info!("no config file found, using defaults");
            Ok((AppConfig::default(), None))
        }
    }
}

// ─── Env-var interpolation ──────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__FA_TEST_MISSING__");
        assert_eq!(
            interpolate_env_vars("db: ${__FA_TEST_MISSING__:-/fallback/a.db}"),
            "db: /fallback/a.db"
        );
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__FA_TEST_SET__", "/custom.db");
        assert_eq!(interpolate_env_vars("${__FA_TEST_SET__:-/x}"), "/custom.db");
        std::env::remove_var("__FA_TEST_SET__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain $text";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/forms");
        assert!(!result.starts_with('~'));
        assert!(result.ends_with("/forms"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.assistant.confidence_threshold, 0.7);
        assert_eq!(config.assistant.max_alternatives, 3);
        assert_eq!(config.assistant.session_timeout_minutes, 120);
        assert_eq!(config.assistant.forms_cache_ttl_minutes, 30);
        assert!(!config.assistant.ask_optional_fields);
        assert_eq!(config.inference.active_model, "local");
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
database_path: /tmp/fa.db
inference:
  active_model: remote
  fallback_chain: [local]
  models:
    remote:
      display_name: Remote
      base_url: https://api.example.com/v1
      model_name: gpt-4o-mini
      api_key_env: OPENAI_API_KEY
    local:
      display_name: Local
      base_url: http://localhost:11434/v1
assistant:
  confidence_threshold: 0.8
  turn_timeout_ms: 5000
  ask_optional_fields: true
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.database_path.as_deref(), Some("/tmp/fa.db"));
        assert_eq!(config.inference.active_model, "remote");
        assert_eq!(config.inference.fallback_chain, vec!["local"]);
        assert_eq!(config.assistant.confidence_threshold, 0.8);
        assert_eq!(config.assistant.turn_timeout().as_millis(), 5000);
        assert!(config.assistant.ask_optional_fields);
        assert_eq!(config.assistant.max_graph_steps, 8);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = parse_config("assistant:\n  confidence_threshold: 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_find_config_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(dir.path().join(CONFIG_RELATIVE_PATH), "{}").unwrap();

        let found = find_config_path(None, &nested);
        // FORM_ASSISTANT_CONFIG may be set in the environment running tests.
        if std::env::var(CONFIG_ENV_VAR).is_err() {
            assert_eq!(found, Some(dir.path().join(CONFIG_RELATIVE_PATH)));
        }

        let explicit = dir.path().join("other.yaml");
        assert_eq!(find_config_path(Some(&explicit), &nested), Some(explicit));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = parse_config(include_str!("../config/assistant.yaml")).unwrap();
        assert_eq!(config.inference.active_model, "local");
        assert_eq!(config.inference.fallback_chain, vec!["hosted".to_string()]);
        assert_eq!(config.assistant.forms_cache_ttl_minutes, 30);
        assert!(config.database_path.is_some_and(|p| !p.starts_with('~')));
    }
}
