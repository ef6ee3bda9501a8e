//! Model configuration and fallback resolution.
//!
//! Mirrors the `inference:` section of `config/assistant.yaml`. The file
//! loader (with env-var interpolation) lives in `crate::config`.

use std::collections::HashMap;

use serde::Deserialize;

use super::errors::InferenceError;

// ─── Public Types ────────────────────────────────────────────────────────────

/// A single model endpoint's runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub display_name: String,
    /// OpenAI-compatible base URL, e.g. `http://localhost:11434/v1`.
    pub base_url: String,
    /// Model identifier sent in the request body. Defaults to the config key.
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Name of the env var holding a bearer token, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    1024
}

/// Model registry: active model plus ordered fallbacks.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub active_model: String,
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub fallback_chain: Vec<String>,
}

impl Default for ModelsConfig {
    /// A single local Ollama endpoint.
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "local".to_string(),
            ModelConfig {
                display_name: "Local model".to_string(),
                base_url: "http://localhost:11434/v1".to_string(),
                model_name: Some("llama3.1:8b".to_string()),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
                api_key_env: None,
            },
        );
        Self {
            active_model: "local".to_string(),
            models,
            fallback_chain: Vec::new(),
        }
    }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Resolve the active model configuration, respecting the fallback chain.
///
/// Returns `(model_key, ModelConfig)` for the first model present in the
/// config. Connectivity is checked at request time by the client.
pub fn resolve_active_model(config: &ModelsConfig) -> Result<(String, ModelConfig), InferenceError> {
    if let Some(model) = config.models.get(&config.active_model) {
        return Ok((config.active_model.clone(), model.clone()));
    }

    for key in &config.fallback_chain {
        if let Some(model) = config.models.get(key) {
            return Ok((key.clone(), model.clone()));
        }
    }

    Err(InferenceError::ConfigError {
        reason: format!(
            "active model '{}' not found in config and no fallback available",
            config.active_model
        ),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_active_model_not_found() {
        let config = ModelsConfig {
            active_model: "nonexistent".into(),
            models: HashMap::new(),
            fallback_chain: vec![],
        };
        assert!(resolve_active_model(&config).is_err());
    }

    #[test]
    fn test_resolve_uses_fallback_when_active_missing() {
        let mut config = ModelsConfig::default();
        config.active_model = "gone".into();
        config.fallback_chain = vec!["missing".into(), "local".into()];
        let (key, model) = resolve_active_model(&config).unwrap();
        assert_eq!(key, "local");
        assert_eq!(model.display_name, "Local model");
    }

    #[test]
    fn test_model_defaults_from_yaml() {
        let yaml = r#"
            active_model: test
            models:
              test:
                display_name: Test
                base_url: http://localhost:1234/v1
        "#;
        let config: ModelsConfig = serde_yaml::from_str(yaml).unwrap();
        let model = &config.models["test"];
        assert_eq!(model.max_tokens, 1024);
        assert!((model.temperature - 0.3).abs() < f32::EPSILON);
        assert!(model.api_key_env.is_none());
        assert!(config.fallback_chain.is_empty());
    }
}
