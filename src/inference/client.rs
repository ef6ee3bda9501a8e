//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests to the configured LLM
//! endpoint. Handles the fallback chain when the primary model is
//! unavailable.

use std::time::Duration;

use reqwest::Client as HttpClient;

use super::config::{ModelConfig, ModelsConfig};
use super::errors::InferenceError;
use super::types::{parse_completion_body, ChatCompletionRequest, ChatMessage, ResponseFormat};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for a single completion call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for the LLM inference endpoint.
///
/// Created from `ModelsConfig` and holds the current model configuration.
pub struct InferenceClient {
    http: HttpClient,
    /// The full models configuration (for fallback chain).
    config: ModelsConfig,
    /// The current model key (e.g., "local").
    current_model_key: String,
    /// The current model configuration.
    current_model: ModelConfig,
    /// Models that have already been tried and failed.
    exhausted_models: Vec<String>,
}

impl InferenceClient {
    /// Create a new inference client from the models configuration.
    ///
    /// Resolves the active model from config. Does NOT check connectivity;
    /// that happens on the first request.
    pub fn from_config(config: ModelsConfig) -> Result<Self, InferenceError> {
        let (key, model) = super::config::resolve_active_model(&config)?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: model.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            current_model_key: key,
            current_model: model,
            exhausted_models: Vec::new(),
        })
    }

    /// The name of the currently selected model.
    pub fn current_model_name(&self) -> &str {
        &self.current_model.display_name
    }

    /// The key of the currently selected model.
    pub fn current_model_key(&self) -> &str {
        &self.current_model_key
    }

    // ─── Chat Completion ─────────────────────────────────────────────────

    /// Send a chat completion, walking the fallback chain on retriable errors.
    ///
    /// Returns the assistant's text. An empty reply is an error so callers
    /// can apply their own fallback.
    pub async fn complete(
        &mut self,
        messages: Vec<ChatMessage>,
        json_mode: bool,
        temperature: Option<f32>,
    ) -> Result<String, InferenceError> {
        let mut last_error: Option<InferenceError> = None;

        for _attempt in 0..=self.remaining_fallbacks() {
            match self.chat_completion(&messages, json_mode, temperature).await {
                Ok(Some(text)) => return Ok(text),
                Ok(None) => {
                    return Err(InferenceError::EmptyResponse {
                        model: self.current_model_key.clone(),
                    })
                }
                Err(e) if e.is_retriable() => {
                    tracing::warn!(
                        model = %self.current_model_key,
                        error = %e,
                        body = e.error_body().unwrap_or_default(),
                        "model request failed, trying fallback"
                    );
                    last_error = Some(e);
                    if self.try_next_fallback().is_err() {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(InferenceError::AllModelsUnavailable {
            attempted: self.exhausted_models.clone(),
        }))
    }

    /// Send a single non-streaming request to the current model.
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        json_mode: bool,
        temperature: Option<f32>,
    ) -> Result<Option<String>, InferenceError> {
        let url = format!(
            "{}/chat/completions",
            self.current_model.base_url.trim_end_matches('/')
        );
        let model_name = self
            .current_model
            .model_name
            .clone()
            .unwrap_or_else(|| self.current_model_key.clone());

        let body = ChatCompletionRequest {
            model: model_name,
            messages: messages.to_vec(),
            temperature: temperature.unwrap_or(self.current_model.temperature),
            max_tokens: self.current_model.max_tokens,
            stream: false,
            response_format: json_mode.then(|| ResponseFormat {
                r#type: "json_object".to_string(),
            }),
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = self.api_key() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: REQUEST_TIMEOUT.as_secs(),
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::ResponseParseError {
                reason: format!("failed to read response body: {e}"),
            })?;

        parse_completion_body(&body_text)
    }

    fn api_key(&self) -> Option<String> {
        self.current_model
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.is_empty())
    }

    // ─── Health Check ────────────────────────────────────────────────────

    /// Check if the current model endpoint is reachable.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.current_model.base_url.trim_end_matches('/'));
        match self.http.get(&url).timeout(CONNECT_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    // ─── Fallback Chain ──────────────────────────────────────────────────

    /// Move to the next model in the fallback chain.
    ///
    /// Returns `Err` if no more fallbacks are available.
    pub fn try_next_fallback(&mut self) -> Result<(), InferenceError> {
        self.exhausted_models.push(self.current_model_key.clone());

        for key in &self.config.fallback_chain {
            if self.exhausted_models.contains(key) {
                continue;
            }
            if let Some(model) = self.config.models.get(key) {
                self.current_model_key = key.clone();
                self.current_model = model.clone();
                return Ok(());
            }
        }

        Err(InferenceError::AllModelsUnavailable {
            attempted: self.exhausted_models.clone(),
        })
    }

    /// Number of fallback models not yet tried.
    fn remaining_fallbacks(&self) -> usize {
        self.config
            .fallback_chain
            .iter()
            .filter(|k| !self.exhausted_models.contains(k) && **k != self.current_model_key)
            .filter(|k| self.config.models.contains_key(k.as_str()))
            .count()
    }

    /// Forget exhausted models so the next turn starts from the active model.
    pub fn reset_fallbacks(&mut self) {
        if self.exhausted_models.is_empty() {
            return;
        }
        if let Ok((key, model)) = super::config::resolve_active_model(&self.config) {
            self.current_model_key = key;
            self.current_model = model;
        }
        self.exhausted_models.clear();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn model(name: &str, port: u16) -> ModelConfig {
        ModelConfig {
            display_name: name.to_string(),
            base_url: format!("http://127.0.0.1:{port}/v1"),
            model_name: None,
            temperature: 0.2,
            max_tokens: 256,
            api_key_env: None,
        }
    }

    fn test_config() -> ModelsConfig {
        let mut models = HashMap::new();
        models.insert("model-a".to_string(), model("Model A", 9));
        models.insert("model-b".to_string(), model("Model B", 9));
        ModelsConfig {
            active_model: "model-a".to_string(),
            models,
            fallback_chain: vec!["model-a".to_string(), "model-b".to_string()],
        }
    }

    #[test]
    fn test_from_config_selects_active_model() {
        let client = InferenceClient::from_config(test_config()).unwrap();
        assert_eq!(client.current_model_key(), "model-a");
        assert_eq!(client.current_model_name(), "Model A");
    }

    #[test]
    fn test_fallback_chain() {
        let mut client = InferenceClient::from_config(test_config()).unwrap();
        client.try_next_fallback().unwrap();
        assert_eq!(client.current_model_key(), "model-b");
        assert!(client.try_next_fallback().is_err());
    }

    #[test]
    fn test_remaining_fallbacks() {
        let client = InferenceClient::from_config(test_config()).unwrap();
        assert_eq!(client.remaining_fallbacks(), 1);
    }

    #[test]
    fn test_reset_fallbacks_returns_to_active() {
        let mut client = InferenceClient::from_config(test_config()).unwrap();
        client.try_next_fallback().unwrap();
        client.reset_fallbacks();
        assert_eq!(client.current_model_key(), "model-a");
        assert_eq!(client.remaining_fallbacks(), 1);
    }

    #[tokio::test]
    async fn test_complete_unreachable_exhausts_chain() {
        // Port 9 (discard) is closed on test machines; every model fails to connect.
        let mut client = InferenceClient::from_config(test_config()).unwrap();
        let result = client
            .complete(vec![ChatMessage::user("hello")], false, None)
            .await;
        assert!(result.is_err());
        assert_eq!(client.current_model_key(), "model-b");
    }
}
