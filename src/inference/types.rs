//! Shared types for the inference client.
//!
//! These mirror the OpenAI Chat Completions API types, used for both
//! request building and response parsing.

use serde::{Deserialize, Serialize};

use super::errors::InferenceError;

// ─── Request Types ───────────────────────────────────────────────────────────

/// A single message in the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Structured output format hint for the model.
///
/// When set to `json_object`, OpenAI-compatible servers constrain the reply
/// to a single JSON object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    /// The format type. Currently only `"json_object"` is supported.
    pub r#type: String,
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// A single completion request from the agent nodes.
///
/// Nodes speak in (system, user) prompt pairs; the client turns these into
/// chat messages.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Ask the backend for a JSON object reply.
    pub json_mode: bool,
    /// Override the model's configured temperature.
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            json_mode: false,
            temperature: None,
        }
    }

    /// Request a JSON object reply at low temperature.
    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self.temperature = Some(0.1);
        self
    }
}

// ─── Response Types ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    /// Reasoning models put chain-of-thought here; only `content` is used.
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: Option<String>,
}

/// Extract the assistant text from a non-streaming completion body.
///
/// Returns `Ok(None)` when the model produced no text content.
pub fn parse_completion_body(body: &str) -> Result<Option<String>, InferenceError> {
    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::ResponseParseError {
            reason: format!("failed to parse completion response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::ResponseParseError {
            reason: "empty choices array".into(),
        })?;

    Ok(choice.message.content.filter(|c| !c.trim().is_empty()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
