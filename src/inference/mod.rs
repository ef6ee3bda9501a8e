//! OpenAI-compatible inference client for the assistant's LLM.
//!
//! This module handles all communication with the model endpoint:
//! - Non-streaming chat completions
//! - Fallback chain management
//! - Model configuration types
//! - The `LanguageModel` trait the agent nodes are written against
//!
//! The client speaks the OpenAI Chat Completions API, so switching between a
//! local Ollama model and a hosted endpoint is a config change.

pub mod client;
pub mod config;
pub mod errors;
pub mod model;
#[cfg(test)]
pub mod scripted;
pub mod types;

// Re-exports for convenience
pub use client::InferenceClient;
pub use config::{ModelConfig, ModelsConfig};
pub use errors::InferenceError;
pub use model::{LanguageModel, SharedInferenceClient};
pub use types::{ChatMessage, CompletionRequest, Role};
