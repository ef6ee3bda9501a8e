//! Agent Core error types.

use thiserror::Error;

use super::types::SessionState;
use crate::inference::InferenceError;

/// Errors that can occur during agent core operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// Session not found.
    #[error("session not found: '{session_id}'")]
    SessionNotFound { session_id: String },

    /// Session exists but belongs to another user.
    #[error("session '{session_id}' does not belong to user '{user_id}'")]
    SessionOwnership { session_id: String, user_id: String },

    /// Form template not found or not accessible.
    #[error("form template not found: '{form_id}'")]
    FormNotFound { form_id: String },

    /// Session state machine rejected a transition.
    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// LLM call failed and the caller had no fallback.
    #[error("inference failed: {reason}")]
    InferenceFailed { reason: String },

    /// The orchestration graph did not terminate.
    #[error("conversation graph exceeded {steps} steps")]
    GraphLimitExceeded { steps: usize },

    /// Form/seed file could not be loaded.
    #[error("seed error: {reason}")]
    SeedError { reason: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}

impl From<InferenceError> for AgentError {
    fn from(e: InferenceError) -> Self {
        AgentError::InferenceFailed {
            reason: e.to_string(),
        }
    }
}
