//! Parse structured replies from the model.
//!
//! Models wrap JSON in markdown fences or add a sentence before and after
//! it. The outermost `{ ... }` span is taken and deserialized.

use serde::de::DeserializeOwned;

use super::errors::AgentError;

/// Slice from the first `{` to the last `}`, or the whole text.
pub fn extract_json(text: &str) -> &str {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            return &text[start..=end];
        }
    }
    text.trim()
}

/// Deserialize the JSON object embedded in a model reply.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, AgentError> {
    let json = extract_json(text);
    serde_json::from_str(json).map_err(|e| {
        tracing::debug!(
            error = %e,
            preview = %text.chars().take(200).collect::<String>(),
            "unparsable model reply"
        );
        AgentError::InferenceFailed {
            reason: format!("unparsable model reply: {e}"),
        }
    })
}
