//! The `LanguageModel` seam.
//!
//! Agent nodes depend on this trait rather than on `InferenceClient`, so the
//! conversation graph can be driven by a scripted model in tests.

use async_trait::async_trait;
use tokio::sync::Mutex as TokioMutex;

use super::client::InferenceClient;
use super::errors::InferenceError;
use super::types::{ChatMessage, CompletionRequest};

/// A text-completion backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one completion and return the assistant text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, InferenceError>;

    /// Model name for logging.
    fn model_name(&self) -> String;
}

/// `InferenceClient` behind an async mutex.
///
/// The client mutates its fallback cursor on failure, so requests are
/// serialized. Each request starts from the active model again.
pub struct SharedInferenceClient {
    inner: TokioMutex<InferenceClient>,
    name: String,
}

impl SharedInferenceClient {
    pub fn new(client: InferenceClient) -> Self {
        let name = client.current_model_name().to_string();
        Self {
            inner: TokioMutex::new(client),
            name,
        }
    }

    /// Whether the active model endpoint answers.
    pub async fn health_check(&self) -> bool {
        self.inner.lock().await.health_check().await
    }
}

#[async_trait]
impl LanguageModel for SharedInferenceClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, InferenceError> {
        let mut client = self.inner.lock().await;
        client.reset_fallbacks();
        let messages = vec![
            ChatMessage::system(request.system_prompt),
            ChatMessage::user(request.user_prompt),
        ];
        let start = std::time::Instant::now();
        let result = client
            .complete(messages, request.json_mode, request.temperature)
            .await;
        tracing::debug!(
            model = client.current_model_key(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "completion finished"
        );
        result
    }

    fn model_name(&self) -> String {
        self.name.clone()
    }
}
