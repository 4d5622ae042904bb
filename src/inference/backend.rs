use super::error::BackendError;
use super::types::{InferenceRequest, InferenceResponse};
use async_trait::async_trait;

/// The inference service: images plus a prompt in, text out.
///
/// Implementations perform exactly one service round trip per call. Retries,
/// timeouts and concurrency limits belong to the `InferenceGateway`.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn call(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError>;

    /// Backend name for logging (e.g. "OpenAI", "Mock")
    fn name(&self) -> &str;

    fn model_info(&self) -> Option<String> {
        None
    }
}
