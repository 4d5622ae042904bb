//! Inference Service abstraction and the gateway every phase calls through

mod backend;
mod error;
mod gateway;
pub mod genai_backend;
mod limiter;
pub mod mock;
pub mod recording;
mod types;

pub use backend::InferenceBackend;
pub use error::{BackendError, GatewayError};
pub use gateway::{GatewayConfig, GatewayStats, InferenceGateway, RetryPolicy};
pub use genai_backend::GenAIBackend;
pub use limiter::{ConcurrencyLimiter, LimiterPermit};
pub use mock::{MockInferenceBackend, MockResponse};
pub use recording::{RecordingBackend, RecordingMode};
pub use types::{ImageInput, InferenceRequest, InferenceResponse};
