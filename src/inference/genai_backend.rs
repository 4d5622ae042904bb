//! GenAI-based multimodal backend
//!
//! Supports every provider the `genai` crate does (OpenAI, Anthropic,
//! Gemini, Ollama, xAI, Groq). Images are fetched and re-encoded by the
//! `ImagePreparer` and sent as base64 JPEG parts after the text prompt.

use super::backend::InferenceBackend;
use super::error::BackendError;
use super::types::{InferenceRequest, InferenceResponse};
use crate::images::ImagePreparer;
use async_trait::async_trait;
use futures_util::future::try_join_all;
use genai::adapter::AdapterKind;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ContentPart, MessageContent};
use genai::resolver::{AuthData, Endpoint, ServiceTargetResolver};
use genai::{Client, ModelIden, ServiceTarget};
use regex::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, error};

const SYSTEM_PROMPT: &str = "You are an automotive damage assessor. Please analyze all images and reply with JSON only.";

/// Environment variable overriding the provider endpoint.
pub const API_BASE_URL_ENV: &str = "DENTSCAN_API_BASE_URL";

pub struct GenAIBackend {
    client: Client,
    model: String,
    provider: AdapterKind,
    timeout: Duration,
    preparer: ImagePreparer,
}

impl GenAIBackend {
    /// Creates a backend for `provider`/`model`.
    ///
    /// Credentials are read by genai from the provider's usual environment
    /// variable (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, ...). Setting
    /// `DENTSCAN_API_BASE_URL` routes requests to a custom endpoint.
    pub fn new(
        provider: AdapterKind,
        model: String,
        timeout: Duration,
        preparer: ImagePreparer,
    ) -> Result<Self, BackendError> {
        if model.trim().is_empty() {
            return Err(BackendError::ConfigurationError {
                message: format!("no model configured for {}", provider.as_str()),
            });
        }

        let client = match std::env::var(API_BASE_URL_ENV).ok() {
            Some(endpoint_url) => {
                debug!(
                    "Using custom endpoint for {}: {}",
                    provider.as_str(),
                    endpoint_url
                );
                let model_clone = model.clone();
                let resolver = ServiceTargetResolver::from_resolver_fn(
                    move |_target: ServiceTarget| -> Result<ServiceTarget, genai::resolver::Error> {
                        let auth = match provider.default_key_env_name() {
                            Some(key_var) => AuthData::from_env(key_var),
                            None => AuthData::from_single(""),
                        };
                        Ok(ServiceTarget {
                            endpoint: Endpoint::from_owned(endpoint_url.clone()),
                            auth,
                            model: ModelIden::new(provider, &model_clone),
                        })
                    },
                );
                Client::builder()
                    .with_service_target_resolver(resolver)
                    .build()
            }
            None => Client::default(),
        };

        debug!(
            "Creating GenAI backend: provider={}, model={}",
            provider.as_str(),
            model
        );

        Ok(Self {
            client,
            model,
            provider,
            timeout,
            preparer,
        })
    }

    async fn build_request(&self, request: &InferenceRequest) -> Result<ChatRequest, BackendError> {
        let prepared = try_join_all(request.images.iter().map(|input| self.preparer.prepare(input)))
            .await
            .map_err(|e| BackendError::ConfigurationError {
                message: format!("image preparation failed: {}", e),
            })?;

        let mut parts = vec![ContentPart::from_text(request.prompt.clone())];
        for image in prepared {
            parts.push(ContentPart::from_binary_base64(image.mime, image.base64, None));
        }

        Ok(ChatRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(MessageContent::from_parts(parts)),
        ]))
    }
}

fn status_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(status|code|HTTP)\D{0,4}([1-5]\d\d)\b").expect("valid regex"))
}

/// Maps a genai error onto the backend taxonomy using the status code
/// embedded in its message, when there is one.
fn classify_error(provider: &str, message: String) -> BackendError {
    let status = status_regex()
        .captures(&message)
        .and_then(|c| c.get(2))
        .and_then(|m| m.as_str().parse::<u16>().ok());

    match status {
        Some(401) | Some(403) => BackendError::AuthenticationError { message },
        Some(429) => BackendError::RateLimitError { retry_after: None },
        Some(code) => BackendError::ApiError {
            message: format!("{} request failed: {}", provider, message),
            status_code: Some(code),
        },
        None => {
            let lower = message.to_lowercase();
            if lower.contains("connect") || lower.contains("dns") || lower.contains("reset") {
                BackendError::NetworkError { message }
            } else {
                BackendError::ApiError {
                    message: format!("{} request failed: {}", provider, message),
                    status_code: None,
                }
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for GenAIBackend {
    async fn call(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError> {
        let start = Instant::now();
        let chat_request = self.build_request(request).await?;

        let mut options = ChatOptions::default().with_temperature(request.temperature as f64);
        if let Some(max_tokens) = request.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }

        let response = match tokio::time::timeout(
            self.timeout,
            self.client
                .exec_chat(&self.model, chat_request, Some(&options)),
        )
        .await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                error!("{} API error: {}", self.provider.as_str(), e);
                return Err(classify_error(self.provider.as_str(), e.to_string()));
            }
            Err(_) => {
                return Err(BackendError::TimeoutError {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let content = response.first_text().unwrap_or_default().to_string();
        if content.trim().is_empty() {
            return Err(BackendError::InvalidResponse {
                message: "empty response".to_string(),
                raw_response: None,
            });
        }

        Ok(InferenceResponse::text(content, start.elapsed()))
    }

    fn name(&self) -> &str {
        self.provider.as_str()
    }

    fn model_info(&self) -> Option<String> {
        Some(self.model.clone())
    }
}

impl std::fmt::Debug for GenAIBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenAIBackend")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}
