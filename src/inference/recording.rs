//! Request/response recording for deterministic replays
//!
//! `RecordingBackend` wraps another backend. Requests are keyed by the MD5
//! of their canonical JSON (prompt, temperature, image content hashes and
//! crop regions), and exchanges are stored one per file as pretty JSON.

use super::backend::InferenceBackend;
use super::error::BackendError;
use super::types::{InferenceRequest, InferenceResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Recording mode for inference exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// Call through and save every exchange
    Record,
    /// Serve from disk only, fail when a recording is missing
    Replay,
    /// Replay if a recording exists, otherwise record
    Auto,
}

impl RecordingMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "record" => Ok(RecordingMode::Record),
            "replay" => Ok(RecordingMode::Replay),
            "auto" => Ok(RecordingMode::Auto),
            _ => anyhow::bail!("Invalid recording mode: {}", s),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingMode::Record => "record",
            RecordingMode::Replay => "replay",
            RecordingMode::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedImage {
    pub content_hash: String,
    pub region: Option<[f32; 4]>,
}

/// Hashable view of a request. Image URLs and ids are left out so the same
/// photos replay regardless of where they are stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub images: Vec<RecordedImage>,
}

impl RecordedRequest {
    pub fn from_request(req: &InferenceRequest) -> Self {
        Self {
            prompt: req.prompt.clone(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            images: req
                .images
                .iter()
                .map(|i| RecordedImage {
                    content_hash: i.image.content_hash.clone(),
                    region: i.region.map(|r| [r.x, r.y, r.width, r.height]),
                })
                .collect(),
        }
    }

    /// MD5 of the canonical JSON
    pub fn canonical_hash(&self) -> String {
        let canonical_json = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", md5::compute(canonical_json.as_bytes()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedExchange {
    pub request_hash: String,
    pub request: RecordedRequest,
    pub response: InferenceResponse,
    /// RFC 3339 timestamp
    pub recorded_at: String,
}

pub struct RecordingBackend {
    inner: Arc<dyn InferenceBackend>,
    mode: RecordingMode,
    recordings_dir: PathBuf,
    cache: Mutex<HashMap<String, InferenceResponse>>,
}

impl RecordingBackend {
    pub fn new(
        inner: Arc<dyn InferenceBackend>,
        mode: RecordingMode,
        recordings_dir: PathBuf,
    ) -> Result<Self> {
        std::fs::create_dir_all(&recordings_dir)
            .context("Failed to create recordings directory")?;

        Ok(Self {
            inner,
            mode,
            recordings_dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    fn recording_path(&self, request_hash: &str) -> PathBuf {
        self.recordings_dir.join(format!("{}.json", request_hash))
    }

    fn load_recording(&self, request_hash: &str) -> Result<Option<InferenceResponse>> {
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(request_hash)
        {
            return Ok(Some(hit.clone()));
        }

        let path = self.recording_path(request_hash);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read recording: {}", path.display()))?;
        let exchange: RecordedExchange = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse recording: {}", path.display()))?;

        self.cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(request_hash.to_string(), exchange.response.clone());
        Ok(Some(exchange.response))
    }

    fn save_recording(&self, request: &RecordedRequest, response: &InferenceResponse) -> Result<()> {
        let request_hash = request.canonical_hash();
        let exchange = RecordedExchange {
            request_hash: request_hash.clone(),
            request: request.clone(),
            response: response.clone(),
            recorded_at: chrono::Utc::now().to_rfc3339(),
        };

        let path = self.recording_path(&request_hash);
        let contents =
            serde_json::to_string_pretty(&exchange).context("Failed to serialize recording")?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write recording: {}", path.display()))?;

        self.cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(request_hash, response.clone());
        Ok(())
    }

    async fn record(
        &self,
        request: &InferenceRequest,
        recorded: &RecordedRequest,
    ) -> Result<InferenceResponse, BackendError> {
        let response = self.inner.call(request).await?;
        if let Err(e) = self.save_recording(recorded, &response) {
            warn!(error = %e, "Failed to save inference recording");
        }
        Ok(response)
    }
}

#[async_trait]
impl InferenceBackend for RecordingBackend {
    async fn call(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError> {
        let recorded = RecordedRequest::from_request(request);
        let hash = recorded.canonical_hash();

        if self.mode == RecordingMode::Record {
            return self.record(request, &recorded).await;
        }

        match self.load_recording(&hash) {
            Ok(Some(response)) => {
                debug!(hash = %hash, label = %request.label, "Replaying recorded exchange");
                Ok(response)
            }
            Ok(None) if self.mode == RecordingMode::Auto => self.record(request, &recorded).await,
            Ok(None) => Err(BackendError::ConfigurationError {
                message: format!("no recording for request {} ({})", hash, request.label),
            }),
            Err(e) => Err(BackendError::Other {
                message: e.to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model_info(&self) -> Option<String> {
        self.inner.model_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ImageRef;
    use crate::inference::mock::{MockInferenceBackend, MockResponse};

    fn request() -> InferenceRequest {
        InferenceRequest::new("TASK: test")
            .with_image(ImageRef::new("a", "file:///tmp/a.jpg", "hash-a"))
            .with_temperature(0.5)
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(RecordingMode::parse("Replay").unwrap(), RecordingMode::Replay);
        assert!(RecordingMode::parse("bogus").is_err());
    }

    #[test]
    fn test_hash_ignores_image_location() {
        let a = RecordedRequest::from_request(&request());
        let moved = InferenceRequest::new("TASK: test")
            .with_image(ImageRef::new("b", "https://cdn/x.jpg", "hash-a"))
            .with_temperature(0.5);
        let b = RecordedRequest::from_request(&moved);
        assert_eq!(a.canonical_hash(), b.canonical_hash());

        let hotter = RecordedRequest::from_request(&request().with_temperature(0.8));
        assert_ne!(a.canonical_hash(), hotter.canonical_hash());
    }

    #[tokio::test]
    async fn test_record_then_replay() {
        let dir = tempfile::tempdir().unwrap();

        let mock = Arc::new(MockInferenceBackend::new());
        mock.add_response(MockResponse::text(r#"{"ok":true}"#));
        let recorder =
            RecordingBackend::new(mock.clone(), RecordingMode::Record, dir.path().into()).unwrap();
        recorder.call(&request()).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let empty = Arc::new(MockInferenceBackend::new());
        let replayer =
            RecordingBackend::new(empty.clone(), RecordingMode::Replay, dir.path().into()).unwrap();
        let response = replayer.call(&request()).await.unwrap();
        assert_eq!(response.content, r#"{"ok":true}"#);
        assert_eq!(empty.call_count(), 0);
    }

    #[tokio::test]
    async fn test_replay_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::new(
            Arc::new(MockInferenceBackend::new()),
            RecordingMode::Replay,
            dir.path().into(),
        )
        .unwrap();
        assert!(backend.call(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_auto_records_once() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockInferenceBackend::new());
        mock.add_response(MockResponse::text("first"));
        let backend =
            RecordingBackend::new(mock.clone(), RecordingMode::Auto, dir.path().into()).unwrap();

        assert_eq!(backend.call(&request()).await.unwrap().content, "first");
        assert_eq!(backend.call(&request()).await.unwrap().content, "first");
        assert_eq!(mock.call_count(), 1);
    }
}
