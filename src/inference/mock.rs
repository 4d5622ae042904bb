//! Scripted inference backend for tests and offline runs
//!
//! Responses are either routed by a marker string contained in the prompt
//! (every pipeline prompt starts with a `TASK:` header, so markers such as
//! `"TASK: area_specialist\nAREA: front"` select one phase and area) or
//! taken from a FIFO fallback queue. Routes replay their last response
//! once their script runs out.

use super::backend::InferenceBackend;
use super::error::BackendError;
use super::types::{InferenceRequest, InferenceResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub content: String,
    pub error: Option<BackendError>,
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: None,
            delay: None,
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::text(value.to_string())
    }

    pub fn error(error: BackendError) -> Self {
        Self {
            content: String::new(),
            error: Some(error),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug)]
struct MockRoute {
    marker: String,
    script: VecDeque<MockResponse>,
}

pub struct MockInferenceBackend {
    routes: Mutex<Vec<MockRoute>>,
    fallback: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<InferenceRequest>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    latency: Option<Duration>,
    name: String,
}

/// Counts a call as in flight until dropped, including when the caller
/// abandons the call on a timeout.
struct ActiveCall<'a>(&'a AtomicUsize);

impl<'a> ActiveCall<'a> {
    fn enter(active: &'a AtomicUsize, max_active: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_active.fetch_max(now, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockInferenceBackend {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            fallback: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            latency: None,
            name: "Mock".to_string(),
        }
    }

    /// Adds a fixed delay to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Always answers prompts containing `marker` with `response`.
    pub fn on(&self, marker: impl Into<String>, response: MockResponse) -> &Self {
        self.on_sequence(marker, [response])
    }

    /// Answers prompts containing `marker` with the scripted responses in
    /// order, repeating the last one when exhausted.
    pub fn on_sequence(
        &self,
        marker: impl Into<String>,
        responses: impl IntoIterator<Item = MockResponse>,
    ) -> &Self {
        let marker = marker.into();
        let script: VecDeque<MockResponse> = responses.into_iter().collect();
        let mut routes = lock(&self.routes);
        routes.retain(|r| r.marker != marker);
        routes.push(MockRoute { marker, script });
        self
    }

    pub fn add_response(&self, response: MockResponse) {
        lock(&self.fallback).push_back(response);
    }

    pub fn add_responses(&self, responses: impl IntoIterator<Item = MockResponse>) {
        lock(&self.fallback).extend(responses);
    }

    pub fn remaining_responses(&self) -> usize {
        lock(&self.fallback).len()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Calls currently inside `call`, scripted delay included.
    pub fn active_calls(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Most calls ever observed inside `call` at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<InferenceRequest> {
        lock(&self.calls).clone()
    }

    pub fn calls_matching(&self, marker: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|r| r.prompt.contains(marker))
            .count()
    }

    /// Longest matching marker wins so specific routes shadow generic ones.
    fn next_response(&self, prompt: &str) -> Option<MockResponse> {
        let mut routes = lock(&self.routes);
        let route = routes
            .iter_mut()
            .filter(|r| prompt.contains(&r.marker))
            .max_by_key(|r| r.marker.len());

        if let Some(route) = route {
            return if route.script.len() > 1 {
                route.script.pop_front()
            } else {
                route.script.front().cloned()
            };
        }
        drop(routes);

        lock(&self.fallback).pop_front()
    }
}

impl Default for MockInferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceBackend for MockInferenceBackend {
    async fn call(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError> {
        let _active = ActiveCall::enter(&self.active, &self.max_active);
        lock(&self.calls).push(request.clone());

        let response = self
            .next_response(&request.prompt)
            .ok_or_else(|| BackendError::Other {
                message: format!(
                    "MockInferenceBackend: no response scripted for '{}'",
                    request.label
                ),
            })?;

        let delay = response.delay.or(self.latency);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = response.error {
            return Err(error);
        }

        Ok(InferenceResponse::text(
            response.content,
            delay.unwrap_or(Duration::from_millis(1)),
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model_info(&self) -> Option<String> {
        Some("mock-model".to_string())
    }
}

impl std::fmt::Debug for MockInferenceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInferenceBackend")
            .field("name", &self.name)
            .field("routes", &lock(&self.routes).len())
            .field("remaining_responses", &self.remaining_responses())
            .field("calls", &self.call_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_queue_order() {
        let mock = MockInferenceBackend::new();
        mock.add_responses([MockResponse::text("one"), MockResponse::text("two")]);

        let first = mock.call(&InferenceRequest::new("x")).await.unwrap();
        let second = mock.call(&InferenceRequest::new("x")).await.unwrap();
        assert_eq!(first.content, "one");
        assert_eq!(second.content, "two");
        assert!(mock.call(&InferenceRequest::new("x")).await.is_err());
        assert_eq!(mock.remaining_responses(), 0);
    }

    #[tokio::test]
    async fn test_routes_by_marker() {
        let mock = MockInferenceBackend::new();
        mock.on("TASK: a", MockResponse::text("generic"));
        mock.on("TASK: a\nAREA: rear", MockResponse::text("specific"));

        let r = mock
            .call(&InferenceRequest::new("TASK: a\nAREA: front"))
            .await
            .unwrap();
        assert_eq!(r.content, "generic");

        let r = mock
            .call(&InferenceRequest::new("TASK: a\nAREA: rear\n..."))
            .await
            .unwrap();
        assert_eq!(r.content, "specific");
        assert_eq!(mock.calls_matching("TASK: a"), 2);
    }

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let mock = MockInferenceBackend::new();
        mock.on_sequence(
            "TASK",
            [
                MockResponse::error(BackendError::TimeoutError { seconds: 1 }),
                MockResponse::text("ok"),
            ],
        );

        assert!(mock.call(&InferenceRequest::new("TASK")).await.is_err());
        for _ in 0..3 {
            let r = mock.call(&InferenceRequest::new("TASK")).await.unwrap();
            assert_eq!(r.content, "ok");
        }
    }

    #[tokio::test]
    async fn test_tracks_concurrent_calls() {
        let mock = MockInferenceBackend::new().with_latency(Duration::from_millis(20));
        mock.on("TASK", MockResponse::text("ok"));

        let request = InferenceRequest::new("TASK");
        let (a, b, c) = tokio::join!(mock.call(&request), mock.call(&request), mock.call(&request));
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(mock.max_concurrent(), 3);
        assert_eq!(mock.active_calls(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_call_is_no_longer_active() {
        let mock = MockInferenceBackend::new();
        mock.on("TASK", MockResponse::text("late").with_delay(Duration::from_secs(5)));

        let request = InferenceRequest::new("TASK");
        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), mock.call(&request)).await;
        assert!(timed_out.is_err());
        assert_eq!(mock.max_concurrent(), 1);
        assert_eq!(mock.active_calls(), 0);
    }

    #[test]
    fn test_debug_impl() {
        let mock = MockInferenceBackend::new();
        assert!(format!("{:?}", mock).contains("MockInferenceBackend"));
    }
}
