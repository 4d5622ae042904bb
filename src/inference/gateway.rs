//! Rate-limited, retrying front door to the inference service
//!
//! Every phase talks to the service through `InferenceGateway::infer`. A call
//! acquires a slot from the shared `ConcurrencyLimiter` for each attempt,
//! applies the per-call timeout, and retries transient failures with
//! exponential backoff plus jitter. The slot is released while sleeping so a
//! backing-off call never holds capacity. Failures come back as values.

use super::backend::InferenceBackend;
use super::error::{BackendError, GatewayError};
use super::limiter::ConcurrencyLimiter;
use super::types::{InferenceRequest, InferenceResponse};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub backoff_base: Duration,
    pub jitter: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 4,
            backoff_base: Duration::from_millis(500),
            jitter: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retry_count: 0,
            backoff_base: Duration::ZERO,
            jitter: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_count + 1
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped,
    /// plus uniform jitter. A server `retry_after` hint wins when longer.
    pub fn delay_for(&self, retry: u32, error: &BackendError) -> Duration {
        let exp = self
            .backoff_base
            .checked_mul(1u32.checked_shl(retry.min(16)).unwrap_or(u32::MAX))
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };

        let delay = exp + jitter;
        match error.retry_after() {
            Some(secs) => delay.max(Duration::from_secs(secs)),
            None => delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_images_per_call: usize,
    pub per_call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_images_per_call: 6,
            per_call_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Call counters, readable while a job runs.
#[derive(Debug, Default)]
pub struct GatewayStats {
    calls: AtomicU64,
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl GatewayStats {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

pub struct InferenceGateway {
    backend: Arc<dyn InferenceBackend>,
    limiter: ConcurrencyLimiter,
    config: GatewayConfig,
    stats: GatewayStats,
}

impl InferenceGateway {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        limiter: ConcurrencyLimiter,
        config: GatewayConfig,
    ) -> Self {
        Self {
            backend,
            limiter,
            config,
            stats: GatewayStats::default(),
        }
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn infer(
        &self,
        mut request: InferenceRequest,
    ) -> Result<InferenceResponse, GatewayError> {
        self.stats.calls.fetch_add(1, Ordering::Relaxed);

        if request.images.len() > self.config.max_images_per_call {
            debug!(
                label = %request.label,
                dropped = request.images.len() - self.config.max_images_per_call,
                "Truncating image list to max_images_per_call"
            );
            request.images.truncate(self.config.max_images_per_call);
        }

        let timeout = request.timeout.unwrap_or(self.config.per_call_timeout);
        let max_attempts = self.config.retry.max_attempts();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let outcome = {
                let _permit = self.limiter.acquire().await?;
                tokio::time::timeout(timeout, self.backend.call(&request)).await
            };

            let error = match outcome {
                Ok(Ok(response)) => {
                    debug!(
                        label = %request.label,
                        attempt,
                        response_time_ms = response.response_time.as_millis(),
                        "Inference call succeeded"
                    );
                    return Ok(response);
                }
                Ok(Err(e)) => e,
                Err(_) => BackendError::TimeoutError {
                    seconds: timeout.as_secs(),
                },
            };

            if !error.is_transient() {
                warn!(label = %request.label, attempt, error = %error, "Inference call rejected");
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return Err(GatewayError::Rejected {
                    attempts: attempt,
                    error,
                });
            }

            if attempt < max_attempts {
                let delay = self.config.retry.delay_for(attempt - 1, &error);
                debug!(
                    label = %request.label,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "Transient inference error, backing off"
                );
                last_error = Some(error);
                tokio::time::sleep(delay).await;
            } else {
                last_error = Some(error);
            }
        }

        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        let last_error = last_error.unwrap_or(BackendError::Other {
            message: "no attempts made".to_string(),
        });
        warn!(
            label = %request.label,
            attempts = max_attempts,
            error = %last_error,
            "Inference call exhausted retries"
        );
        Err(GatewayError::VariantFailure {
            attempts: max_attempts,
            last_error,
        })
    }
}

impl std::fmt::Debug for InferenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceGateway")
            .field("backend", &self.backend.name())
            .field("limiter", &self.limiter)
            .field("config", &self.config)
            .finish()
    }
}
