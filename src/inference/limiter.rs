//! Process-wide cap on in-flight inference calls
//!
//! One `ConcurrencyLimiter` is built per process and cloned into every
//! gateway. Clones share the same semaphore and counters.

use super::error::GatewayError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for a slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<LimiterPermit, GatewayError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::LimiterClosed)?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(LimiterPermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously held permits since creation.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Fails all pending and future acquisitions.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permits_are_counted() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 2);
        assert_eq!(limiter.available(), 0);
        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        drop(b);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.peak(), 2);
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_capacity() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await.unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(pending.is_err());

        drop(held);
        assert!(limiter.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_capacity() {
        let limiter = ConcurrencyLimiter::new(1);
        let clone = limiter.clone();
        let _held = limiter.acquire().await.unwrap();
        assert_eq!(clone.available(), 0);
        assert_eq!(clone.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_closed_limiter_rejects() {
        let limiter = ConcurrencyLimiter::new(1);
        limiter.close();
        assert!(matches!(
            limiter.acquire().await,
            Err(GatewayError::LimiterClosed)
        ));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }
}
