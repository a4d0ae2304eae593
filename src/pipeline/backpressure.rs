//! Admission control for the processor.
//!
//! # Responsibilities
//! - Bound in-flight records at the backpressure threshold
//! - Block ingestion until in-flight drains below the threshold
//! - Track the in-flight peak

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    waits: AtomicUsize,
}

/// Semaphore-backed admission gate.
#[derive(Debug, Clone)]
pub struct BackpressureGate {
    permits: Arc<Semaphore>,
    threshold: usize,
    counters: Arc<Counters>,
}

/// One admitted record. Dropping it frees the slot.
#[derive(Debug)]
pub struct InFlight {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl BackpressureGate {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            permits: Arc::new(Semaphore::new(threshold)),
            threshold,
            counters: Arc::new(Counters {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                waits: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a free slot. `None` once the gate is closed.
    pub async fn admit(&self) -> Option<InFlight> {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(tokio::sync::TryAcquireError::Closed) => return None,
            Err(tokio::sync::TryAcquireError::NoPermits) => {
                self.counters.waits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(threshold = self.threshold, "Backpressure engaged, waiting for drain");
                self.permits.clone().acquire_owned().await.ok()?
            }
        };

        let now = self.counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak.fetch_max(now, Ordering::AcqRel);
        Some(InFlight {
            _permit: permit,
            counters: self.counters.clone(),
        })
    }

    /// Refuse further admissions and wake blocked callers.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Acquire)
    }

    /// Times an admission had to wait for a slot.
    pub fn waits(&self) -> usize {
        self.counters.waits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_blocks_at_threshold() {
        let gate = BackpressureGate::new(2);
        let a = gate.admit().await.unwrap();
        let _b = gate.admit().await.unwrap();
        assert_eq!(gate.in_flight(), 2);

        let blocked = tokio::time::timeout(Duration::from_millis(20), gate.admit()).await;
        assert!(blocked.is_err());

        drop(a);
        assert_eq!(gate.in_flight(), 1);
        let _c = gate.admit().await.unwrap();
        assert_eq!(gate.peak(), 2);
        assert_eq!(gate.waits(), 1);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let gate = BackpressureGate::new(1);
        let _held = gate.admit().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.admit().await.is_none() })
        };
        tokio::task::yield_now().await;
        gate.close();
        assert!(waiter.await.unwrap());
    }
}
