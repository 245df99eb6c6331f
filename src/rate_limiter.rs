//! Per-run rate limiter
//!
//! Two mechanisms, both required for the observable timing of a run:
//! - a permit pool of `rate_limit` slots; a permit is held by a fetch for
//!   its whole lifetime, so at most `rate_limit` fetches are in flight
//! - a fixed pacing delay of `period / rate_limit` awaited after every
//!   launch, which caps the launch rate
//!
//! Each ingestion run owns its own limiter. Waits are cancellation-aware:
//! cancelling the run's token releases anyone blocked in [`RunRateLimiter::acquire`]
//! or [`RunRateLimiter::pace`] with [`IngestionError::Cancelled`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{IngestionError, Result};

/// Limits applied to one ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Permits per period (also the concurrent in-flight ceiling)
    pub rate_limit: u32,
    /// Rolling period the rate applies to
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_limit: 60,
            period: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Spacing between successive launches
    pub fn pacing_interval(&self) -> Duration {
        self.period / self.rate_limit.max(1)
    }
}

/// Permission to run one fetch. Returned to the pool on drop.
#[derive(Debug)]
pub struct LaunchPermit {
    _permit: OwnedSemaphorePermit,
}

/// Permit pool plus launch pacing for a single run
#[derive(Debug)]
pub struct RunRateLimiter {
    semaphore: Arc<Semaphore>,
    pacing_interval: Duration,
    capacity: usize,
    cancel: CancellationToken,
}

impl RunRateLimiter {
    pub fn new(config: RateLimitConfig, cancel: CancellationToken) -> Self {
        let capacity = config.rate_limit.max(1) as usize;

        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            pacing_interval: config.pacing_interval(),
            capacity,
            cancel,
        }
    }

    /// Waits for a free permit
    pub async fn acquire(&self) -> Result<LaunchPermit> {
        if self.cancel.is_cancelled() {
            return Err(IngestionError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IngestionError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                let permit = permit.map_err(|_| IngestionError::Cancelled)?;
                trace!(available = self.semaphore.available_permits(), "Permit acquired");
                Ok(LaunchPermit { _permit: permit })
            }
        }
    }

    /// Waits out the pacing delay that follows a launch
    pub async fn pace(&self) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IngestionError::Cancelled),
            _ = tokio::time::sleep(self.pacing_interval) => Ok(()),
        }
    }

    pub fn pacing_interval(&self) -> Duration {
        self.pacing_interval
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of permits currently held by in-flight fetches
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
