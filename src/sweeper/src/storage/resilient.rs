//! Throttling, timeout and retry around a [`StatementSession`].
//!
//! The policy is plain configuration ([`ResiliencyConfig`]): at most
//! `max_concurrent_requests` run at once, up to `max_queue_depth` more wait
//! for a slot, and anything beyond that fails fast with
//! [`StorageError::Overloaded`]. Transient failures are retried up to
//! `max_retries` times with a pluggable [`Backoff`].

use async_trait::async_trait;
use common::RetentionWindow;
use common::config::{BackoffConfig, ResiliencyConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

use super::{Statement, StatementSession, StorageBackend, StorageError};

/// Delay before the `retry`-th retry (1-based).
pub trait Backoff: Send + Sync {
    fn delay(&self, retry: u32) -> Duration;
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl From<&BackoffConfig> for ExponentialBackoff {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            initial: config.initial_delay,
            max: config.max_delay,
            multiplier: config.multiplier,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map(|delay| delay.min(self.max))
            .unwrap_or(self.max)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl Backoff for FixedBackoff {
    fn delay(&self, _retry: u32) -> Duration {
        self.0
    }
}

struct RequestThrottle {
    permits: Semaphore,
    waiting: AtomicUsize,
    max_queue_depth: usize,
}

/// Counts a waiting request until dropped.
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RequestThrottle {
    fn new(max_concurrent: usize, max_queue_depth: usize) -> Self {
        Self {
            permits: Semaphore::new(max_concurrent),
            waiting: AtomicUsize::new(0),
            max_queue_depth,
        }
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>, StorageError> {
        if let Ok(permit) = self.permits.try_acquire() {
            return Ok(permit);
        }

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _slot = QueueSlot(&self.waiting);
        if queued >= self.max_queue_depth {
            return Err(StorageError::Overloaded {
                max_queue_depth: self.max_queue_depth,
            });
        }

        self.permits
            .acquire()
            .await
            .map_err(|_| StorageError::Fatal("request throttle closed".to_string()))
    }
}

pub struct ResilientStorage<S> {
    session: S,
    throttle: RequestThrottle,
    max_retries: u32,
    request_timeout: Duration,
    backoff: Box<dyn Backoff>,
}

impl<S: StatementSession> ResilientStorage<S> {
    pub fn new(session: S, config: &ResiliencyConfig) -> Self {
        Self {
            session,
            throttle: RequestThrottle::new(
                config.max_concurrent_requests,
                config.max_queue_depth,
            ),
            max_retries: config.max_retries,
            request_timeout: config.request_timeout,
            backoff: Box::new(ExponentialBackoff::from(&config.backoff)),
        }
    }

    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    /// Requests currently waiting for a free slot.
    pub fn queued(&self) -> usize {
        self.throttle.waiting.load(Ordering::SeqCst)
    }

    pub async fn execute(&self, statement: &Statement) -> Result<(), StorageError> {
        let mut retries = 0u32;

        loop {
            let result = {
                let _permit = self.throttle.acquire().await?;
                match tokio::time::timeout(self.request_timeout, self.session.execute(statement))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StorageError::Timeout(self.request_timeout)),
                }
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && retries < self.max_retries => {
                    retries += 1;
                    let delay = self.backoff.delay(retries);
                    tracing::warn!(
                        statement = %statement,
                        retry = retries,
                        max_retries = self.max_retries,
                        delay = ?delay,
                        error = %e,
                        "Transient storage failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(StorageError::RetriesExhausted {
                        attempts: retries + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: StatementSession> StorageBackend for ResilientStorage<S> {
    async fn delete_metric(&self, path: &str) -> Result<(), StorageError> {
        for window in RetentionWindow::ALL {
            self.execute(&Statement::Delete {
                window,
                path: path.to_string(),
            })
            .await?;
        }
        Ok(())
    }

    async fn truncate_tenant(&self) -> Result<(), StorageError> {
        for window in RetentionWindow::ALL {
            self.execute(&Statement::Truncate { window }).await?;
        }
        Ok(())
    }
}
