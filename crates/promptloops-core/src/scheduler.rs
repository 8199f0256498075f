use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::RetryPolicy;

/// Errors the scheduling substrate is allowed to retry
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for promptloops_llm::LlmError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl Retryable for promptloops_session::SessionError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// N-way concurrency gate shared by the session executors of one run
#[derive(Clone)]
pub struct Scheduler {
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Wait for a slot. Returns None only if the scheduler was shut down.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().acquire_owned().await.ok()
    }
}

/// Run an async operation with bounded exponential backoff and jitter.
///
/// Only errors the operation classifies as retryable are retried; logic
/// failures surface immediately so their fallback paths can run.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=250));
                let delay = policy.delay_for(attempt) + jitter;
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Transient failure, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(attempt, error = %e, "Giving up");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptloops_llm::LlmError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let policy = RetryPolicy::default();
        let calls = AtomicUsize::new(0);

        let result: Result<u32, LlmError> = with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::Unavailable("503".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts_on_persistent_transient_error() {
        let policy = RetryPolicy::default();
        let calls = AtomicUsize::new(0);

        let result: Result<u32, LlmError> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Timeout(Duration::from_secs(5))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_logic_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicUsize::new(0);

        let result: Result<u32, LlmError> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Malformed("bad json".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scheduler_bounds_concurrency() {
        let scheduler = Scheduler::new(2);
        let p1 = scheduler.acquire().await.unwrap();
        let _p2 = scheduler.acquire().await.unwrap();

        // Third acquire must wait until a permit is released
        let scheduler2 = scheduler.clone();
        let waiter = tokio::spawn(async move { scheduler2.acquire().await.is_some() });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(p1);
        assert!(waiter.await.unwrap());
    }
}
