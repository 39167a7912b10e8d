//! Cancellable retry with exponential, linear or jittered backoff.

use std::{future::Future, time::Duration};

use rand::Rng;
use tessera_types::{RetrySpec, RetryStrategy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RuntimeError;

/// Runs fallible async operations under a [`RetrySpec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryCoordinator;

impl RetryCoordinator {
    /// Wait before the attempt following failed attempt `index` (zero-based).
    pub fn delay_for(spec: &RetrySpec, index: u32) -> Duration {
        let base = spec.delay;
        let exponential = base.saturating_mul(1u64 << index.min(32));
        let millis = match spec.strategy {
            RetryStrategy::Exponential => exponential,
            RetryStrategy::Linear => base.saturating_mul(u64::from(index) + 1),
            RetryStrategy::Jitter if base > 0 => exponential.saturating_add(rand::thread_rng().gen_range(0..base)),
            RetryStrategy::Jitter => exponential,
        };
        Duration::from_millis(millis)
    }

    /// Calls `operation` until it succeeds, fails with a non-retryable error,
    /// runs out of attempts, or `token` is cancelled.
    ///
    /// Each attempt and each backoff sleep is raced against the token, so
    /// cancellation takes effect immediately and no further attempt starts.
    pub async fn run<T, F, Fut>(mut operation: F, spec: &RetrySpec, token: &CancellationToken) -> Result<T, RuntimeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        let attempts = spec.attempts.max(1);
        let mut attempt = 0u32;
        loop {
            if token.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Err(RuntimeError::Cancelled),
                outcome = operation() => outcome,
            };
            attempt += 1;

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if error.is_cancelled() {
                return Err(error);
            }
            if !error.is_retryable() {
                debug!(attempt, %error, "attempt failed with non-retryable error");
                return Err(error);
            }
            if attempt >= attempts {
                warn!(attempt, %error, "retry attempts exhausted");
                return Err(error);
            }

            let delay = Self::delay_for(spec, attempt - 1);
            warn!(attempt, delay_ms = delay.as_millis() as u64, %error, "attempt failed; retrying");
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(RuntimeError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };
    use tokio::time::Instant;

    fn server_error(status: u16) -> RuntimeError {
        RuntimeError::Http {
            status,
            message: "failure".into(),
            body: Value::Null,
        }
    }

    #[test]
    fn backoff_curves() {
        let exponential = RetrySpec::new(4, 100, RetryStrategy::Exponential);
        let delays: Vec<_> = (0..3).map(|i| RetryCoordinator::delay_for(&exponential, i).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400]);

        let linear = RetrySpec::new(4, 50, RetryStrategy::Linear);
        let delays: Vec<_> = (0..3).map(|i| RetryCoordinator::delay_for(&linear, i).as_millis()).collect();
        assert_eq!(delays, vec![50, 100, 150]);

        let jitter = RetrySpec::new(4, 100, RetryStrategy::Jitter);
        for index in 0..3 {
            let delay = RetryCoordinator::delay_for(&jitter, index).as_millis();
            let floor = 100u128 << index;
            assert!(delay >= floor && delay < floor + 100, "jitter delay {delay} out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_failures_with_growing_waits() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let stamps = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let spec = RetrySpec::new(3, 100, RetryStrategy::Exponential);
        let token = CancellationToken::new();

        let result: Result<(), _> = RetryCoordinator::run(
            || {
                let calls = Arc::clone(&calls);
                let stamps = Arc::clone(&stamps);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    stamps.lock().push(started.elapsed().as_millis());
                    Err(server_error(503))
                }
            },
            &spec,
            &token,
        )
        .await;

        assert!(matches!(result, Err(RuntimeError::Http { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stamps = stamps.lock().clone();
        assert!(stamps[1] - stamps[0] >= 100);
        assert!(stamps[2] - stamps[1] >= 200);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_status_stops_after_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = RetrySpec::new(5, 10, RetryStrategy::Linear);
        let token = CancellationToken::new();
        let result: Result<(), _> = RetryCoordinator::run(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(server_error(404))
                }
            },
            &spec,
            &token,
        )
        .await;
        assert_eq!(result.unwrap_err().status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_sleep() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = RetrySpec::new(5, 10_000, RetryStrategy::Exponential);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result: Result<(), _> = RetryCoordinator::run(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(RuntimeError::Timeout)
                }
            },
            &spec,
            &token,
        )
        .await;

        assert!(matches!(result, Err(RuntimeError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn succeeds_without_waiting() {
        let token = CancellationToken::new();
        let value = RetryCoordinator::run(|| async { Ok::<_, RuntimeError>(7) }, &RetrySpec::once(), &token)
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
