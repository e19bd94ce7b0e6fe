//! Bounded retry policy shared by the knowledge upload pipeline
//!
//! Three call sites use it:
//! - endpoint fallback: one attempt per candidate endpoint, no delay
//! - processing poll: fixed interval until a deadline
//! - attachment: a handful of attempts with jittered backoff

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Delay between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// Uniform in `[min, max)`
    Jitter { min: Duration, max: Duration },
}

impl Backoff {
    pub fn delay(&self) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Jitter { min, max } if max > min => {
                let secs = rand::thread_rng().gen_range(min.as_secs_f64()..max.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
            Backoff::Jitter { min, .. } => min,
        }
    }
}

/// Max attempts, delay function and optional overall deadline
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    /// One immediate attempt per candidate endpoint
    pub fn endpoint_fallback(endpoints: usize) -> Self {
        Self {
            max_attempts: endpoints.max(1) as u32,
            backoff: Backoff::None,
            deadline: None,
        }
    }

    /// Fixed-interval polling bounded by wall-clock time
    pub fn poll_until(interval: Duration, deadline: Duration) -> Self {
        Self {
            max_attempts: u32::MAX,
            backoff: Backoff::Fixed(interval),
            deadline: Some(deadline),
        }
    }

    /// Randomized backoff in `[min, max)`
    pub fn jittered(max_attempts: u32, min: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Jitter { min, max },
            deadline: None,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// policy is exhausted
    ///
    /// `op` receives the zero-based attempt number. Running out of attempts
    /// returns the last error; passing the deadline returns
    /// [`Error::Timeout`].
    pub async fn run<T, F, Fut, P>(&self, label: &str, retryable: P, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Error) -> bool,
    {
        let started = tokio::time::Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let result = op(attempt).await;
            attempt += 1;

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => return Err(e),
                Err(e) => e,
            };

            if attempt >= self.max_attempts {
                tracing::debug!(
                    operation = label,
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(error);
            }

            let delay = self.backoff.delay();
            if let Some(deadline) = self.deadline {
                if started.elapsed() + delay > deadline {
                    return Err(Error::Timeout {
                        operation: label.to_string(),
                        attempts: attempt,
                    });
                }
            }

            tracing::debug!(
                "Retrying {} (attempt {}), waiting {:?}: {}",
                label,
                attempt + 1,
                delay,
                error
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn api(status: u16) -> Error {
        Error::Api {
            status,
            url: "http://localhost/x".to_string(),
            body: String::new(),
        }
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = Backoff::Jitter {
            min: Duration::from_millis(400),
            max: Duration::from_millis(800),
        };
        for _ in 0..200 {
            let delay = backoff.delay();
            assert!(delay >= Duration::from_millis(400));
            assert!(delay < Duration::from_millis(800));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_retryable_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Backoff::Fixed(Duration::from_secs(1)),
            deadline: None,
        };

        let value = policy
            .run(
                "test",
                |e| e.status() == Some(503),
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err(api(503))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::jittered(5, Duration::from_millis(400), Duration::from_millis(800));

        let result: Result<()> = policy
            .run(
                "test",
                |e| e.status() == Some(503),
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(api(400)) }
                },
            )
            .await;

        assert_eq!(result.unwrap_err().status(), Some(400));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::endpoint_fallback(2);

        let result: Result<()> = policy
            .run(
                "upload",
                |e| e.status() == Some(404),
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(api(404)) }
                },
            )
            .await;

        assert_eq!(result.unwrap_err().status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_produces_timeout() {
        let policy = RetryPolicy::poll_until(Duration::from_secs(1), Duration::from_secs(5));
        let started = tokio::time::Instant::now();

        let result: Result<()> = policy
            .run(
                "processing",
                |e| matches!(e, Error::NotReady(_)),
                |_| async { Err(Error::NotReady("file".to_string())) },
            )
            .await;

        match result {
            Err(Error::Timeout { operation, attempts }) => {
                assert_eq!(operation, "processing");
                assert_eq!(attempts, 6);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(started.elapsed() <= Duration::from_secs(5));
    }
}
