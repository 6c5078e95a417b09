//! Bounded retry policy for flaky signaling operations

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Explicit retry policy: max attempts, fixed delay between attempts, and a
/// predicate deciding which errors are worth another try. Exhausting a
/// retryable failure reports `SessionUnavailable`; non-retryable errors
/// short-circuit untouched.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub retryable: fn(&Error) -> bool,
}

impl RetryPolicy {
    /// The session create/join policy: the backend is observed to be
    /// transiently flaky right after session creation, so 3 attempts with a
    /// fixed 1-second delay absorb that without masking permanent failures.
    pub fn session_default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            retryable: Error::is_retryable,
        }
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && (self.retryable)(&err) => {
                    log::warn!(
                        "{} failed (attempt {}/{}): {}",
                        what,
                        attempt,
                        self.max_attempts,
                        err
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) if (self.retryable)(&err) => {
                    log::warn!("{} failed after {} attempts: {}", what, attempt, err);
                    return Err(Error::SessionUnavailable(format!("{}: {}", what, err)));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn flaky(fail_first: u32) -> (Arc<AtomicU32>, impl FnMut() -> futures::future::Ready<Result<u32>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= fail_first {
                futures::future::ready(Err(Error::Session("transient blip".into())))
            } else {
                futures::future::ready(Ok(n))
            }
        };
        (calls, op)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_after_two_delays() {
        let policy = RetryPolicy::session_default();
        let (calls, op) = flaky(2);

        let start = Instant::now();
        let value = policy.run("create session", op).await.unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_session_unavailable() {
        let policy = RetryPolicy::session_default();
        let (calls, op) = flaky(10);

        let start = Instant::now();
        let err = policy.run("create session", op).await.unwrap_err();

        assert!(matches!(err, Error::SessionUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Never hangs: gives up after the two inter-attempt delays.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_short_circuits() {
        let policy = RetryPolicy::session_default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let start = Instant::now();
        let err = policy
            .run("join session", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                futures::future::ready(Err::<(), _>(Error::SessionInvalid("gone".into())))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SessionInvalid(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_is_immediate() {
        let policy = RetryPolicy::session_default();
        let (calls, op) = flaky(0);

        let value = policy.run("create session", op).await.unwrap();
        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
