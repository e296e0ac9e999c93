use crate::error::{BackendError, BackendResult, SinkError, SinkResult};
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(50);

/// Bounded retry for whole-value backend calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff` before the next try.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Runs `f` until it succeeds or the attempts are exhausted.
    ///
    /// A not-found answer or a rejected key is final and is never retried.
    pub async fn run<T, F, Fut>(&self, key: &str, operation: &str, mut f: F) -> SinkResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match f().await {
                Ok(value) => return Ok(value),
                Err(BackendError::NotFound { .. }) => {
                    return Err(SinkError::NotFound {
                        key: key.to_string(),
                    });
                }
                Err(err @ BackendError::InvalidKey { .. }) => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(
                        "{} of {} failed (attempt {}/{}): {}",
                        operation,
                        key,
                        attempt,
                        attempts,
                        err
                    );
                    last_error = Some(err);
                }
            }

            if attempt < attempts && !self.backoff.is_zero() {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        Err(SinkError::ServiceUnavailable {
            key: key.to_string(),
            attempts,
            source: last_error
                .unwrap_or_else(|| BackendError::protocol("no attempt was made")),
        })
    }
}
