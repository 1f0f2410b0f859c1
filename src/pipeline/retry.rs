//! Per-page retry policy.
//!
//! Transient failures (timeouts, transport errors) are retried after a
//! backoff that starts at `backoff_ms` and doubles per retry; with the
//! defaults that is 500 ms, then 1 s before the third and last attempt. Permanent failures are
//! recorded after the attempt that produced them.

use crate::config::BatchConfig;
use crate::error::{InferenceError, PageError};
use crate::pipeline::encode::PageImage;
use crate::pipeline::inference::{Extraction, InferenceClient};
use tokio::time::{sleep, Duration};
use tracing::warn;

/// How many times a page is tried and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Always ≥ 1.
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub exponential: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_ms: config.retry_backoff_ms,
            exponential: config.exponential_backoff,
        }
    }

    /// Wait before attempt number `attempt` (1-based; the first attempt
    /// never waits).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let ms = if self.exponential {
            let shift = (attempt - 2).min(16);
            self.backoff_ms.saturating_mul(1u64 << shift)
        } else {
            self.backoff_ms
        };
        Duration::from_millis(ms)
    }
}

/// Result of driving one page through the retry policy.
#[derive(Debug)]
pub struct AttemptOutcome {
    pub result: Result<Extraction, PageError>,
    pub attempts: u32,
}

/// Extract one page, retrying transient failures.
///
/// Never returns an error upward: a page that cannot be extracted comes
/// back as a [`PageError`] so the document keeps going.
pub async fn extract_with_retry(
    client: &dyn InferenceClient,
    image: &PageImage,
    policy: &RetryPolicy,
) -> AttemptOutcome {
    let page = image.page_index();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let wait = policy.delay_before(attempt);
        if !wait.is_zero() {
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page,
                attempt,
                policy.max_attempts,
                wait.as_millis()
            );
            sleep(wait).await;
        }

        let err: InferenceError = match client.extract(image).await {
            Ok(extraction) => {
                return AttemptOutcome {
                    result: Ok(extraction),
                    attempts: attempt,
                }
            }
            Err(e) => e,
        };

        if !err.is_transient() {
            warn!("Page {}: permanent failure on attempt {}: {}", page, attempt, err);
            return AttemptOutcome {
                result: Err(PageError::Permanent {
                    page,
                    attempts: attempt,
                    detail: err.to_string(),
                }),
                attempts: attempt,
            };
        }

        warn!("Page {}: attempt {} failed: {}", page, attempt, err);
        if attempt >= policy.max_attempts {
            return AttemptOutcome {
                result: Err(PageError::RetriesExhausted {
                    page,
                    attempts: attempt,
                    detail: err.to_string(),
                }),
                attempts: attempt,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageFormat;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays a fixed list of answers, one per call.
    struct Scripted {
        answers: Mutex<Vec<Result<Extraction, InferenceError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut answers: Vec<Result<Extraction, InferenceError>>) -> Self {
            answers.reverse();
            Self {
                answers: Mutex::new(answers),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl InferenceClient for Scripted {
        async fn extract(&self, _image: &PageImage) -> Result<Extraction, InferenceError> {
            *self.calls.lock().unwrap() += 1;
            self.answers
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(InferenceError::Transport("script exhausted".into())))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_ms: 500,
            exponential: true,
        }
    }

    fn image() -> PageImage {
        PageImage::from_bytes(7, b"img", ImageFormat::Jpeg)
    }

    #[test]
    fn exponential_delays() {
        let p = policy(4);
        assert_eq!(p.delay_before(1), Duration::ZERO);
        assert_eq!(p.delay_before(2), Duration::from_millis(500));
        assert_eq!(p.delay_before(3), Duration::from_millis(1000));
        assert_eq!(p.delay_before(4), Duration::from_millis(2000));

        let fixed = RetryPolicy {
            exponential: false,
            ..p
        };
        assert_eq!(fixed.delay_before(4), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_use_every_attempt() {
        let client = Scripted::new(vec![]);
        let outcome = extract_with_retry(&client, &image(), &policy(3)).await;

        assert_eq!(client.calls(), 3);
        assert_eq!(outcome.attempts, 3);
        assert!(matches!(
            outcome.result,
            Err(PageError::RetriesExhausted { page: 7, attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let client = Scripted::new(vec![Err(InferenceError::Rejected("401".into()))]);
        let outcome = extract_with_retry(&client, &image(), &policy(3)).await;

        assert_eq!(client.calls(), 1);
        assert!(matches!(
            outcome.result,
            Err(PageError::Permanent { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_response_is_permanent() {
        let client = Scripted::new(vec![Err(InferenceError::EmptyResponse)]);
        let outcome = extract_with_retry(&client, &image(), &policy(3)).await;
        assert_eq!(client.calls(), 1);
        assert!(outcome.result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let client = Scripted::new(vec![
            Err(InferenceError::Timeout { secs: 30 }),
            Ok(Extraction::text("# Page seven")),
        ]);
        let started = tokio::time::Instant::now();
        let outcome = extract_with_retry(&client, &image(), &policy(3)).await;

        assert_eq!(client.calls(), 2);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result.unwrap().markdown, "# Page seven");
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_never_retries() {
        let client = Scripted::new(vec![Err(InferenceError::Transport("reset".into()))]);
        let outcome = extract_with_retry(&client, &image(), &policy(1)).await;
        assert_eq!(client.calls(), 1);
        assert!(matches!(
            outcome.result,
            Err(PageError::RetriesExhausted { attempts: 1, .. })
        ));
    }
}
