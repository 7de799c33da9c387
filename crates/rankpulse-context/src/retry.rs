//! Per-source retry with exponential back-off and jitter.
//!
//! Every attempt, first or retry, must first reserve a call from the shared
//! [`CallBudget`]; once it is exhausted the source is recorded as failed with
//! `budget_exhausted` and no further call is made.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rankpulse_core::{SourceFailure, SourceResult};

use crate::budget::CallBudget;
use crate::collector::{SourceCollector, SourceRequest};
use crate::error::SourceError;

const MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first, for retriable errors only.
    pub max_retries: u32,
    /// Base delay for exponential back-off: `base * 2^(retry - 1)`.
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

/// Delay before the `retry`-th retry (1-based), capped at 60 s, ±25 % jitter.
pub(crate) fn backoff_delay_ms(backoff_base_ms: u64, retry: u32) -> u64 {
    let computed = backoff_base_ms.saturating_mul(1u64 << retry.saturating_sub(1).min(10));
    let capped = computed.min(MAX_DELAY_MS);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let jittered = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    jittered
}

/// Runs one source to a final [`SourceResult`].
///
/// `attempts` is incremented before each call so the caller can still report
/// an accurate count if this future is aborted mid-flight.
pub async fn collect_with_retry(
    collector: &dyn SourceCollector,
    request: &SourceRequest,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    budget: &CallBudget,
    attempts: &AtomicU32,
) -> SourceResult {
    let source = collector.name();
    let mut retry = 0u32;
    let mut last_error: Option<String> = None;

    loop {
        if !budget.try_acquire() {
            let error = match &last_error {
                Some(previous) => format!("call budget exhausted; last error: {previous}"),
                None => "call budget exhausted".to_string(),
            };
            tracing::warn!(
                event_id = %request.event_id,
                source,
                budget_limit = budget.limit(),
                "call budget exhausted; not dispatching"
            );
            return SourceResult::Failed {
                reason: SourceFailure::BudgetExhausted,
                error,
                attempts: attempts.load(Ordering::SeqCst),
            };
        }

        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = tokio::time::timeout(attempt_timeout, collector.collect(request)).await;

        let (error, timed_out, retry_after_ms) = match outcome {
            Ok(Ok(items)) => {
                budget.record_success();
                return SourceResult::Ok {
                    items,
                    attempts: attempt,
                };
            }
            Ok(Err(err)) if !err.is_retriable() => {
                return SourceResult::Failed {
                    reason: SourceFailure::SourceError,
                    error: err.to_string(),
                    attempts: attempt,
                };
            }
            Ok(Err(err)) => {
                let hint = match &err {
                    SourceError::RateLimited {
                        retry_after_secs, ..
                    } => retry_after_secs.saturating_mul(1_000),
                    _ => 0,
                };
                (err.to_string(), false, hint)
            }
            Err(_) => (
                format!("attempt timed out after {}ms", attempt_timeout.as_millis()),
                true,
                0,
            ),
        };

        if retry >= policy.max_retries {
            return if timed_out {
                SourceResult::TimedOut {
                    error,
                    attempts: attempt,
                }
            } else {
                SourceResult::Failed {
                    reason: SourceFailure::RetriesExhausted,
                    error,
                    attempts: attempt,
                }
            };
        }

        retry += 1;
        let delay_ms = backoff_delay_ms(policy.backoff_base_ms, retry)
            .max(retry_after_ms.min(MAX_DELAY_MS));
        tracing::warn!(
            event_id = %request.event_id,
            source,
            attempt,
            max_retries = policy.max_retries,
            delay_ms,
            error = %error,
            "transient source error, retrying after back-off"
        );
        last_error = Some(error);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}
