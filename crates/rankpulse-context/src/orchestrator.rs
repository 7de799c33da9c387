//! Fans one event out to every configured source and merges the results into
//! a [`ContextBundle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rankpulse_core::{ContextBundle, RankingEvent, SourceFailure, SourceResult};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::budget::CallBudget;
use crate::collector::SourceRequest;
use crate::registry::ConfiguredSource;
use crate::retry::{collect_with_retry, RetryPolicy};

pub const GLOBAL_DEADLINE_ERROR: &str = "global deadline elapsed";
const CANCELLED_ERROR: &str = "collection cancelled";
const PANICKED_ERROR: &str = "collector task panicked";

/// Why the collection loop stopped before every task reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupted {
    Cancelled,
    Deadline,
}

#[derive(Debug, Clone)]
pub struct ContextOrchestrator {
    sources: Vec<ConfiguredSource>,
    retry: RetryPolicy,
    deadline: Duration,
}

impl ContextOrchestrator {
    #[must_use]
    pub fn new(sources: Vec<ConfiguredSource>, retry: RetryPolicy, deadline: Duration) -> Self {
        Self {
            sources,
            retry,
            deadline,
        }
    }

    /// Names of the configured sources, in registration order.
    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Collects context for `event`, resuming from `prior` when given.
    ///
    /// A complete `prior` is returned unchanged. Otherwise only sources
    /// without an `Ok` result are dispatched and earlier `Ok` results are kept
    /// as they were. Never fails: every source ends with a recorded result.
    pub async fn collect(
        &self,
        event: &RankingEvent,
        prior: Option<ContextBundle>,
        budget: &Arc<CallBudget>,
        cancel: &CancellationToken,
    ) -> ContextBundle {
        let configured = self.source_names();

        let mut bundle = match prior {
            Some(bundle) if bundle.is_complete(&configured) => {
                tracing::debug!(event_id = %event.id, "context bundle already complete");
                return bundle;
            }
            Some(bundle) => bundle,
            None => ContextBundle::empty(event.id, Utc::now()),
        };
        let pending = bundle.pending_sources(&configured);
        let request = Arc::new(SourceRequest::from(event));

        let mut set = JoinSet::new();
        let mut outstanding: HashMap<String, Arc<AtomicU32>> = HashMap::new();

        for source in self
            .sources
            .iter()
            .filter(|s| pending.contains(&s.name()))
        {
            let name = source.name().to_string();
            let attempts = Arc::new(AtomicU32::new(0));
            outstanding.insert(name.clone(), Arc::clone(&attempts));

            let collector = Arc::clone(&source.collector);
            let timeout = source.timeout;
            let retry = self.retry;
            let budget = Arc::clone(budget);
            let request = Arc::clone(&request);
            set.spawn(async move {
                let result = collect_with_retry(
                    collector.as_ref(),
                    &request,
                    retry,
                    timeout,
                    &budget,
                    &attempts,
                )
                .await;
                (name, result)
            });
        }

        tracing::info!(
            event_id = %event.id,
            dispatched = outstanding.len(),
            configured = configured.len(),
            "collecting context"
        );

        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        let interrupted = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Some(Interrupted::Cancelled),
                () = &mut deadline => break Some(Interrupted::Deadline),
                joined = set.join_next() => match joined {
                    None => break None,
                    Some(Ok((name, result))) => {
                        outstanding.remove(&name);
                        match &result {
                            SourceResult::Ok { items, attempts } => tracing::debug!(
                                event_id = %event.id,
                                source = %name,
                                count = items.len(),
                                attempts,
                                "source collected"
                            ),
                            other => tracing::warn!(
                                event_id = %event.id,
                                source = %name,
                                status = other.status(),
                                attempts = other.attempts(),
                                error = other.error().unwrap_or_default(),
                                "source collection failed"
                            ),
                        }
                        bundle.per_source.insert(name, result);
                    }
                    Some(Err(e)) => {
                        tracing::error!(event_id = %event.id, error = %e, "context task failed");
                    }
                },
            }
        };
        set.abort_all();

        for (name, attempts) in outstanding {
            let attempts = attempts.load(Ordering::SeqCst);
            let result = match interrupted {
                Some(Interrupted::Deadline) => SourceResult::TimedOut {
                    error: GLOBAL_DEADLINE_ERROR.to_string(),
                    attempts,
                },
                Some(Interrupted::Cancelled) => SourceResult::Failed {
                    reason: SourceFailure::Cancelled,
                    error: CANCELLED_ERROR.to_string(),
                    attempts,
                },
                // Only a panicked task can leave the set without reporting.
                None => SourceResult::Failed {
                    reason: SourceFailure::SourceError,
                    error: PANICKED_ERROR.to_string(),
                    attempts,
                },
            };
            tracing::warn!(
                event_id = %event.id,
                source = %name,
                status = result.status(),
                error = result.error().unwrap_or_default(),
                "source did not finish"
            );
            bundle.per_source.insert(name, result);
        }

        bundle.collected_at = Utc::now();
        bundle.recompute_completeness(&configured);

        tracing::info!(
            event_id = %event.id,
            completeness = bundle.completeness,
            budget_attempted = budget.attempted(),
            budget_remaining = budget.remaining(),
            "context collection finished"
        );
        bundle
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
