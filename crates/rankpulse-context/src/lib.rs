//! Context collection for ranking events.
//!
//! A [`ContextOrchestrator`] queries every configured [`SourceCollector`]
//! concurrently, applies per-source retries and timeouts, enforces a global
//! deadline and a shared [`CallBudget`], and merges the outcomes into a
//! [`rankpulse_core::ContextBundle`].

pub mod budget;
pub mod collector;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod sources;

pub use budget::CallBudget;
pub use collector::{SourceCollector, SourceRequest};
pub use error::SourceError;
pub use orchestrator::{ContextOrchestrator, GLOBAL_DEADLINE_ERROR};
pub use registry::{build_sources, ConfiguredSource};
pub use retry::{collect_with_retry, RetryPolicy};
pub use sources::{CompetitorRankCollector, HttpSourceCollector};
