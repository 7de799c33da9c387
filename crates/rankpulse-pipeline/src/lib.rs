//! Drives ranking events from detection to a stored insight.
//!
//! The [`PipelineCoordinator`] owns the per-event state machine. Storage sits
//! behind [`PipelineStore`]; production runs use [`PgStore`].

pub mod builder;
pub mod coordinator;
pub mod detect;
pub mod error;
mod locks;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod store;

pub use builder::build_coordinator;
pub use coordinator::{CoordinatorSettings, PipelineCoordinator, ProcessOutcome, RunSummary};
pub use detect::detect_series;
pub use error::PipelineError;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStore;
pub use store::{PgStore, PipelineStore, SnapshotPair};
