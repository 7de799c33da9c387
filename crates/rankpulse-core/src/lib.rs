//! Domain types and configuration shared by every `rankpulse` crate.

pub mod app_config;
pub mod bundle;
pub mod config;
pub mod detector;
pub mod event;
pub mod insight;
pub mod similar;
pub mod snapshot;
pub mod sources;
pub mod window;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use bundle::{ContextBundle, ContextItem, SourceFailure, SourceResult};
pub use config::{load_app_config, load_app_config_from_env};
pub use detector::{DetectorThresholds, EventDetector};
pub use event::{
    event_id_for, EventState, EventType, FailureCode, FailureReason, RankingEvent, Severity,
    TimeWindow,
};
pub use insight::{Cause, Insight, Priority, Recommendation};
pub use similar::{rank_similar, SimilarEvent, SimilarMatch};
pub use snapshot::{SeriesKey, Snapshot, StockStatus};
pub use sources::{load_sources, SourceConfig, SourceKind, SourcesFile};
pub use window::WindowConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read sources file {path}: {source}")]
    SourcesFileIo {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse sources file: {0}")]
    SourcesFileParse(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Errors raised when decoding domain values from their stored form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("unknown event state: {0}")]
    UnknownEventState(String),

    #[error("unknown stock status: {0}")]
    UnknownStockStatus(String),

    #[error("unknown failure code: {0}")]
    UnknownFailureCode(String),

    #[error("unknown source failure reason: {0}")]
    UnknownSourceFailure(String),

    #[error("unknown priority: {0}")]
    UnknownPriority(String),

    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition { from: EventState, to: EventState },
}
