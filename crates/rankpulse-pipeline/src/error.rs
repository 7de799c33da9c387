use rankpulse_context::SourceError;
use rankpulse_core::{ConfigError, CoreError, EventState};
use rankpulse_db::DbError;
use rankpulse_insight::{InsightError, InsightFailure};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("event not found")]
    NotFound,

    /// The event moved on since it was read; another worker owns it now.
    #[error("event {id} was changed concurrently")]
    Stale { id: Uuid },

    #[error("event {id} is {actual}, expected {expected}")]
    InvalidState {
        id: Uuid,
        expected: EventState,
        actual: EventState,
    },

    #[error("event {id} has no stored context bundle")]
    MissingContext { id: Uuid },

    #[error("event {id} context completeness {completeness:.2} is below the minimum {minimum:.2}")]
    InsufficientContext {
        id: Uuid,
        completeness: f64,
        minimum: f64,
    },

    #[error(transparent)]
    Domain(#[from] CoreError),

    #[error(transparent)]
    Insight(#[from] InsightFailure),

    #[error("store error: {0}")]
    Store(#[source] DbError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("source setup failed: {0}")]
    Source(#[from] SourceError),

    #[error("model client setup failed: {0}")]
    Model(#[from] InsightError),
}

impl From<DbError> for PipelineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => PipelineError::NotFound,
            DbError::StaleTransition { id, .. } => PipelineError::Stale { id },
            DbError::Domain(e) => PipelineError::Domain(e),
            other => PipelineError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_db_transition_maps_to_stale() {
        let id = Uuid::new_v4();
        let err = PipelineError::from(DbError::StaleTransition {
            id,
            expected_state: EventState::Detected,
            expected_version: 3,
        });
        assert!(matches!(err, PipelineError::Stale { id: got } if got == id));
    }

    #[test]
    fn illegal_transition_stays_a_domain_error() {
        let err = PipelineError::from(DbError::Domain(CoreError::IllegalTransition {
            from: EventState::Failed,
            to: EventState::Detected,
        }));
        assert!(matches!(err, PipelineError::Domain(_)));
    }
}
