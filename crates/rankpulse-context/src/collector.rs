use async_trait::async_trait;
use rankpulse_core::{ContextItem, EventType, RankingEvent, TimeWindow};
use uuid::Uuid;

use crate::error::SourceError;

/// What a collector is asked to look up for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRequest {
    pub event_id: Uuid,
    pub entity_id: String,
    pub category_id: String,
    pub event_type: EventType,
    pub window: TimeWindow,
}

impl From<&RankingEvent> for SourceRequest {
    fn from(event: &RankingEvent) -> Self {
        Self {
            event_id: event.id,
            entity_id: event.entity_id.clone(),
            category_id: event.category_id.clone(),
            event_type: event.event_type,
            window: event.window,
        }
    }
}

/// One external source of corroborating context.
///
/// Implementations perform a single attempt; retries, timeouts and the call
/// budget are applied by the orchestrator around each call.
#[async_trait]
pub trait SourceCollector: Send + Sync {
    /// Stable name used as the key in a context bundle.
    fn name(&self) -> &str;

    async fn collect(&self, request: &SourceRequest) -> Result<Vec<ContextItem>, SourceError>;
}
