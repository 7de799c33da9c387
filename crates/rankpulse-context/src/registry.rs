use std::sync::Arc;
use std::time::Duration;

use rankpulse_core::{SourceKind, SourcesFile};
use sqlx::PgPool;

use crate::collector::SourceCollector;
use crate::error::SourceError;
use crate::sources::{CompetitorRankCollector, HttpSourceCollector};

/// A collector plus its per-attempt timeout.
#[derive(Clone)]
pub struct ConfiguredSource {
    pub collector: Arc<dyn SourceCollector>,
    pub timeout: Duration,
}

impl ConfiguredSource {
    #[must_use]
    pub fn new(collector: Arc<dyn SourceCollector>, timeout: Duration) -> Self {
        Self { collector, timeout }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.collector.name()
    }
}

impl std::fmt::Debug for ConfiguredSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredSource")
            .field("name", &self.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Instantiates every enabled source from the sources file.
///
/// `lookup` resolves `api_key_env` names; pass `|k| std::env::var(k).ok()` in
/// production.
///
/// # Errors
///
/// Returns [`SourceError::Config`] when an http source has no endpoint or its
/// API key variable is unset, and [`SourceError::Http`] if a client cannot be
/// built.
pub fn build_sources<F>(
    file: &SourcesFile,
    pool: &PgPool,
    default_timeout: Duration,
    lookup: F,
) -> Result<Vec<ConfiguredSource>, SourceError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut built = Vec::new();
    for config in file.enabled() {
        let timeout = config
            .timeout_secs
            .map_or(default_timeout, Duration::from_secs);

        let collector: Arc<dyn SourceCollector> = match config.kind {
            SourceKind::Http => {
                let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                    SourceError::Config(format!("source '{}' has no endpoint", config.name))
                })?;
                let api_key = match &config.api_key_env {
                    Some(var) => Some(lookup(var).filter(|v| !v.trim().is_empty()).ok_or_else(
                        || {
                            SourceError::Config(format!(
                                "source '{}' needs {var} to be set",
                                config.name
                            ))
                        },
                    )?),
                    None => None,
                };
                Arc::new(
                    HttpSourceCollector::new(&config.name, endpoint, timeout)?
                        .with_api_key(api_key)
                        .with_max_items(config.max_items),
                )
            }
            SourceKind::Competitor => Arc::new(CompetitorRankCollector::new(
                &config.name,
                pool.clone(),
                config.max_items,
            )),
        };

        tracing::info!(
            source = %config.name,
            kind = %config.kind,
            timeout_secs = timeout.as_secs(),
            "registered context source"
        );
        built.push(ConfiguredSource::new(collector, timeout));
    }
    Ok(built)
}
