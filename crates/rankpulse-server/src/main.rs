mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use rankpulse_insight::AnthropicClient;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(rankpulse_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(env = %config.env, bind_addr = %config.bind_addr, "starting rankpulse-server");

    let pool_config = rankpulse_db::PoolConfig::from_app_config(&config);
    let pool = rankpulse_db::connect_pool(&config.database_url, pool_config).await?;
    let applied = rankpulse_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations up to date");

    let cancel = CancellationToken::new();

    // The API stays up without a model key; only scheduled runs need it.
    let scheduler = match AnthropicClient::from_app_config(&config) {
        Ok(client) => {
            let coordinator = rankpulse_pipeline::build_coordinator(
                &config,
                pool.clone(),
                Arc::new(client),
            )?;
            Some(
                scheduler::build_scheduler(
                    Arc::new(coordinator),
                    &config.pipeline_cron,
                    cancel.clone(),
                )
                .await?,
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "insight model not configured; scheduled pipeline runs disabled");
            None
        }
    };

    let auth = AuthState::new(
        &config.api_keys,
        matches!(config.env, rankpulse_core::Environment::Development),
    )?;
    let app = build_app(AppState { pool }, auth);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    if let Some(mut scheduler) = scheduler {
        scheduler.shutdown().await?;
    }
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM and cancels any in-flight pipeline run, which
/// then stops at its next state boundary.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
    cancel.cancel();
}
