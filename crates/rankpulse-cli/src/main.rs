mod events;
mod pipeline;
mod snapshot;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rankpulse_core::{AppConfig, EventState, Severity, StockStatus};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "rankpulse-cli")]
#[command(about = "RankPulse operator command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Record ranking snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
    /// Run event detection over the latest snapshots without collecting context
    Detect {
        /// Restrict detection to one entity
        #[arg(long)]
        entity: Option<String>,

        /// Restrict detection to one category
        #[arg(long)]
        category: Option<String>,
    },
    /// Run one full pipeline pass: detect, collect context, generate insights
    Run,
    /// Inspect and act on detected events
    Events {
        #[command(subcommand)]
        command: EventCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check database connectivity
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[derive(Debug, Subcommand)]
enum SnapshotCommands {
    /// Append one observation of an entity in a category
    Put {
        #[arg(long)]
        entity: String,

        #[arg(long)]
        category: String,

        /// Position in the category, 1 is best
        #[arg(long)]
        rank: i32,

        #[arg(long)]
        price: Option<Decimal>,

        #[arg(long)]
        rating: Option<Decimal>,

        #[arg(long)]
        reviews: Option<i32>,

        /// `in_stock`, `low_stock`, `out_of_stock` or `unknown`
        #[arg(long)]
        stock: Option<StockStatus>,

        /// RFC 3339 timestamp; defaults to now
        #[arg(long)]
        observed_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Subcommand)]
enum EventCommands {
    /// List recent events
    List {
        /// Lowest severity to show
        #[arg(long)]
        min_severity: Option<Severity>,

        /// Only events in this state (e.g. FAILED)
        #[arg(long)]
        state: Option<EventState>,

        #[arg(long)]
        entity: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show an event with its context bundle and current insight
    Show {
        id: Uuid,

        /// Print the raw records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a FAILED event back to DETECTED so the next run retries it
    Requeue { id: Uuid },
    /// Generate a new insight for an event, keeping the previous one
    Regenerate { id: Uuid },
}

async fn connect(config: &AppConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool_config = rankpulse_db::PoolConfig::from_app_config(config);
    Ok(rankpulse_db::connect_pool(&config.database_url, pool_config).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("rankpulse-cli: no command given; run with --help for usage");
        return Ok(());
    };

    let config = rankpulse_core::load_app_config()?;
    let pool = connect(&config).await?;

    match command {
        Commands::Db {
            command: DbCommands::Ping,
        } => {
            rankpulse_db::ping(&pool).await?;
            println!("database: ok");
        }
        Commands::Db {
            command: DbCommands::Migrate,
        } => {
            let applied = rankpulse_db::run_migrations(&pool).await?;
            println!("migrations applied: {applied}");
        }
        Commands::Snapshot {
            command:
                SnapshotCommands::Put {
                    entity,
                    category,
                    rank,
                    price,
                    rating,
                    reviews,
                    stock,
                    observed_at,
                },
        } => {
            let snapshot = rankpulse_core::Snapshot {
                entity_id: entity,
                category_id: category,
                rank,
                price,
                rating,
                review_count: reviews,
                stock_status: stock,
                observed_at: observed_at.unwrap_or_else(Utc::now),
            };
            snapshot::run_snapshot_put(&pool, &snapshot).await?;
        }
        Commands::Detect { entity, category } => {
            pipeline::run_detect(&pool, &config, entity.as_deref(), category.as_deref()).await?;
        }
        Commands::Run => pipeline::run_pipeline(&pool, &config).await?,
        Commands::Events { command } => match command {
            EventCommands::List {
                min_severity,
                state,
                entity,
                limit,
            } => events::run_events_list(&pool, min_severity, state, entity, limit).await?,
            EventCommands::Show { id, json } => events::run_events_show(&pool, id, json).await?,
            EventCommands::Requeue { id } => events::run_events_requeue(&pool, id).await?,
            EventCommands::Regenerate { id } => {
                pipeline::run_regenerate(&pool, &config, id).await?;
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests;
