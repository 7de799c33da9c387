use super::*;
use crate::pipeline::{format_summary, select_series};
use crate::snapshot::validate_snapshot;
use rankpulse_core::SeriesKey;
use rankpulse_pipeline::RunSummary;

#[test]
fn parses_db_ping_command() {
    let cli = Cli::try_parse_from(["rankpulse-cli", "db", "ping"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Ping
        })
    ));
}

#[test]
fn parses_db_migrate_command() {
    let cli =
        Cli::try_parse_from(["rankpulse-cli", "db", "migrate"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Migrate
        })
    ));
}

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["rankpulse-cli"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn parses_snapshot_put_with_typed_values() {
    let cli = Cli::try_parse_from([
        "rankpulse-cli",
        "snapshot",
        "put",
        "--entity",
        "sku-1",
        "--category",
        "kettles",
        "--rank",
        "5",
        "--price",
        "24.99",
        "--stock",
        "low_stock",
        "--observed-at",
        "2026-09-02T00:00:00Z",
    ])
    .unwrap();

    let Some(Commands::Snapshot {
        command:
            SnapshotCommands::Put {
                entity,
                rank,
                price,
                stock,
                observed_at,
                reviews,
                ..
            },
    }) = cli.command
    else {
        panic!("expected snapshot put");
    };
    assert_eq!(entity, "sku-1");
    assert_eq!(rank, 5);
    assert_eq!(price, Some("24.99".parse().unwrap()));
    assert_eq!(stock, Some(StockStatus::LowStock));
    assert_eq!(
        observed_at.map(|t| t.to_rfc3339()),
        Some("2026-09-02T00:00:00+00:00".to_string())
    );
    assert_eq!(reviews, None);
}

#[test]
fn snapshot_put_rejects_unknown_stock_status() {
    let result = Cli::try_parse_from([
        "rankpulse-cli",
        "snapshot",
        "put",
        "--entity",
        "sku-1",
        "--category",
        "kettles",
        "--rank",
        "5",
        "--stock",
        "plenty",
    ]);
    assert!(result.is_err());
}

#[test]
fn parses_detect_with_filters() {
    let cli = Cli::try_parse_from(["rankpulse-cli", "detect", "--entity", "sku-1"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Detect {
            entity: Some(ref e),
            category: None,
        }) if e == "sku-1"
    ));
}

#[test]
fn parses_run_command() {
    let cli = Cli::try_parse_from(["rankpulse-cli", "run"]).unwrap();
    assert!(matches!(cli.command, Some(Commands::Run)));
}

#[test]
fn parses_events_list_filters() {
    let cli = Cli::try_parse_from([
        "rankpulse-cli",
        "events",
        "list",
        "--min-severity",
        "high",
        "--state",
        "FAILED",
    ])
    .unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Events {
            command: EventCommands::List {
                min_severity: Some(Severity::High),
                state: Some(EventState::Failed),
                entity: None,
                limit: 20,
            }
        })
    ));
}

#[test]
fn events_requeue_requires_a_uuid() {
    let id = Uuid::new_v4();
    let cli =
        Cli::try_parse_from(["rankpulse-cli", "events", "requeue", &id.to_string()]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Events {
            command: EventCommands::Requeue { id: parsed }
        }) if parsed == id
    ));

    assert!(Cli::try_parse_from(["rankpulse-cli", "events", "requeue", "not-a-uuid"]).is_err());
}

#[test]
fn parses_events_show_json_flag() {
    let id = Uuid::new_v4();
    let cli = Cli::try_parse_from([
        "rankpulse-cli",
        "events",
        "show",
        &id.to_string(),
        "--json",
    ])
    .unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Events {
            command: EventCommands::Show { json: true, .. }
        })
    ));
}

#[test]
fn select_series_applies_entity_and_category() {
    let series = vec![
        SeriesKey::new("a", "x"),
        SeriesKey::new("a", "y"),
        SeriesKey::new("b", "x"),
    ];
    assert_eq!(select_series(series.clone(), None, None).len(), 3);
    assert_eq!(
        select_series(series.clone(), Some("a"), None),
        vec![SeriesKey::new("a", "x"), SeriesKey::new("a", "y")]
    );
    assert_eq!(
        select_series(series, Some("a"), Some("y")),
        vec![SeriesKey::new("a", "y")]
    );
}

#[test]
fn snapshot_validation_rejects_negative_reviews() {
    let snapshot = rankpulse_core::Snapshot {
        entity_id: "sku-1".to_string(),
        category_id: "kettles".to_string(),
        rank: 3,
        price: None,
        rating: None,
        review_count: Some(-1),
        stock_status: None,
        observed_at: Utc::now(),
    };
    assert!(validate_snapshot(&snapshot).is_err());
}

#[test]
fn summary_line_reports_counts() {
    let summary = RunSummary {
        detected: 2,
        dispatched: 3,
        generated: 1,
        failed: 1,
        cancelled: 1,
        budget_attempted: 9,
        budget_succeeded: 6,
        ..RunSummary::default()
    };
    let line = format_summary(&summary);
    assert!(line.contains("2 detected"));
    assert!(line.contains("1 generated"));
    assert!(line.contains("source calls 9 (6 ok)"));
}
