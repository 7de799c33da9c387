use std::sync::atomic::AtomicU32;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rankpulse_core::{ContextItem, EventDetector, Snapshot};

use super::*;
use crate::collector::SourceCollector;
use crate::error::SourceError;

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Items(usize),
    Status(u16),
    Hang,
    Panic,
}

struct Fake {
    name: &'static str,
    behavior: Behavior,
    calls: AtomicU32,
}

impl Fake {
    fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceCollector for Fake {
    fn name(&self) -> &str {
        self.name
    }

    async fn collect(&self, _: &SourceRequest) -> Result<Vec<ContextItem>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Items(n) => Ok((0..n)
                .map(|i| ContextItem {
                    id: format!("{}-{i}", self.name),
                    title: format!("{} item {i}", self.name),
                    body: None,
                    url: None,
                    score: None,
                    occurred_at: None,
                    attributes: serde_json::Value::Null,
                })
                .collect()),
            Behavior::Status(status) => Err(SourceError::UnexpectedStatus {
                status,
                source_name: self.name.to_string(),
            }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(vec![])
            }
            Behavior::Panic => panic!("collector blew up"),
        }
    }
}

fn event() -> RankingEvent {
    let snap = |rank, day| Snapshot {
        entity_id: "sku-9".to_string(),
        category_id: "kettles".to_string(),
        rank,
        price: None,
        rating: None,
        review_count: None,
        stock_status: None,
        observed_at: Utc.with_ymd_and_hms(2026, 5, day, 12, 0, 0).unwrap(),
    };
    EventDetector::default()
        .detect(Some(&snap(30, 1)), &snap(5, 2), Utc::now())
        .pop()
        .unwrap()
}

fn orchestrator(fakes: &[Arc<Fake>], deadline: Duration) -> ContextOrchestrator {
    let sources = fakes
        .iter()
        .map(|f| {
            let collector: Arc<dyn SourceCollector> = f.clone();
            ConfiguredSource::new(collector, Duration::from_secs(3600))
        })
        .collect();
    ContextOrchestrator::new(
        sources,
        RetryPolicy {
            max_retries: 1,
            backoff_base_ms: 0,
        },
        deadline,
    )
}

fn budget(limit: u64) -> Arc<CallBudget> {
    Arc::new(CallBudget::new(limit))
}

#[tokio::test]
async fn two_of_three_failing_still_produces_a_bundle() {
    let fakes = [
        Fake::new("news", Behavior::Items(2)),
        Fake::new("reviews", Behavior::Status(404)),
        Fake::new("social", Behavior::Status(400)),
    ];
    let orch = orchestrator(&fakes, Duration::from_secs(5));
    let bundle = orch
        .collect(&event(), None, &budget(100), &CancellationToken::new())
        .await;

    assert!((bundle.completeness - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(bundle.per_source.len(), 3);
    assert_eq!(bundle.per_source["news"].items().len(), 2);
    assert!(matches!(
        bundle.per_source["reviews"],
        SourceResult::Failed {
            reason: SourceFailure::SourceError,
            attempts: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn resume_only_redispatches_sources_without_ok() {
    let news = Fake::new("news", Behavior::Items(1));
    let social = Fake::new("social", Behavior::Items(3));
    let orch = orchestrator(&[news.clone(), social.clone()], Duration::from_secs(5));
    let event = event();

    let mut prior = ContextBundle::empty(event.id, Utc::now());
    let kept = SourceResult::Ok {
        items: vec![],
        attempts: 2,
    };
    prior.per_source.insert("news".to_string(), kept.clone());
    prior.per_source.insert(
        "social".to_string(),
        SourceResult::TimedOut {
            error: GLOBAL_DEADLINE_ERROR.to_string(),
            attempts: 1,
        },
    );

    let bundle = orch
        .collect(&event, Some(prior), &budget(100), &CancellationToken::new())
        .await;

    assert_eq!(news.calls(), 0);
    assert_eq!(social.calls(), 1);
    assert_eq!(bundle.per_source["news"], kept);
    assert_eq!(bundle.per_source["social"].items().len(), 3);
    assert!((bundle.completeness - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn complete_prior_bundle_is_returned_unchanged() {
    let news = Fake::new("news", Behavior::Items(1));
    let orch = orchestrator(&[news.clone()], Duration::from_secs(5));
    let event = event();

    let mut prior = ContextBundle::empty(event.id, Utc::now());
    prior.per_source.insert(
        "news".to_string(),
        SourceResult::Ok {
            items: vec![],
            attempts: 1,
        },
    );
    prior.completeness = 1.0;

    let bundle = orch
        .collect(
            &event,
            Some(prior.clone()),
            &budget(100),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(bundle, prior);
    assert_eq!(news.calls(), 0);
}

#[tokio::test]
async fn exhausted_budget_marks_remaining_sources() {
    let fakes = [
        Fake::new("news", Behavior::Items(1)),
        Fake::new("social", Behavior::Items(1)),
    ];
    let orch = orchestrator(&fakes, Duration::from_secs(5));
    let shared = budget(1);
    let bundle = orch
        .collect(&event(), None, &shared, &CancellationToken::new())
        .await;

    let ok = bundle.per_source.values().filter(|r| r.is_ok()).count();
    let starved = bundle
        .per_source
        .values()
        .filter(|r| {
            matches!(
                r,
                SourceResult::Failed {
                    reason: SourceFailure::BudgetExhausted,
                    attempts: 0,
                    ..
                }
            )
        })
        .count();
    assert_eq!((ok, starved), (1, 1));
    assert_eq!(shared.attempted(), 1);
    assert_eq!(shared.succeeded(), 1);
    assert!((bundle.completeness - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn global_deadline_times_out_slow_sources() {
    let fakes = [
        Fake::new("news", Behavior::Items(1)),
        Fake::new("slow", Behavior::Hang),
    ];
    let orch = orchestrator(&fakes, Duration::from_millis(100));
    let bundle = orch
        .collect(&event(), None, &budget(100), &CancellationToken::new())
        .await;

    assert!(bundle.per_source["news"].is_ok());
    match &bundle.per_source["slow"] {
        SourceResult::TimedOut { error, attempts } => {
            assert_eq!(error, GLOBAL_DEADLINE_ERROR);
            assert_eq!(*attempts, 1);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_records_partial_bundle() {
    let fakes = [
        Fake::new("news", Behavior::Items(1)),
        Fake::new("slow", Behavior::Hang),
    ];
    let orch = orchestrator(&fakes, Duration::from_secs(60));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let bundle = orch.collect(&event(), None, &budget(100), &cancel).await;

    assert!(bundle.per_source["news"].is_ok());
    assert!(matches!(
        bundle.per_source["slow"],
        SourceResult::Failed {
            reason: SourceFailure::Cancelled,
            ..
        }
    ));
    assert!((bundle.completeness - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn panicking_collector_is_recorded_as_failed() {
    let fakes = [
        Fake::new("news", Behavior::Items(1)),
        Fake::new("broken", Behavior::Panic),
    ];
    let orch = orchestrator(&fakes, Duration::from_secs(5));
    let bundle = orch
        .collect(&event(), None, &budget(100), &CancellationToken::new())
        .await;

    assert_eq!(bundle.per_source["broken"].error(), Some(PANICKED_ERROR));
    assert!(bundle.per_source["news"].is_ok());
}

#[tokio::test]
async fn no_sources_is_vacuously_complete() {
    let orch = orchestrator(&[], Duration::from_secs(5));
    let bundle = orch
        .collect(&event(), None, &budget(0), &CancellationToken::new())
        .await;
    assert!(bundle.per_source.is_empty());
    assert!((bundle.completeness - 1.0).abs() < f64::EPSILON);
}
