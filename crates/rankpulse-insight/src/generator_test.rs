use std::sync::Mutex;

use async_trait::async_trait;
use chrono::TimeZone;
use rankpulse_core::{EventDetector, SimilarEvent, Snapshot, SourceResult};

use super::*;
use crate::error::InsightError;

enum Reply {
    Text(&'static str),
    Error,
    Hang,
}

/// Answers from a script and records every prompt it receives.
struct ScriptedModel {
    replies: Mutex<Vec<Reply>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(mut replies: Vec<Reply>) -> Arc<Self> {
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, InsightError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let reply = self.replies.lock().unwrap().pop();
        match reply {
            Some(Reply::Text(text)) => Ok(text.to_string()),
            Some(Reply::Error) | None => Err(InsightError::Api {
                status: 529,
                message: "overloaded".to_string(),
            }),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(InsightError::EmptyResponse)
            }
        }
    }
}

const VALID: &str = r#"{"summary":"Creator video drove demand.",
    "causes":[{"cause":"viral video","evidence":"social item 1","confidence":0.8}],
    "recommendations":[{"action":"increase stock","priority":"high"}],
    "confidence_score":0.72}"#;

const MISSING_SCORE: &str = r#"{"summary":"Creator video drove demand.",
    "causes":[{"cause":"viral video","evidence":"social item 1","confidence":0.8}],
    "recommendations":[]}"#;

fn event() -> RankingEvent {
    let snap = |rank, day| Snapshot {
        entity_id: "sku-3".to_string(),
        category_id: "grills".to_string(),
        rank,
        price: None,
        rating: None,
        review_count: None,
        stock_status: None,
        observed_at: Utc.with_ymd_and_hms(2026, 8, day, 0, 0, 0).unwrap(),
    };
    EventDetector::default()
        .detect(Some(&snap(30, 1)), &snap(5, 2), Utc::now())
        .pop()
        .unwrap()
}

fn bundle(event: &RankingEvent) -> ContextBundle {
    let mut bundle = ContextBundle::empty(event.id, Utc::now());
    bundle.per_source.insert(
        "social".to_string(),
        SourceResult::Ok {
            items: vec![],
            attempts: 1,
        },
    );
    bundle.completeness = 1.0;
    bundle
}

fn generator(model: Arc<ScriptedModel>, max_reprompts: u32) -> InsightGenerator {
    InsightGenerator::new(
        model,
        GeneratorSettings {
            max_reprompts,
            call_timeout: Duration::from_millis(100),
            top_items: 5,
            backoff_base_ms: 0,
        },
        vec!["social".to_string()],
    )
}

#[tokio::test]
async fn valid_first_answer_needs_one_call() {
    let model = ScriptedModel::new(vec![Reply::Text(VALID)]);
    let event = event();
    let insight = generator(model.clone(), 2)
        .generate(&event, &bundle(&event), &[])
        .await
        .unwrap();

    assert_eq!(model.prompts().len(), 1);
    assert_eq!(insight.attempts, 1);
    assert_eq!(insight.event_id, event.id);
    assert_eq!(insight.model_id, "scripted-model");
    assert_eq!(insight.prompt_version, PROMPT_VERSION);
    assert!(!insight.causes.is_empty());
    assert!((0.0..=1.0).contains(&insight.confidence_score));
}

#[tokio::test]
async fn missing_confidence_score_triggers_exactly_one_reprompt() {
    let model = ScriptedModel::new(vec![Reply::Text(MISSING_SCORE), Reply::Text(VALID)]);
    let event = event();
    let insight = generator(model.clone(), 2)
        .generate(&event, &bundle(&event), &[])
        .await
        .unwrap();

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("## Correction"));
    assert!(prompts[1].contains("## Correction"));
    assert!(prompts[1].contains("confidence_score is required"));
    assert!(prompts[1].starts_with(&prompts[0]));
    assert_eq!(insight.attempts, 2);
}

#[tokio::test]
async fn invalid_answers_exhaust_validation() {
    let model = ScriptedModel::new(vec![
        Reply::Text("not json"),
        Reply::Text(MISSING_SCORE),
        Reply::Text(MISSING_SCORE),
    ]);
    let event = event();
    let failure = generator(model.clone(), 2)
        .generate(&event, &bundle(&event), &[])
        .await
        .unwrap_err();

    assert_eq!(failure.code, FailureCode::InsightValidationExhausted);
    assert_eq!(failure.attempts, 3);
    assert!(failure.last_error.contains("confidence_score"));
    assert_eq!(model.prompts().len(), 3);
}

#[tokio::test]
async fn model_errors_consume_attempts() {
    let model = ScriptedModel::new(vec![Reply::Error, Reply::Error]);
    let event = event();
    let failure = generator(model.clone(), 1)
        .generate(&event, &bundle(&event), &[])
        .await
        .unwrap_err();

    assert_eq!(failure.code, FailureCode::InsightModelError);
    assert_eq!(failure.attempts, 2);
    assert!(failure.last_error.contains("529"));
}

#[tokio::test]
async fn model_error_then_valid_answer_succeeds() {
    let model = ScriptedModel::new(vec![Reply::Error, Reply::Text(VALID)]);
    let event = event();
    let insight = generator(model.clone(), 1)
        .generate(&event, &bundle(&event), &[])
        .await
        .unwrap();

    let prompts = model.prompts();
    assert_eq!(prompts[0], prompts[1]);
    assert_eq!(insight.attempts, 2);
}

#[tokio::test]
async fn timed_out_call_is_a_model_error() {
    let model = ScriptedModel::new(vec![Reply::Hang]);
    let event = event();
    let failure = generator(model, 0)
        .generate(&event, &bundle(&event), &[])
        .await
        .unwrap_err();

    assert_eq!(failure.code, FailureCode::InsightModelError);
    assert!(failure.last_error.contains("timed out"));
}

#[tokio::test]
async fn empty_bundle_still_generates() {
    let model = ScriptedModel::new(vec![Reply::Text(VALID)]);
    let event = event();
    let empty = ContextBundle::empty(event.id, Utc::now());
    let insight = generator(model.clone(), 0)
        .generate(&event, &empty, &[])
        .await
        .unwrap();

    assert_eq!(insight.attempts, 1);
    assert!(model.prompts()[0].contains("### Source: social\n- status: (absent)"));
}

#[tokio::test]
async fn precedents_reach_the_prompt_and_the_insight() {
    let model = ScriptedModel::new(vec![Reply::Text(VALID)]);
    let event = event();
    let precedent = SimilarEvent {
        event_id: Uuid::from_u128(7),
        event_type: event.event_type,
        severity: event.severity,
        entity_id: "sku-4".to_string(),
        category_id: "grills".to_string(),
        magnitude_pct: Some(75.0),
        detected_at: Utc.with_ymd_and_hms(2026, 5, 20, 0, 0, 0).unwrap(),
        summary: Some("Memorial Day feature lifted grills.".to_string()),
        similarity: 0.87,
    };
    let insight = generator(model.clone(), 0)
        .generate(&event, &bundle(&event), std::slice::from_ref(&precedent))
        .await
        .unwrap();

    assert_eq!(
        insight.similar_events,
        vec![SimilarMatch {
            event_id: precedent.event_id,
            similarity: 0.87,
        }]
    );
    let prompt = &model.prompts()[0];
    assert!(prompt.contains(&precedent.event_id.to_string()));
    assert!(prompt.contains("insight: Memorial Day feature lifted grills."));
}
