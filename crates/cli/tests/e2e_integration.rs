//! End-to-end integration tests for the RagDesk orchestration core.
//!
//! These tests drive the public surfaces (orchestrator, session store,
//! citation aggregation and the HTTP router) with scripted backends.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use ragdesk_agent::{ChatRequest, CitationAggregator, Orchestrator, StreamEvent};
use ragdesk_config::AppConfig;
use ragdesk_core::error::{ProviderError, RetrievalError};
use ragdesk_core::event::{DomainEvent, EventBus};
use ragdesk_core::generation::{
    GenerationRequest, GenerationResponse, GenerationService, TokenChunk, TokenReceiver,
};
use ragdesk_core::retrieval::{KnowledgeRetriever, RetrievalRequest, RetrievedDocument};
use ragdesk_core::{DomainId, RetrievedPassage, SessionKey, Turn};
use ragdesk_gateway::{GatewayState, build_router};
use ragdesk_memory::{InMemoryFeedbackStore, SessionStore, TracingTurnLog};

const MIXED_QUERY: &str = "How does nutrition affect TB treatment outcomes?";

// ── Scripted backends ────────────────────────────────────────────────────

/// Answers by matching a substring of the system prompt.
struct ScriptedGenerator {
    rules: Vec<(&'static str, Vec<&'static str>)>,
    failing: Vec<&'static str>,
    chunk_delay: Duration,
    prompts: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn new() -> Self {
        Self {
            rules: vec![
                ("TB and health", vec!["First-line treatment is HRZE [1]."]),
                ("agriculture specialist", vec!["Grow legumes for protein [1]."]),
                ("did not clearly match", vec!["I cover TB and agriculture."]),
                ("follow-up", vec!["What foods help recovery?"]),
            ],
            failing: Vec::new(),
            chunk_delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, needle: &'static str) -> Self {
        self.failing.push(needle);
        self
    }

    fn slow(mut self, needle: &'static str, chunks: Vec<&'static str>, delay: Duration) -> Self {
        self.rules.retain(|(n, _)| *n != needle);
        self.rules.insert(0, (needle, chunks));
        self.chunk_delay = delay;
        self
    }

    fn chunks_for(&self, request: &GenerationRequest) -> Result<Vec<String>, ProviderError> {
        self.prompts.lock().unwrap().push(request.clone());
        let system = request.system_prompt().unwrap_or_default();
        if self.failing.iter().any(|n| system.contains(n)) {
            return Err(ProviderError::Network("connection refused".into()));
        }
        Ok(self
            .rules
            .iter()
            .find(|(n, _)| system.contains(n))
            .map(|(_, c)| c.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl GenerationService for ScriptedGenerator {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let model = request.model.clone();
        let text = self.chunks_for(&request)?.concat();
        Ok(GenerationResponse {
            text,
            usage: None,
            model,
        })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TokenReceiver, ProviderError> {
        let chunks = self.chunks_for(&request)?;
        let delay = self.chunk_delay;
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tokio::spawn(async move {
            for chunk in chunks {
                tokio::time::sleep(delay).await;
                let chunk = TokenChunk {
                    content: Some(chunk),
                    ..Default::default()
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(Ok(TokenChunk {
                    done: true,
                    ..Default::default()
                }))
                .await;
        });
        Ok(rx)
    }
}

struct ScriptedRetriever {
    failing: Option<&'static str>,
}

#[async_trait::async_trait]
impl KnowledgeRetriever for ScriptedRetriever {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn retrieve(&self, request: RetrievalRequest) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        if self.failing == Some(request.corpus_id.as_str()) {
            return Err(RetrievalError::ServiceError {
                status_code: 502,
                message: "bad gateway".into(),
            });
        }
        let docs = match request.corpus_id.as_str() {
            "tb-knowledge-base" => vec![("s3://kb/tb/who-guidelines.pdf", "HRZE for six months.", 0.92)],
            "agriculture-knowledge-base" => vec![("s3://kb/agri/legumes.pdf", "Legumes are protein-rich.", 0.81)],
            _ => Vec::new(),
        };
        Ok(docs
            .into_iter()
            .map(|(locator, text, score)| RetrievedDocument {
                source_locator: locator.into(),
                text: text.into(),
                score,
            })
            .collect())
    }
}

fn orchestrator_with(
    config: &AppConfig,
    generator: ScriptedGenerator,
    retriever: ScriptedRetriever,
) -> (Arc<Orchestrator>, Arc<EventBus>) {
    let events = Arc::new(EventBus::default());
    let sessions = Arc::new(SessionStore::with_limits(
        config.session.ttl_secs,
        config.session.max_turns,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        config,
        Arc::new(generator),
        Arc::new(retriever),
        sessions,
        Arc::new(TracingTurnLog),
        Arc::clone(&events),
    ));
    (orchestrator, events)
}

fn orchestrator() -> Arc<Orchestrator> {
    orchestrator_with(
        &AppConfig::default(),
        ScriptedGenerator::new(),
        ScriptedRetriever { failing: None },
    )
    .0
}

// ── E2E: Orchestrated turns ──────────────────────────────────────────────

#[tokio::test]
async fn e2e_mixed_query_answers_from_both_specialists() {
    let orchestrator = orchestrator();
    let response = orchestrator
        .handle(ChatRequest::new("farmer-1", MIXED_QUERY))
        .await
        .expect("turn should succeed");

    assert!(!response.error);
    assert!(!response.degraded);
    assert_eq!(
        response.domains,
        vec![DomainId::new("tuberculosis"), DomainId::new("agriculture")]
    );
    let tb_at = response.response.find("HRZE").unwrap();
    let agri_at = response.response.find("legumes").unwrap();
    assert!(tb_at < agri_at, "primary section comes first");

    let sources: Vec<_> = response.citations.iter().map(|c| c.source.as_str()).collect();
    assert_eq!(sources, vec!["s3://kb/tb/who-guidelines.pdf", "s3://kb/agri/legumes.pdf"]);
    let ids: Vec<_> = response.citations.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(!response.session_id.is_empty());
    assert!(!response.response_id.is_empty());
}

#[tokio::test]
async fn e2e_second_call_sees_first_turn() {
    let orchestrator = orchestrator();
    let first = orchestrator
        .handle(ChatRequest::new("u1", "What is the TB treatment regimen?"))
        .await
        .unwrap();

    orchestrator
        .handle(ChatRequest::new("u1", "How long does it take?").with_session(&first.session_id))
        .await
        .unwrap();

    let session = orchestrator
        .sessions()
        .get(&SessionKey::new("u1", first.session_id.clone()));
    assert_eq!(session.turns.len(), 4);
    assert_eq!(session.turns[0].text, "What is the TB treatment regimen?");
    assert_eq!(session.turns[1].text, first.response);
    assert_eq!(session.turns[1].citations, first.citations);
}

#[tokio::test]
async fn e2e_one_specialist_down_still_answers() {
    let (orchestrator, events) = orchestrator_with(
        &AppConfig::default(),
        ScriptedGenerator::new().failing("agriculture specialist"),
        ScriptedRetriever { failing: None },
    );
    let mut bus = events.subscribe();

    let response = orchestrator
        .handle(ChatRequest::new("u1", MIXED_QUERY))
        .await
        .unwrap();

    assert!(!response.error);
    assert!(response.degraded);
    assert_eq!(response.domains, vec![DomainId::new("tuberculosis")]);
    assert!(response.response.contains("HRZE"));
    assert!(response.citations.iter().all(|c| c.domain == DomainId::new("tuberculosis")));

    let mut degraded = Vec::new();
    while let Ok(event) = bus.try_recv() {
        if let DomainEvent::SpecialistDegraded { domain, .. } = event.as_ref() {
            degraded.push(domain.clone());
        }
    }
    assert_eq!(degraded, vec!["agriculture".to_string()]);
}

#[tokio::test]
async fn e2e_retrieval_outage_degrades_only_that_domain() {
    let (orchestrator, _) = orchestrator_with(
        &AppConfig::default(),
        ScriptedGenerator::new(),
        ScriptedRetriever {
            failing: Some("tb-knowledge-base"),
        },
    );
    let response = orchestrator
        .handle(ChatRequest::new("u1", MIXED_QUERY))
        .await
        .unwrap();

    assert!(response.degraded);
    assert_eq!(response.domains, vec![DomainId::new("agriculture")]);
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].id, 1);
}

#[tokio::test(start_paused = true)]
async fn e2e_cancellation_persists_nothing() {
    let (orchestrator, events) = orchestrator_with(
        &AppConfig::default(),
        ScriptedGenerator::new().slow(
            "TB and health",
            vec!["Start with ", "HRZE ", "for six months."],
            Duration::from_millis(500),
        ),
        ScriptedRetriever { failing: None },
    );
    let mut bus = events.subscribe();

    let mut rx = orchestrator
        .handle_stream(ChatRequest::new("u1", "Is TB curable?").with_session("s-cancel"))
        .unwrap();
    assert!(matches!(rx.recv().await, Some(StreamEvent::Content(_))));
    drop(rx);

    let event = bus.recv().await.unwrap();
    assert!(matches!(
        event.as_ref(),
        DomainEvent::RequestFailed { cancelled: true, .. }
    ));
    tokio::time::sleep(Duration::from_secs(10)).await;

    let session = orchestrator
        .sessions()
        .get(&SessionKey::new("u1", "s-cancel"));
    assert!(session.turns.is_empty());
}

#[tokio::test]
async fn e2e_users_sharing_a_session_id_are_isolated() {
    let orchestrator = orchestrator();
    orchestrator
        .handle(ChatRequest::new("alice", "What are TB symptoms?").with_session("shared"))
        .await
        .unwrap();

    let alice = orchestrator.sessions().get(&SessionKey::new("alice", "shared"));
    let bob = orchestrator.sessions().get(&SessionKey::new("bob", "shared"));
    assert_eq!(alice.turns.len(), 2);
    assert!(bob.turns.is_empty());
}

// ── E2E: Session lifecycle ───────────────────────────────────────────────

#[test]
fn e2e_sweep_evicts_idle_sessions_only() {
    let store = SessionStore::new(Duration::from_secs(60), 20);
    let key = SessionKey::new("u1", "s1");
    store.append(&key, Turn::user("hello"));
    let touched = store.get(&key).last_access;

    assert_eq!(store.sweep(touched + chrono::Duration::seconds(30)), 0);
    assert!(store.contains(&key));

    assert_eq!(store.sweep(touched + chrono::Duration::seconds(61)), 1);
    assert!(!store.contains(&key));

    // A later request starts a fresh session
    assert!(store.get(&key).turns.is_empty());
}

// ── E2E: Citation aggregation ────────────────────────────────────────────

#[test]
fn e2e_aggregation_ignores_arrival_order() {
    let passage = |locator: &str, score: f32, domain: &str| RetrievedPassage {
        source_locator: locator.into(),
        excerpt: format!("excerpt from {locator}"),
        score,
        domain: DomainId::new(domain),
    };
    let passages = vec![
        passage("s3://kb/tb/a.pdf", 0.9, "tuberculosis"),
        passage("s3://kb/shared/n.pdf", 0.5, "tuberculosis"),
        passage("s3://kb/shared/n.pdf", 0.7, "agriculture"),
        passage("s3://kb/agri/b.pdf", 0.7, "agriculture"),
    ];
    let mut reversed = passages.clone();
    reversed.reverse();

    let aggregator = CitationAggregator::new(10, 200);
    let forward = aggregator.aggregate(&passages);
    assert_eq!(forward, aggregator.aggregate(&reversed));
    assert_eq!(forward.len(), 3);
    assert_eq!(forward[0].source, "s3://kb/tb/a.pdf");
}

// ── E2E: HTTP gateway ────────────────────────────────────────────────────

fn router() -> axum::Router {
    let config = AppConfig::default();
    let (orchestrator, _) = orchestrator_with(
        &config,
        ScriptedGenerator::new(),
        ScriptedRetriever { failing: None },
    );
    build_router(GatewayState::new(
        config,
        orchestrator,
        Arc::new(InMemoryFeedbackStore::new()),
    ))
}

#[tokio::test]
async fn e2e_chat_stream_emits_ndjson_ending_in_done() {
    let body = serde_json::json!({
        "userId": "web-1",
        "sessionId": "s1",
        "query": MIXED_QUERY,
    });
    let resp = router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat-stream")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/x-ndjson");

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    let (last, content) = lines.split_last().unwrap();
    assert!(content.iter().all(|l| l["type"] == "content"));
    assert_eq!(last["type"], "done");

    let streamed: String = content
        .iter()
        .map(|l| l["payload"].as_str().unwrap())
        .collect();
    // Streamed sections number their own sources; the final answer uses citation ids
    assert!(streamed.ends_with("Grow legumes for protein [1]."));
    let done = last["payload"]["response"].as_str().unwrap();
    assert!(done.ends_with("Grow legumes for protein [2]."));
    assert_eq!(
        done,
        streamed.replace("legumes for protein [1]", "legumes for protein [2]")
    );
    assert_eq!(last["payload"]["citations"][1]["domain"], "agriculture");
    assert_eq!(last["payload"]["sessionId"], "s1");
    assert_eq!(last["payload"]["citations"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn e2e_chat_rejects_empty_query() {
    let resp = router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"userId":"u1","query":"   "}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
