//! Endpoint handlers.
//!
//! - `GET  /health`         liveness
//! - `GET  /status`         service status and configured domains
//! - `POST /chat`           buffered turn, returns the final `ChatResponse`
//! - `POST /chat-stream`    NDJSON `StreamEvent`s ending in `done` or `error`
//! - `POST /feedback`       rate a response (1-5)
//! - `POST /image-context`  attach an image description to the next turn

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use ragdesk_agent::{ChatRequest, ChatResponse};
use ragdesk_core::error::{FeedbackError, OrchestrationError};
use ragdesk_core::event::DomainEvent;
use ragdesk_core::feedback::FeedbackEntry;
use ragdesk_core::session::SessionKey;

use crate::SharedState;

pub const SERVICE_NAME: &str = "ragdesk";
pub const NDJSON: &str = "application/x-ndjson";

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn orchestration_error(e: OrchestrationError) -> ApiError {
    match e {
        OrchestrationError::InvalidRequest(message) => api_error(StatusCode::BAD_REQUEST, message),
        other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

// ── Probes ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: String,
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        service: SERVICE_NAME.into(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub service: String,
    pub status: String,
    pub version: String,
    pub domains: Vec<String>,
    pub generation_configured: bool,
    pub retrieval_configured: bool,
    pub active_sessions: usize,
    pub uptime_secs: u64,
    pub timestamp: String,
}

pub async fn status_handler(State(state): State<SharedState>) -> Json<StatusResponse> {
    let config = &state.config;
    let uptime = Utc::now()
        .signed_duration_since(state.start_time)
        .num_seconds()
        .max(0) as u64;

    Json(StatusResponse {
        service: SERVICE_NAME.into(),
        status: "running".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        domains: config.domains.iter().map(|d| d.id.clone()).collect(),
        generation_configured: config.generation.api_key.is_some()
            || config.generation.api_url.is_some(),
        retrieval_configured: config.retrieval.api_url.is_some(),
        active_sessions: state.orchestrator.sessions().len(),
        uptime_secs: uptime,
        timestamp: Utc::now().to_rfc3339(),
    })
}

// ── Chat ──────────────────────────────────────────────────────────────────

/// `POST /chat`: run the turn and return only the final payload.
pub async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    info!(user_id = %payload.user_id, "chat request");
    let response = state
        .orchestrator
        .handle(payload)
        .await
        .map_err(orchestration_error)?;
    Ok(Json(response))
}

/// `POST /chat-stream`: one JSON `StreamEvent` per line.
///
/// When the client disconnects the body stream is dropped, which drops the
/// event receiver and cancels the turn.
pub async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    info!(user_id = %payload.user_id, "chat-stream request");
    let rx = state
        .orchestrator
        .handle_stream(payload)
        .map_err(orchestration_error)?;

    let lines = ReceiverStream::new(rx).map(|event| {
        let mut line = serde_json::to_string(&event).unwrap_or_default();
        line.push('\n');
        Ok::<_, Infallible>(line)
    });

    Ok((
        [
            (header::CONTENT_TYPE, NDJSON),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response())
}

// ── Feedback ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub user_id: String,
    pub response_id: String,
    pub rating: u8,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackResponse {
    pub message: String,
    pub feedback_id: String,
}

pub async fn feedback_handler(
    State(state): State<SharedState>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    if payload.user_id.trim().is_empty() || payload.response_id.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "userId and responseId are required",
        ));
    }
    let rating = FeedbackEntry::validate_rating(payload.rating)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let feedback_id = Uuid::new_v4().to_string();
    let entry = FeedbackEntry {
        feedback_id: feedback_id.clone(),
        user_id: payload.user_id,
        response_id: payload.response_id.clone(),
        rating,
        comment: payload.feedback.filter(|c| !c.trim().is_empty()),
        timestamp: Utc::now(),
    };

    state.feedback.store(entry).await.map_err(|e| match e {
        FeedbackError::InvalidRating(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        FeedbackError::Storage(_) => {
            warn!(error = %e, "Feedback storage failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store feedback")
        }
    })?;

    info!(response_id = %payload.response_id, rating, "Feedback recorded");
    state
        .orchestrator
        .events()
        .publish(DomainEvent::FeedbackSubmitted {
            response_id: payload.response_id,
            rating,
            timestamp: Utc::now(),
        });

    Ok(Json(FeedbackResponse {
        message: "Feedback submitted successfully".into(),
        feedback_id,
    }))
}

// ── Image context ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContextRequest {
    pub user_id: String,
    pub session_id: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContextResponse {
    pub message: String,
    pub session_id: String,
}

pub async fn image_context_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ImageContextRequest>,
) -> Result<Json<ImageContextResponse>, ApiError> {
    let description = payload.description.trim();
    if payload.user_id.trim().is_empty()
        || payload.session_id.trim().is_empty()
        || description.is_empty()
    {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "userId, sessionId and description are required",
        ));
    }

    let key = SessionKey::new(payload.user_id.trim(), payload.session_id.trim());
    state
        .orchestrator
        .sessions()
        .set_image_context(&key, description);
    info!(session = %key, chars = description.len(), "Image context attached");

    Ok(Json(ImageContextResponse {
        message: "Image context will be used for the next question".into(),
        session_id: key.session_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use ragdesk_agent::{Orchestrator, StreamEvent};
    use ragdesk_config::AppConfig;
    use ragdesk_core::error::{ProviderError, RetrievalError};
    use ragdesk_core::event::EventBus;
    use ragdesk_core::generation::{GenerationRequest, GenerationResponse, GenerationService};
    use ragdesk_core::retrieval::{KnowledgeRetriever, RetrievalRequest, RetrievedDocument};
    use ragdesk_memory::{InMemoryFeedbackStore, SessionStore, TracingTurnLog};
    use tower::ServiceExt;

    use crate::{GatewayState, build_router};

    /// Answers every specialist with the same cited sentence.
    struct MockGenerator;

    #[async_trait]
    impl GenerationService for MockGenerator {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        async fn complete(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
            Ok(GenerationResponse {
                text: "Mock answer [1].".into(),
                usage: None,
                model: request.model,
            })
        }
    }

    struct MockRetriever;

    #[async_trait]
    impl KnowledgeRetriever for MockRetriever {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        async fn retrieve(&self, request: RetrievalRequest) -> Result<Vec<RetrievedDocument>, RetrievalError> {
            Ok(vec![RetrievedDocument {
                source_locator: format!("s3://{}/guide.pdf", request.corpus_id),
                text: "Reference text.".into(),
                score: 0.8,
            }])
        }
    }

    fn test_state() -> SharedState {
        let config = AppConfig::default();
        let orchestrator = Arc::new(Orchestrator::new(
            &config,
            Arc::new(MockGenerator),
            Arc::new(MockRetriever),
            Arc::new(SessionStore::with_limits(3600, 20)),
            Arc::new(TracingTurnLog),
            Arc::new(EventBus::default()),
        ));
        GatewayState::new(config, orchestrator, Arc::new(InMemoryFeedbackStore::new()))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.service, SERVICE_NAME);
    }

    #[tokio::test]
    async fn status_lists_domains() {
        let app = build_router(test_state());
        let req = Request::builder().uri("/status").body(Body::empty()).unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status: StatusResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(status.status, "running");
        assert!(status.domains.contains(&"tuberculosis".to_string()));
        assert!(!status.retrieval_configured);
        assert_eq!(status.active_sessions, 0);
    }

    #[tokio::test]
    async fn chat_returns_buffered_response() {
        let app = build_router(test_state());
        let req = post_json(
            "/chat",
            serde_json::json!({"query": "What are TB symptoms?", "userId": "u1", "sessionId": "s1"}),
        );

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let chat: ChatResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(chat.response, "Mock answer [1].");
        assert_eq!(chat.session_id, "s1");
        assert_eq!(chat.citations.len(), 1);
        assert_eq!(chat.citations[0].source, "s3://tb-knowledge-base/guide.pdf");
        assert!(!chat.error);
    }

    #[tokio::test]
    async fn chat_rejects_empty_query() {
        let app = build_router(test_state());
        let req = post_json("/chat", serde_json::json!({"query": "  ", "userId": "u1"}));

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(err.error.contains("query"));
    }

    #[tokio::test]
    async fn chat_stream_emits_ndjson_ending_in_done() {
        let app = build_router(test_state());
        let req = post_json(
            "/chat-stream",
            serde_json::json!({"query": "How does nutrition affect TB treatment outcomes?", "userId": "u1"}),
        );

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], NDJSON);

        let body = String::from_utf8(body_bytes(response).await).unwrap();
        let events: Vec<StreamEvent> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert!(matches!(events.first(), Some(StreamEvent::Content(_))));
        let Some(StreamEvent::Done(done)) = events.last() else {
            panic!("stream did not end with done: {body}");
        };
        assert_eq!(done.domains.len(), 2);
        assert!(done.response.contains("**TB & Health**"));
    }

    #[tokio::test]
    async fn chat_stream_rejects_missing_user() {
        let app = build_router(test_state());
        let req = post_json("/chat-stream", serde_json::json!({"query": "TB?"}));
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn feedback_is_stored() {
        let state = test_state();
        let app = build_router(Arc::clone(&state));
        let req = post_json(
            "/feedback",
            serde_json::json!({"userId": "u1", "responseId": "r1", "rating": 5, "feedback": "great"}),
        );

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: FeedbackResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(!body.feedback_id.is_empty());
        assert_eq!(state.feedback.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn feedback_rating_out_of_range() {
        let app = build_router(test_state());
        let req = post_json(
            "/feedback",
            serde_json::json!({"userId": "u1", "responseId": "r1", "rating": 0}),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn image_context_is_attached_to_session() {
        let state = test_state();
        let app = build_router(Arc::clone(&state));
        let req = post_json(
            "/image-context",
            serde_json::json!({"userId": "u1", "sessionId": "s1", "description": "leaf with spots"}),
        );

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session = state
            .orchestrator
            .sessions()
            .get(&SessionKey::new("u1", "s1"));
        assert_eq!(session.image_context.as_deref(), Some("leaf with spots"));
    }

    #[tokio::test]
    async fn image_context_requires_description() {
        let app = build_router(test_state());
        let req = post_json(
            "/image-context",
            serde_json::json!({"userId": "u1", "sessionId": "s1", "description": ""}),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
