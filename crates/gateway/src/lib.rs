//! HTTP gateway for RagDesk.
//!
//! Exposes the chat endpoints (buffered and NDJSON streaming), feedback and
//! image-context intake, and liveness/status probes.
//!
//! Built on Axum for high performance async HTTP.

pub mod api;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use ragdesk_agent::Orchestrator;
use ragdesk_config::AppConfig;
use ragdesk_core::event::EventBus;
use ragdesk_core::feedback::FeedbackStore;
use ragdesk_memory::{InMemoryFeedbackStore, SessionStore, TracingTurnLog};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub start_time: DateTime<Utc>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(
        config: AppConfig,
        orchestrator: Arc<Orchestrator>,
        feedback: Arc<dyn FeedbackStore>,
    ) -> SharedState {
        Arc::new(Self {
            config,
            orchestrator,
            feedback,
            start_time: Utc::now(),
        })
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - Request body size limit (`gateway.max_body_bytes`)
/// - CORS (any origin unless `gateway.cors_origins` is set)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.config.gateway.max_body_bytes;
    let cors = cors_layer(&state.config.gateway.cors_origins);

    Router::new()
        .route("/health", get(api::health_handler))
        .route("/status", get(api::status_handler))
        .route("/chat", post(api::chat_handler))
        .route("/chat-stream", post(api::chat_stream_handler))
        .route("/feedback", post(api::feedback_handler))
        .route("/image-context", post(api::image_context_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Wire the production collaborators from configuration.
pub fn build_state(config: AppConfig, events: Arc<EventBus>, sessions: Arc<SessionStore>) -> SharedState {
    let generator = ragdesk_providers::factory::build_generator(&config);
    let retriever = ragdesk_providers::factory::build_retriever(&config);
    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        generator,
        retriever,
        sessions,
        Arc::new(TracingTurnLog),
        events,
    ));
    GatewayState::new(config, orchestrator, Arc::new(InMemoryFeedbackStore::new()))
}

/// Start the gateway HTTP server and the session sweeper.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let events = Arc::new(EventBus::default());
    let sessions = Arc::new(SessionStore::with_limits(
        config.session.ttl_secs,
        config.session.max_turns,
    ));
    let sweeper = sessions.spawn_sweeper(
        Duration::from_secs(config.session.sweep_interval_secs),
        Some(Arc::clone(&events)),
    );

    let domains: Vec<&str> = config.domains.iter().map(|d| d.id.as_str()).collect();
    info!(
        addr = %addr,
        domains = ?domains,
        model = %config.generation.model,
        session_ttl_secs = config.session.ttl_secs,
        "Gateway starting"
    );
    let app = build_router(build_state(config.clone(), events, sessions));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app).await;
    sweeper.abort();
    served?;

    Ok(())
}
