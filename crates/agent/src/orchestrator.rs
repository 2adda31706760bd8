//! The request façade: classify, fan out to specialists, assemble, persist.
//!
//! Every request runs on its own task. The streaming endpoint gets the
//! event receiver directly; the buffered endpoint drains the same receiver
//! and keeps only the final payload, so both deliver identical content.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ragdesk_config::AppConfig;
use ragdesk_core::domain::DomainId;
use ragdesk_core::error::OrchestrationError;
use ragdesk_core::event::{DomainEvent, EventBus};
use ragdesk_core::feedback::{TurnLogSink, TurnRecord};
use ragdesk_core::generation::GenerationService;
use ragdesk_core::message::Turn;
use ragdesk_core::retrieval::KnowledgeRetriever;
use ragdesk_core::session::{SessionContext, SessionKey};
use ragdesk_memory::SessionStore;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assembler::{Lane, StreamAssembler};
use crate::citations::CitationAggregator;
use crate::classifier::DomainClassifier;
use crate::context::estimate_tokens;
use crate::followup::FollowUpGenerator;
use crate::specialist::{SpecialistClient, SpecialistEvent, SpecialistProfile, SpecialistSettings};
use crate::stream_event::{ChatResponse, StreamEvent, user_message};

/// Events buffered between the assembler and a slow caller.
const STREAM_BUFFER: usize = 64;

/// Inbound body of `/chat` and `/chat-stream`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Description of an uploaded image, used by this turn only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_context: Option<String>,
}

impl ChatRequest {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A validated request with its identifiers assigned.
#[derive(Debug, Clone)]
struct PreparedTurn {
    key: SessionKey,
    query: String,
    response_id: String,
    image_context: Option<String>,
}

#[derive(Debug, Clone)]
struct OrchestratorSettings {
    history_turns: usize,
    max_query_tokens: usize,
    specialist_timeout: Duration,
    request_timeout: Duration,
    section_headings: bool,
}

pub struct Orchestrator {
    classifier: DomainClassifier,
    specialists: SpecialistClient,
    /// Specialist profile per configured domain.
    profiles: HashMap<DomainId, SpecialistProfile>,
    aggregator: CitationAggregator,
    follow_ups: Option<FollowUpGenerator>,
    sessions: Arc<SessionStore>,
    turn_log: Arc<dyn TurnLogSink>,
    events: Arc<EventBus>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        generator: Arc<dyn GenerationService>,
        retriever: Arc<dyn KnowledgeRetriever>,
        sessions: Arc<SessionStore>,
        turn_log: Arc<dyn TurnLogSink>,
        events: Arc<EventBus>,
    ) -> Self {
        let orch = &config.orchestrator;
        let specialists = SpecialistClient::new(
            Arc::clone(&generator),
            retriever,
            SpecialistSettings {
                model: config.generation.model.clone(),
                temperature: config.generation.temperature,
                max_tokens: config.generation.max_tokens,
                top_k: config.retrieval.top_k,
                excerpt_max_chars: orch.excerpt_max_chars,
                history_char_budget: orch.history_char_budget,
            },
        );
        let follow_ups = config.follow_ups.enabled.then(|| {
            FollowUpGenerator::new(
                generator,
                config.generation.model.clone(),
                config.follow_ups.count,
                Duration::from_secs(config.follow_ups.timeout_secs),
            )
        });

        Self {
            classifier: DomainClassifier::from_config(config),
            specialists,
            profiles: config
                .domains
                .iter()
                .map(|d| (DomainId::new(&d.id), SpecialistProfile::from(d)))
                .collect(),
            aggregator: CitationAggregator::new(orch.max_citations, orch.excerpt_max_chars),
            follow_ups,
            sessions,
            turn_log,
            events,
            settings: OrchestratorSettings {
                history_turns: orch.history_turns,
                max_query_tokens: orch.max_query_tokens,
                specialist_timeout: Duration::from_secs(orch.specialist_timeout_secs),
                request_timeout: Duration::from_secs(orch.request_timeout_secs),
                section_headings: orch.section_headings,
            },
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn classifier(&self) -> &DomainClassifier {
        &self.classifier
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    fn prepare(&self, request: ChatRequest) -> Result<PreparedTurn, OrchestrationError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(OrchestrationError::InvalidRequest("query must not be empty".into()));
        }
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(OrchestrationError::InvalidRequest("userId must not be empty".into()));
        }
        let tokens = estimate_tokens(query);
        if tokens > self.settings.max_query_tokens {
            return Err(OrchestrationError::InvalidRequest(format!(
                "query is too long: about {tokens} tokens (max {})",
                self.settings.max_query_tokens
            )));
        }

        let session_id = request
            .session_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(PreparedTurn {
            key: SessionKey::new(user_id, session_id),
            query: query.to_string(),
            response_id: Uuid::new_v4().to_string(),
            image_context: request
                .image_context
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }

    /// Start a turn and return its event stream.
    ///
    /// Dropping the receiver cancels the turn: running specialists stop and
    /// nothing is persisted.
    pub fn handle_stream(
        self: &Arc<Self>,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, OrchestrationError> {
        let turn = self.prepare(request)?;
        Ok(self.spawn_turn(turn))
    }

    /// Run a turn to completion and return only the final response.
    pub async fn handle(self: &Arc<Self>, request: ChatRequest) -> Result<ChatResponse, OrchestrationError> {
        let turn = self.prepare(request)?;
        let (session_id, response_id, user_id) = (
            turn.key.session_id.clone(),
            turn.response_id.clone(),
            turn.key.user_id.clone(),
        );

        let mut events = self.spawn_turn(turn);
        let mut failure = None;
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Content(_) => {}
                StreamEvent::Done(response) => return Ok(response),
                StreamEvent::Error(message) => failure = Some(message),
            }
        }

        let message =
            failure.unwrap_or_else(|| user_message(&OrchestrationError::StreamCancelled));
        Ok(ChatResponse::failure(message, session_id, response_id, user_id))
    }

    fn spawn_turn(self: &Arc<Self>, turn: PreparedTurn) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(turn, tx).await });
        rx
    }

    async fn run(&self, turn: PreparedTurn, out: mpsc::Sender<StreamEvent>) {
        let cancel = CancellationToken::new();
        // Outstanding specialists stop whenever this task ends
        let _guard = cancel.clone().drop_guard();
        let mut assembler = StreamAssembler::new(out, cancel.clone(), self.settings.request_timeout);

        let Err(err) = self.execute(&turn, &mut assembler, &cancel).await else {
            return;
        };
        assembler.fail(&err).await;

        let cancelled = err.is_cancellation();
        if cancelled {
            info!(session = %turn.key, response_id = %turn.response_id, "Request cancelled by caller");
        } else {
            warn!(session = %turn.key, response_id = %turn.response_id, error = %err, "Request failed");
        }
        self.events.publish(DomainEvent::RequestFailed {
            session_id: turn.key.session_id.clone(),
            reason: err.to_string(),
            cancelled,
            timestamp: Utc::now(),
        });
    }

    async fn execute(
        &self,
        turn: &PreparedTurn,
        assembler: &mut StreamAssembler,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestrationError> {
        if let Some(image) = &turn.image_context {
            self.sessions.set_image_context(&turn.key, image.clone());
        }
        let context = self
            .sessions
            .begin_turn(&turn.key, self.settings.history_turns);
        let had_image_context = context.image_context.is_some();

        let decision = self.classifier.classify(&turn.query, &context.recent_turns);
        let profiles: Vec<SpecialistProfile> = decision
            .active_domains()
            .into_iter()
            .filter_map(|d| {
                let profile = self.profiles.get(&d).cloned();
                if profile.is_none() {
                    warn!(domain = %d, "No specialist configured for domain");
                }
                profile
            })
            .collect();
        debug!(
            session = %turn.key,
            domains = ?profiles.iter().map(|p| p.domain.as_str()).collect::<Vec<_>>(),
            "Dispatching specialists"
        );

        let headings = self.settings.section_headings && profiles.len() > 1;
        let lanes = profiles
            .into_iter()
            .enumerate()
            .map(|(i, profile)| {
                // Image context goes to the primary specialist only
                let lane_context = if i == 0 {
                    context.clone()
                } else {
                    SessionContext {
                        recent_turns: context.recent_turns.clone(),
                        image_context: None,
                    }
                };
                self.dispatch(profile, &turn.query, lane_context, cancel, headings)
            })
            .collect();

        let consumed = assembler.consume(lanes).await?;
        for (domain, reason) in &consumed.failed {
            self.events.publish(DomainEvent::SpecialistDegraded {
                domain: domain.to_string(),
                reason: reason.clone(),
                timestamp: Utc::now(),
            });
        }

        let citations = self.aggregator.aggregate(&consumed.passages);
        let text = consumed.compose(&citations);
        let follow_up_questions = match &self.follow_ups {
            Some(generator) => Some(
                generator
                    .generate(&turn.query, &text, &context.recent_turns)
                    .await,
            ),
            None => None,
        };

        let response = ChatResponse {
            response: text,
            citations,
            session_id: turn.key.session_id.clone(),
            response_id: turn.response_id.clone(),
            user_id: turn.key.user_id.clone(),
            follow_up_questions,
            domains: consumed.succeeded,
            degraded: decision.degraded || !consumed.failed.is_empty(),
            error: false,
        };

        assembler
            .complete(response, |r| self.persist(turn, r, had_image_context))
            .await
    }

    /// Start one specialist on its own task and return its lane.
    fn dispatch(
        &self,
        profile: SpecialistProfile,
        query: &str,
        context: SessionContext,
        cancel: &CancellationToken,
        heading: bool,
    ) -> Lane {
        let (tx, rx) = mpsc::unbounded_channel();
        let lane = Lane {
            domain: profile.domain.clone(),
            heading: heading.then(|| profile.display_name.clone()),
            events: rx,
        };

        let client = self.specialists.clone();
        let query = query.to_string();
        let stop = cancel.child_token();
        let timeout = self.settings.specialist_timeout;
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = stop.cancelled() => {
                    debug!(domain = %profile.domain, "Specialist cancelled");
                    return;
                }
                outcome = tokio::time::timeout(
                    timeout,
                    client.answer_streaming(&profile, &query, &context, &tx),
                ) => outcome,
            };
            let reason = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) if e.is_cancellation() => return,
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {}s", timeout.as_secs()),
            };
            let _ = tx.send(SpecialistEvent::Failed { reason });
        });
        lane
    }

    fn persist(&self, turn: &PreparedTurn, response: &ChatResponse, had_image_context: bool) {
        self.sessions.append_exchange(
            &turn.key,
            Turn::user(&turn.query),
            Turn::assistant(&response.response, response.citations.clone()),
        );

        let record = TurnRecord {
            user_id: turn.key.user_id.clone(),
            session_id: turn.key.session_id.clone(),
            response_id: turn.response_id.clone(),
            query: turn.query.clone(),
            response: response.response.clone(),
            domains: response.domains.iter().map(ToString::to_string).collect(),
            citation_sources: response.citations.iter().map(|c| c.source.clone()).collect(),
            degraded: response.degraded,
            had_image_context,
            timestamp: Utc::now(),
        };
        let sink = Arc::clone(&self.turn_log);
        tokio::spawn(async move {
            if let Err(e) = sink.record(record).await {
                warn!(error = %e, "Turn log delivery failed");
            }
        });

        info!(
            session = %turn.key,
            response_id = %turn.response_id,
            citations = response.citations.len(),
            degraded = response.degraded,
            "Turn completed"
        );
        self.events.publish(DomainEvent::TurnCompleted {
            user_id: turn.key.user_id.clone(),
            session_id: turn.key.session_id.clone(),
            response_id: turn.response_id.clone(),
            domains: response.domains.iter().map(ToString::to_string).collect(),
            citation_count: response.citations.len(),
            degraded: response.degraded,
            timestamp: Utc::now(),
        });
    }
}
