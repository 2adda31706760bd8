//! Specialist client: one domain's retrieval + generation pipeline.
//!
//! A specialist retrieves passages from its domain corpus, builds a
//! generation request around the domain's system instructions, and streams
//! raw tokens back as [`SpecialistEvent`]s. Reasoning suppression and
//! section assembly happen downstream in the stream assembler.

use std::sync::Arc;

use ragdesk_config::DomainConfig;
use ragdesk_core::citation::{RetrievedPassage, truncate_excerpt};
use ragdesk_core::domain::DomainId;
use ragdesk_core::error::OrchestrationError;
use ragdesk_core::generation::{GenerationRequest, GenerationService};
use ragdesk_core::retrieval::{KnowledgeRetriever, RetrievalRequest};
use ragdesk_core::session::SessionContext;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::build_messages;
use crate::filter::ReasoningFilter;

/// Static description of a specialist domain.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialistProfile {
    pub domain: DomainId,
    pub display_name: String,
    /// `None` means the specialist answers without retrieval.
    pub corpus_id: Option<String>,
    pub system_prompt: String,
}

impl From<&DomainConfig> for SpecialistProfile {
    fn from(config: &DomainConfig) -> Self {
        Self {
            domain: DomainId::new(&config.id),
            display_name: config.display_name.clone(),
            corpus_id: config.corpus_id.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }
}

/// Generation and retrieval parameters shared by all specialists.
#[derive(Debug, Clone)]
pub struct SpecialistSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_k: usize,
    pub excerpt_max_chars: usize,
    pub history_char_budget: usize,
}

/// What a running specialist reports to the stream assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecialistEvent {
    /// Raw generated text, possibly containing reasoning markup.
    Token(String),
    /// Generation finished; every passage that was put in the prompt.
    Finished { passages: Vec<RetrievedPassage> },
    /// Retrieval or generation failed, or the call timed out.
    Failed { reason: String },
}

/// Buffered result of one specialist call.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialistResult {
    pub domain: DomainId,
    pub text: String,
    /// Passages the text actually cites.
    pub passages: Vec<RetrievedPassage>,
}

#[derive(Clone)]
pub struct SpecialistClient {
    generator: Arc<dyn GenerationService>,
    retriever: Arc<dyn KnowledgeRetriever>,
    settings: SpecialistSettings,
}

impl SpecialistClient {
    pub fn new(
        generator: Arc<dyn GenerationService>,
        retriever: Arc<dyn KnowledgeRetriever>,
        settings: SpecialistSettings,
    ) -> Self {
        Self {
            generator,
            retriever,
            settings,
        }
    }

    fn unavailable(profile: &SpecialistProfile, reason: impl ToString) -> OrchestrationError {
        OrchestrationError::SpecialistUnavailable {
            domain: profile.domain.to_string(),
            reason: reason.to_string(),
        }
    }

    async fn retrieve(
        &self,
        profile: &SpecialistProfile,
        query: &str,
    ) -> Result<Vec<RetrievedPassage>, OrchestrationError> {
        let Some(corpus_id) = &profile.corpus_id else {
            return Ok(Vec::new());
        };

        let documents = self
            .retriever
            .retrieve(RetrievalRequest {
                corpus_id: corpus_id.clone(),
                query: query.to_string(),
                top_k: self.settings.top_k,
            })
            .await
            .map_err(|e| Self::unavailable(profile, e))?;

        debug!(domain = %profile.domain, count = documents.len(), "Retrieved passages");
        Ok(documents
            .into_iter()
            .take(self.settings.top_k)
            .map(|doc| RetrievedPassage {
                source_locator: doc.source_locator,
                excerpt: truncate_excerpt(&doc.text, self.settings.excerpt_max_chars),
                score: doc.score,
                domain: profile.domain.clone(),
            })
            .collect())
    }

    /// Run the specialist, forwarding raw tokens to `events`.
    ///
    /// On success the last event sent is `Finished`. Errors are returned,
    /// not sent; the caller decides how to report them. A closed `events`
    /// channel stops the call with `StreamCancelled`, which also drops the
    /// generation stream.
    pub async fn answer_streaming(
        &self,
        profile: &SpecialistProfile,
        query: &str,
        context: &SessionContext,
        events: &mpsc::UnboundedSender<SpecialistEvent>,
    ) -> Result<(), OrchestrationError> {
        let passages = self.retrieve(profile, query).await?;

        let messages = build_messages(
            &profile.system_prompt,
            &passages,
            &context.recent_turns,
            self.settings.history_char_budget,
            query,
            context.image_context.as_deref(),
        );
        let mut request = GenerationRequest::new(&self.settings.model, messages);
        request.temperature = self.settings.temperature;
        request.max_tokens = Some(self.settings.max_tokens);
        request.stream = true;

        let mut tokens = self
            .generator
            .stream(request)
            .await
            .map_err(|e| Self::unavailable(profile, e))?;

        while let Some(chunk) = tokens.recv().await {
            let chunk = chunk.map_err(|e| Self::unavailable(profile, e))?;
            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                events
                    .send(SpecialistEvent::Token(text))
                    .map_err(|_| OrchestrationError::StreamCancelled)?;
            }
            if chunk.done {
                break;
            }
        }

        events
            .send(SpecialistEvent::Finished { passages })
            .map_err(|_| OrchestrationError::StreamCancelled)
    }

    /// Buffered variant: the filtered answer and the passages it references.
    pub async fn answer(
        &self,
        profile: &SpecialistProfile,
        query: &str,
        context: &SessionContext,
    ) -> Result<SpecialistResult, OrchestrationError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.answer_streaming(profile, query, context, &tx).await?;
        drop(tx);

        let mut raw = String::new();
        let mut passages = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                SpecialistEvent::Token(t) => raw.push_str(&t),
                SpecialistEvent::Finished { passages: p } => passages = p,
                SpecialistEvent::Failed { reason } => {
                    warn!(domain = %profile.domain, %reason, "Specialist reported failure");
                    return Err(Self::unavailable(profile, reason));
                }
            }
        }

        let text = ReasoningFilter::strip(&raw).trim().to_string();
        let passages = referenced_passages(&text, &passages);
        Ok(SpecialistResult {
            domain: profile.domain.clone(),
            text,
            passages,
        })
    }
}

/// Passages whose `[n]` marker (1-based prompt order) appears in `text`.
/// Falls back to all passages when the text cites none.
pub fn referenced_passages(text: &str, passages: &[RetrievedPassage]) -> Vec<RetrievedPassage> {
    let cited: Vec<RetrievedPassage> = passages
        .iter()
        .enumerate()
        .filter(|(i, _)| text.contains(&format!("[{}]", i + 1)))
        .map(|(_, p)| p.clone())
        .collect();
    if cited.is_empty() {
        passages.to_vec()
    } else {
        cited
    }
}
