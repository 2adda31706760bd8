//! Caller-facing stream events and the final chat response.
//!
//! Serialized one per line for `/chat-stream`:
//! - `{"type":"content","payload":"..."}`: incremental answer text
//! - `{"type":"done","payload":{...}}`: the final `ChatResponse`
//! - `{"type":"error","payload":"..."}`: terminal failure

use ragdesk_core::citation::Citation;
use ragdesk_core::domain::DomainId;
use ragdesk_core::error::OrchestrationError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    Content(String),
    Done(ChatResponse),
    Error(String),
}

impl StreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Content(_) => "content",
            Self::Done(_) => "done",
            Self::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Content(_))
    }
}

/// The final result of a turn. Identical for the buffered and streaming endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub citations: Vec<Citation>,
    pub session_id: String,
    pub response_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_questions: Option<Vec<String>>,
    /// Specialists that contributed, primary first.
    #[serde(default)]
    pub domains: Vec<DomainId>,
    /// Some specialist failed, or classification fell back.
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub error: bool,
}

impl ChatResponse {
    /// Buffered-endpoint shape of a failed turn.
    pub fn failure(
        message: impl Into<String>,
        session_id: impl Into<String>,
        response_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            response: message.into(),
            citations: Vec::new(),
            session_id: session_id.into(),
            response_id: response_id.into(),
            user_id: user_id.into(),
            follow_up_questions: None,
            domains: Vec::new(),
            degraded: true,
            error: true,
        }
    }
}

/// Text shown to the caller for a terminal failure.
pub fn user_message(error: &OrchestrationError) -> String {
    match error {
        OrchestrationError::AllSpecialistsFailed { .. } => {
            "Sorry, none of the knowledge specialists could answer right now. Please try again shortly."
                .into()
        }
        OrchestrationError::DeadlineExceeded { timeout_secs } => format!(
            "Sorry, the answer took longer than {timeout_secs}s and was stopped. Please try again."
        ),
        OrchestrationError::StreamCancelled => "Request cancelled.".into(),
        other => format!("Sorry, the request could not be completed: {other}"),
    }
}
