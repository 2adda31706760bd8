//! Stream assembler: turns specialist lanes into caller-facing events.
//!
//! ```text
//! Idle ──first visible text──▶ Streaming ──all lanes ended──▶ Finalizing ──▶ Done
//!   │                              │                              │
//!   └──────────────────────────────┴──────────────────────────────┴──▶ Failed
//! ```
//!
//! Lanes are drained in priority order. Later lanes keep running and buffer
//! into their unbounded channels while an earlier lane streams, so mixed
//! answers are concatenated rather than interleaved without serializing the
//! specialist calls themselves.
//!
//! Streamed content is provisional. The final answer is rebuilt from the
//! sections of successful lanes only, with each lane's prompt-local `[n]`
//! markers rewritten to the aggregated citation ids.

use std::time::Duration;

use ragdesk_core::citation::{Citation, RetrievedPassage};
use ragdesk_core::domain::DomainId;
use ragdesk_core::error::OrchestrationError;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::citations::renumber_markers;
use crate::filter::ReasoningFilter;
use crate::specialist::{SpecialistEvent, referenced_passages};
use crate::stream_event::{ChatResponse, StreamEvent, user_message};

const SECTION_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Idle,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

impl AssemblerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use AssemblerState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Idle, Streaming) | (Idle, Finalizing) => true,
            (Streaming, Finalizing) => true,
            (Finalizing, Done) => true,
            _ => false,
        }
    }
}

/// One specialist's event feed, in priority position.
pub struct Lane {
    pub domain: DomainId,
    /// Section heading shown before the lane's first visible text.
    pub heading: Option<String>,
    pub events: mpsc::UnboundedReceiver<SpecialistEvent>,
}

/// Visible text of one successful lane.
#[derive(Debug, Clone)]
pub struct Section {
    pub domain: DomainId,
    pub heading: Option<String>,
    pub body: String,
    /// Sources in the order the specialist's prompt numbered them.
    pub prompt_passages: Vec<RetrievedPassage>,
}

/// Everything the lanes produced.
#[derive(Debug, Default)]
pub struct Consumed {
    pub sections: Vec<Section>,
    /// Referenced passages of successful lanes only.
    pub passages: Vec<RetrievedPassage>,
    pub succeeded: Vec<DomainId>,
    pub failed: Vec<(DomainId, String)>,
}

impl Consumed {
    /// Final answer text: successful sections in priority order, markers
    /// pointing at `citations` ids.
    pub fn compose(&self, citations: &[Citation]) -> String {
        let mut text = String::new();
        for section in self.sections.iter().filter(|s| !s.body.is_empty()) {
            if !text.is_empty() {
                text.push_str(SECTION_SEPARATOR);
            }
            if let Some(heading) = &section.heading {
                text.push_str(&format!("**{heading}**{SECTION_SEPARATOR}"));
            }
            text.push_str(&renumber_markers(
                &section.body,
                &section.prompt_passages,
                citations,
            ));
        }
        text
    }
}

pub struct StreamAssembler {
    state: AssemblerState,
    out: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    deadline: Instant,
    timeout_secs: u64,
    text: String,
}

impl StreamAssembler {
    pub fn new(out: mpsc::Sender<StreamEvent>, cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            state: AssemblerState::Idle,
            out,
            cancel,
            deadline: Instant::now() + timeout,
            timeout_secs: timeout.as_secs(),
            text: String::new(),
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    fn transition(&mut self, next: AssemblerState) {
        if self.state.can_transition_to(next) {
            debug!(from = ?self.state, to = ?next, "Assembler transition");
            self.state = next;
        } else if self.state != next {
            warn!(from = ?self.state, to = ?next, "Ignoring invalid assembler transition");
        }
    }

    fn deadline_exceeded(&self) -> OrchestrationError {
        self.cancel.cancel();
        OrchestrationError::DeadlineExceeded {
            timeout_secs: self.timeout_secs,
        }
    }

    fn caller_gone(&self) -> OrchestrationError {
        self.cancel.cancel();
        OrchestrationError::StreamCancelled
    }

    async fn emit(&mut self, text: String) -> Result<(), OrchestrationError> {
        if text.is_empty() {
            return Ok(());
        }
        self.transition(AssemblerState::Streaming);
        self.text.push_str(&text);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OrchestrationError::StreamCancelled),
            _ = sleep_until(self.deadline) => Err(self.deadline_exceeded()),
            sent = self.out.send(StreamEvent::Content(text)) => sent.map_err(|_| self.caller_gone()),
        }
    }

    /// Emit visible lane text, opening the lane's section on first output.
    async fn emit_section(
        &mut self,
        lane_heading: Option<&str>,
        opened: &mut bool,
        visible: String,
    ) -> Result<(), OrchestrationError> {
        let visible = if *opened {
            visible
        } else {
            let trimmed = visible.trim_start();
            if trimmed.is_empty() {
                return Ok(());
            }
            *opened = true;
            let mut prefix = String::new();
            if !self.text.is_empty() {
                prefix.push_str(SECTION_SEPARATOR);
            }
            if let Some(heading) = lane_heading {
                prefix.push_str(&format!("**{heading}**{SECTION_SEPARATOR}"));
            }
            format!("{prefix}{trimmed}")
        };
        self.emit(visible).await
    }

    /// Drain every lane in order, forwarding filtered text as it arrives.
    pub async fn consume(&mut self, lanes: Vec<Lane>) -> Result<Consumed, OrchestrationError> {
        let attempted: Vec<String> = lanes.iter().map(|l| l.domain.to_string()).collect();
        let mut consumed = Consumed::default();

        for mut lane in lanes {
            let mut filter = ReasoningFilter::default();
            let mut section = String::new();
            let mut opened = false;

            let outcome = loop {
                let event = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(OrchestrationError::StreamCancelled),
                    _ = sleep_until(self.deadline) => return Err(self.deadline_exceeded()),
                    _ = self.out.closed() => return Err(self.caller_gone()),
                    event = lane.events.recv() => event,
                };

                match event {
                    Some(SpecialistEvent::Token(raw)) => {
                        let visible = filter.push(&raw);
                        section.push_str(&visible);
                        self.emit_section(lane.heading.as_deref(), &mut opened, visible)
                            .await?;
                    }
                    Some(SpecialistEvent::Finished { passages }) => {
                        let tail = filter.finish();
                        section.push_str(&tail);
                        self.emit_section(lane.heading.as_deref(), &mut opened, tail)
                            .await?;
                        let referenced = referenced_passages(&section, &passages);
                        break Ok((referenced, passages));
                    }
                    Some(SpecialistEvent::Failed { reason }) => break Err(reason),
                    None => break Err("specialist ended without a result".to_string()),
                }
            };

            match outcome {
                Ok((referenced, prompt_passages)) => {
                    debug!(domain = %lane.domain, passages = referenced.len(), "Specialist finished");
                    consumed.passages.extend(referenced);
                    consumed.sections.push(Section {
                        domain: lane.domain.clone(),
                        heading: lane.heading,
                        body: section.trim().to_string(),
                        prompt_passages,
                    });
                    consumed.succeeded.push(lane.domain);
                }
                Err(reason) => {
                    warn!(domain = %lane.domain, %reason, "Specialist degraded");
                    consumed.failed.push((lane.domain, reason));
                }
            }
        }

        if consumed.succeeded.is_empty() {
            return Err(OrchestrationError::AllSpecialistsFailed { attempted });
        }
        self.transition(AssemblerState::Finalizing);
        Ok(consumed)
    }

    /// Deliver the final response. `persist` runs only once delivery is
    /// guaranteed, and before the caller can observe `done`.
    pub async fn complete(
        &mut self,
        response: ChatResponse,
        persist: impl FnOnce(&ChatResponse),
    ) -> Result<(), OrchestrationError> {
        let out = self.out.clone();
        let permit = tokio::select! {
            biased;
            _ = sleep_until(self.deadline) => return Err(self.deadline_exceeded()),
            permit = out.reserve() => permit.map_err(|_| self.caller_gone())?,
        };
        persist(&response);
        self.transition(AssemblerState::Done);
        permit.send(StreamEvent::Done(response));
        Ok(())
    }

    /// Terminal failure: stop all specialists and tell the caller, if still there.
    pub async fn fail(&mut self, error: &OrchestrationError) {
        self.cancel.cancel();
        self.transition(AssemblerState::Failed);
        if error.is_cancellation() {
            return;
        }
        let _ = self.out.send(StreamEvent::Error(user_message(error))).await;
    }
}
