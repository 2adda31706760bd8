//! The orchestration core of RagDesk.
//!
//! A turn flows through the pipeline like this:
//!
//! 1. **Classify** the query (plus recent user turns) into one or more domains
//! 2. **Dispatch** one specialist per domain, in parallel, each with its own deadline
//! 3. **Assemble** their token streams in priority order, suppressing reasoning markup
//! 4. **Aggregate** the passages the answer actually cites into ranked citations
//! 5. **Finalize** with follow-up suggestions, persist the turn, emit `done`
//!
//! Any specialist may fail without failing the turn; only a total failure,
//! a deadline breach or a caller disconnect ends it early.

pub mod assembler;
pub mod citations;
pub mod classifier;
pub mod context;
pub mod filter;
pub mod followup;
pub mod orchestrator;
pub mod specialist;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assembler::{AssemblerState, Lane, StreamAssembler};
pub use citations::CitationAggregator;
pub use classifier::{ClassifierSettings, DomainClassifier};
pub use filter::ReasoningFilter;
pub use followup::FollowUpGenerator;
pub use orchestrator::{ChatRequest, Orchestrator};
pub use specialist::{SpecialistClient, SpecialistEvent, SpecialistProfile, SpecialistResult};
pub use stream_event::{ChatResponse, StreamEvent};
