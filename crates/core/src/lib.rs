//! # RagDesk Core
//!
//! Domain types, collaborator traits, and error definitions for the RagDesk
//! multi-specialist chat orchestrator. This crate has **no framework
//! dependencies**: it defines the model every other crate implements against.
//!
//! ## Layout
//!
//! - The two external collaborators (text generation and knowledge retrieval)
//!   are traits here; HTTP adapters live in `ragdesk-providers`.
//! - Conversation state types (`Session`, `Turn`) are plain data; the
//!   concurrent store lives in `ragdesk-memory`.
//! - Everything request-scoped (`DomainDecision`, `RetrievedPassage`,
//!   `Citation`) is a value type passed explicitly between stages.

pub mod citation;
pub mod domain;
pub mod error;
pub mod event;
pub mod feedback;
pub mod generation;
pub mod message;
pub mod retrieval;
pub mod session;

// Re-export key types at crate root for ergonomics
pub use citation::{Citation, RetrievedPassage, truncate_excerpt};
pub use domain::{DomainDecision, DomainId};
pub use error::{
    Error, FeedbackError, LogSinkError, OrchestrationError, ProviderError, Result, RetrievalError,
};
pub use event::{DomainEvent, EventBus};
pub use feedback::{FeedbackEntry, FeedbackStore, TurnLogSink, TurnRecord};
pub use generation::{
    GenerationRequest, GenerationResponse, GenerationService, TokenChunk, TokenReceiver, Usage,
};
pub use message::{Message, Role, Turn};
pub use retrieval::{KnowledgeRetriever, RetrievalRequest, RetrievedDocument};
pub use session::{Session, SessionContext, SessionKey};
