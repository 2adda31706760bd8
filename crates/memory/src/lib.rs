//! In-process state for RagDesk.
//!
//! Sessions are deliberately non-durable: a restart starts every
//! conversation fresh.

pub mod feedback;
pub mod session_store;
pub mod turn_log;

pub use feedback::InMemoryFeedbackStore;
pub use session_store::SessionStore;
pub use turn_log::TracingTurnLog;
