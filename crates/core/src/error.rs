//! Error types for the RagDesk domain.
//!
//! Each bounded context has its own `thiserror` enum; the top-level
//! [`Error`] converts from all of them.

use thiserror::Error;

/// The top-level error type for all RagDesk operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Generation service ---
    #[error("Generation error: {0}")]
    Generation(#[from] ProviderError),

    // --- Knowledge retrieval service ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Request orchestration ---
    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    // --- Feedback persistence ---
    #[error("Feedback error: {0}")]
    Feedback(#[from] FeedbackError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to the Generation Service.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures talking to the Knowledge Retrieval Service.
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Retrieval request failed: {message} (status: {status_code})")]
    ServiceError { status_code: u16, message: String },

    #[error("Malformed retrieval response: {0}")]
    InvalidResponse(String),

    #[error("Retriever not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Request-level orchestration outcomes.
///
/// Only `AllSpecialistsFailed`, `DeadlineExceeded` and `InvalidRequest` ever
/// reach a caller. The others are absorbed and logged.
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    #[error("Classification degraded to the general domain: {0}")]
    ClassificationDegraded(String),

    #[error("Specialist '{domain}' unavailable: {reason}")]
    SpecialistUnavailable { domain: String, reason: String },

    #[error("All specialists failed ({})", attempted.join(", "))]
    AllSpecialistsFailed { attempted: Vec<String> },

    #[error("Stream cancelled by caller")]
    StreamCancelled,

    #[error("Request deadline of {timeout_secs}s exceeded")]
    DeadlineExceeded { timeout_secs: u64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl OrchestrationError {
    /// Whether this outcome is caller-initiated and should not be logged as an error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::StreamCancelled)
    }
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum LogSinkError {
    #[error("Turn log delivery failed: {0}")]
    Delivery(String),
}
