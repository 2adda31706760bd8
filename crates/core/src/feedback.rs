//! Collaborators for persisted feedback and per-turn logging.
//!
//! Both are best-effort from the request's point of view: their failures
//! are logged and never change what the caller sees.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FeedbackError, LogSinkError};

/// A user's rating of one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub feedback_id: String,
    pub user_id: String,
    pub response_id: String,
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackEntry {
    pub const MIN_RATING: u8 = 1;
    pub const MAX_RATING: u8 = 5;

    pub fn validate_rating(rating: u8) -> Result<u8, FeedbackError> {
        if (Self::MIN_RATING..=Self::MAX_RATING).contains(&rating) {
            Ok(rating)
        } else {
            Err(FeedbackError::InvalidRating(rating))
        }
    }
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    fn name(&self) -> &str;

    async fn store(&self, entry: FeedbackEntry) -> Result<(), FeedbackError>;

    async fn count(&self) -> Result<usize, FeedbackError>;
}

/// Everything worth recording about a completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub user_id: String,
    pub session_id: String,
    pub response_id: String,
    pub query: String,
    pub response: String,
    pub domains: Vec<String>,
    pub citation_sources: Vec<String>,
    pub degraded: bool,
    pub had_image_context: bool,
    pub timestamp: DateTime<Utc>,
}

/// External log collaborator. Called from a detached task.
#[async_trait]
pub trait TurnLogSink: Send + Sync {
    async fn record(&self, record: TurnRecord) -> Result<(), LogSinkError>;
}
