//! In-memory feedback store. Durable storage is an external collaborator.

use async_trait::async_trait;
use ragdesk_core::error::FeedbackError;
use ragdesk_core::feedback::{FeedbackEntry, FeedbackStore};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct InMemoryFeedbackStore {
    entries: Arc<RwLock<Vec<FeedbackEntry>>>,
}

impl InMemoryFeedbackStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// All ratings recorded for one response.
    pub async fn for_response(&self, response_id: &str) -> Vec<FeedbackEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.response_id == response_id)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryFeedbackStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedbackStore for InMemoryFeedbackStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn store(&self, mut entry: FeedbackEntry) -> Result<(), FeedbackError> {
        FeedbackEntry::validate_rating(entry.rating)?;
        if entry.feedback_id.is_empty() {
            entry.feedback_id = Uuid::new_v4().to_string();
        }
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn count(&self) -> Result<usize, FeedbackError> {
        Ok(self.entries.read().await.len())
    }
}
