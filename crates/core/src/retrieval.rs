//! Knowledge Retrieval Service trait.
//!
//! Given a domain corpus identifier and a query, a retriever returns ranked
//! documents with source locators and scores. Embedding and index
//! maintenance are the collaborator's business, not ours.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalRequest {
    pub corpus_id: String,
    pub query: String,
    pub top_k: usize,
}

/// One ranked result from the retrieval service, before excerpt truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedDocument {
    pub source_locator: String,
    pub text: String,
    #[serde(default)]
    pub score: f32,
}

/// The Knowledge Retrieval Service contract.
///
/// Each call may fail independently; no retry is performed by callers.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(
        &self,
        request: RetrievalRequest,
    ) -> std::result::Result<Vec<RetrievedDocument>, RetrievalError>;

    async fn health_check(&self) -> std::result::Result<bool, RetrievalError> {
        Ok(true)
    }
}
