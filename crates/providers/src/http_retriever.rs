//! HTTP client for the Knowledge Retrieval Service.
//!
//! `POST {base}/retrieve` with `{ corpusId, query, topK }`, answered by
//! `{ results: [{ sourceLocator, text, score }] }`.

use async_trait::async_trait;
use ragdesk_core::error::RetrievalError;
use ragdesk_core::retrieval::{KnowledgeRetriever, RetrievalRequest, RetrievedDocument};
use serde::Deserialize;
use tracing::{debug, warn};

pub struct HttpRetriever {
    base_url: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpRetriever {
    /// `base_url = None` yields a retriever whose every call fails with `NotConfigured`.
    pub fn new(base_url: Option<String>, api_key: Option<String>, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            api_key,
            client: crate::http_client(timeout_secs),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    results: Vec<RetrievedDocument>,
}

#[async_trait]
impl KnowledgeRetriever for HttpRetriever {
    fn name(&self) -> &str {
        "http"
    }

    async fn retrieve(
        &self,
        request: RetrievalRequest,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            RetrievalError::NotConfigured("retrieval.api_url is not set".into())
        })?;
        let url = format!("{base}/retrieve");

        debug!(corpus = %request.corpus_id, top_k = request.top_k, "Sending retrieval request");

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let response = builder
            .send()
            .await
            .map_err(|e| RetrievalError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, corpus = %request.corpus_id, "Retrieval service returned error");
            return Err(RetrievalError::ServiceError {
                status_code: status,
                message: body,
            });
        }

        let parsed: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;

        // The service ranks, but only top_k is ours to return
        let mut results = parsed.results;
        results.truncate(request.top_k);
        Ok(results)
    }

    async fn health_check(&self) -> Result<bool, RetrievalError> {
        Ok(self.is_configured())
    }
}
