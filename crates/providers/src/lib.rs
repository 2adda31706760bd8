//! HTTP clients for the two external collaborators.
//!
//! `OpenAiCompatGenerator` implements `ragdesk_core::GenerationService`;
//! `HttpRetriever` implements `ragdesk_core::KnowledgeRetriever`. The
//! factory builds both from configuration.

pub mod factory;
pub mod http_retriever;
pub mod openai_compat;

pub use factory::{build_generator, build_retriever};
pub use http_retriever::HttpRetriever;
pub use openai_compat::OpenAiCompatGenerator;

/// Build a reqwest client with a whole-request timeout.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}
