//! Build collaborator clients from configuration.

use std::sync::Arc;

use ragdesk_config::AppConfig;
use ragdesk_core::{GenerationService, KnowledgeRetriever};

use crate::http_retriever::HttpRetriever;
use crate::openai_compat::OpenAiCompatGenerator;

pub fn build_generator(config: &AppConfig) -> Arc<dyn GenerationService> {
    let g = &config.generation;
    let base_url = g
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(&g.provider));
    let api_key = g.api_key.clone().unwrap_or_default();

    tracing::debug!(provider = %g.provider, base_url = %base_url, "Building generation client");
    Arc::new(OpenAiCompatGenerator::new(
        &g.provider,
        base_url,
        api_key,
        g.request_timeout_secs,
    ))
}

pub fn build_retriever(config: &AppConfig) -> Arc<dyn KnowledgeRetriever> {
    let r = &config.retrieval;
    if r.api_url.is_none() {
        tracing::warn!("retrieval.api_url is not set; specialists will answer without sources");
    }
    Arc::new(HttpRetriever::new(
        r.api_url.clone(),
        r.api_key.clone(),
        r.request_timeout_secs,
    ))
}

/// Get the default base URL for well-known OpenAI-compatible providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
