//! Generation Service trait: the abstraction over the text-generation backend.
//!
//! A generator takes a system prompt plus conversation messages and returns
//! either a complete answer or a stream of token chunks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// Parameters for one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The model to use
    pub model: String,

    /// Prompt messages, system instructions first
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// Factual, citation-grounded answers want near-deterministic sampling.
fn default_temperature() -> f32 {
    0.1
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            stream: false,
            stop: Vec::new(),
        }
    }

    /// The system prompt, if the first message carries one.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == crate::message::Role::System)
            .map(|m| m.content.as_str())
    }
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub usage: Option<Usage>,
    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

pub type TokenReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<TokenChunk, ProviderError>>;

/// The Generation Service contract.
///
/// Streaming implementations must stop producing once the returned receiver
/// is dropped; that is how request cancellation reaches the backend.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, ProviderError>;

    /// Send a request and get a stream of token chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<TokenReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(TokenChunk {
                content: Some(response.text),
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl GenerationService for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: GenerationRequest,
        ) -> std::result::Result<GenerationResponse, ProviderError> {
            let last = request.messages.last().map(|m| m.content.clone());
            Ok(GenerationResponse {
                text: last.unwrap_or_default(),
                usage: None,
                model: request.model,
            })
        }
    }

    #[test]
    fn request_defaults_to_low_temperature() {
        let req = GenerationRequest::new("m", vec![]);
        assert!((req.temperature - 0.1).abs() < f32::EPSILON);
        assert!(!req.stream);
    }

    #[test]
    fn system_prompt_reads_first_system_message() {
        let req = GenerationRequest::new("m", vec![Message::system("be brief"), Message::user("q")]);
        assert_eq!(req.system_prompt(), Some("be brief"));
        let req = GenerationRequest::new("m", vec![Message::user("q")]);
        assert_eq!(req.system_prompt(), None);
    }

    #[tokio::test]
    async fn default_stream_wraps_complete_as_single_chunk() {
        let mut rx = Echo
            .stream(GenerationRequest::new("m", vec![Message::user("hello")]))
            .await
            .unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("hello"));
        assert!(chunk.done);
        assert!(rx.recv().await.is_none());
    }
}
