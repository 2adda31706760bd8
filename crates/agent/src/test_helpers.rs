//! Scripted collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ragdesk_core::error::{ProviderError, RetrievalError};
use ragdesk_core::generation::{
    GenerationRequest, GenerationResponse, GenerationService, TokenChunk, TokenReceiver,
};
use ragdesk_core::retrieval::{KnowledgeRetriever, RetrievalRequest, RetrievedDocument};
use tokio::sync::mpsc;

pub fn doc(locator: &str, text: &str, score: f32) -> RetrievedDocument {
    RetrievedDocument {
        source_locator: locator.into(),
        text: text.into(),
        score,
    }
}

#[derive(Clone)]
enum Script {
    Chunks(Vec<String>),
    Fail,
}

/// Generation service whose output is chosen by a substring of the system prompt.
///
/// The first matching rule wins; no match streams nothing.
#[derive(Default)]
pub struct ScriptedGenerator {
    rules: Vec<(String, Script)>,
    chunk_delay: HashMap<String, Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
    aborted: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, needle: &str, chunks: &[&str]) -> Self {
        self.rules.push((
            needle.into(),
            Script::Chunks(chunks.iter().map(|c| c.to_string()).collect()),
        ));
        self
    }

    pub fn failing(mut self, needle: &str) -> Self {
        self.rules.push((needle.into(), Script::Fail));
        self
    }

    /// Sleep before every chunk of the rule matching `needle`.
    pub fn delayed(mut self, needle: &str, delay: Duration) -> Self {
        self.chunk_delay.insert(needle.into(), delay);
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Streams that stopped because their receiver was dropped.
    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    fn script_for(&self, request: &GenerationRequest) -> (Option<Script>, Duration) {
        self.requests.lock().unwrap().push(request.clone());
        let system = request.system_prompt().unwrap_or_default();
        let matched = self.rules.iter().find(|(needle, _)| system.contains(needle.as_str()));
        let delay = matched
            .and_then(|(needle, _)| self.chunk_delay.get(needle).copied())
            .unwrap_or_default();
        (matched.map(|(_, s)| s.clone()), delay)
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let model = request.model.clone();
        match self.script_for(&request) {
            (Some(Script::Fail), _) => Err(ProviderError::Network("scripted failure".into())),
            (Some(Script::Chunks(chunks)), delay) => {
                tokio::time::sleep(delay).await;
                Ok(GenerationResponse {
                    text: chunks.concat(),
                    usage: None,
                    model,
                })
            }
            (None, _) => Ok(GenerationResponse {
                text: String::new(),
                usage: None,
                model,
            }),
        }
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TokenReceiver, ProviderError> {
        let (chunks, delay) = match self.script_for(&request) {
            (Some(Script::Fail), _) => return Err(ProviderError::Network("scripted failure".into())),
            (Some(Script::Chunks(chunks)), delay) => (chunks, delay),
            (None, _) => (Vec::new(), Duration::ZERO),
        };

        let (tx, rx) = mpsc::channel(4);
        let aborted = Arc::clone(&self.aborted);
        tokio::spawn(async move {
            for chunk in chunks {
                tokio::time::sleep(delay).await;
                let sent = tx
                    .send(Ok(TokenChunk {
                        content: Some(chunk),
                        ..Default::default()
                    }))
                    .await;
                if sent.is_err() {
                    aborted.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            }
            let _ = tx
                .send(Ok(TokenChunk {
                    done: true,
                    ..Default::default()
                }))
                .await;
        });
        Ok(rx)
    }
}

/// Retriever serving fixed documents per corpus id. Unknown corpora return nothing.
#[derive(Default)]
pub struct ScriptedRetriever {
    corpora: HashMap<String, Vec<RetrievedDocument>>,
    failing: HashSet<String>,
    delay: Duration,
    requests: Mutex<Vec<RetrievalRequest>>,
}

impl ScriptedRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn corpus(mut self, corpus_id: &str, docs: Vec<RetrievedDocument>) -> Self {
        self.corpora.insert(corpus_id.into(), docs);
        self
    }

    pub fn failing(mut self, corpus_id: &str) -> Self {
        self.failing.insert(corpus_id.into());
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<RetrievalRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeRetriever for ScriptedRetriever {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn retrieve(&self, request: RetrievalRequest) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::time::sleep(self.delay).await;
        if self.failing.contains(&request.corpus_id) {
            return Err(RetrievalError::ServiceError {
                status_code: 503,
                message: "scripted outage".into(),
            });
        }
        Ok(self.corpora.get(&request.corpus_id).cloned().unwrap_or_default())
    }
}
