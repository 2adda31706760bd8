//! Configuration loading, validation, and management for RagDesk.
//!
//! Loads configuration from `~/.ragdesk/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use ragdesk_core::DomainId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ragdesk/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP surface
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Generation Service endpoint and sampling parameters
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Knowledge Retrieval Service endpoint
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Session Store window and eviction
    #[serde(default)]
    pub session: SessionConfig,

    /// Per-request budgets and limits
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Domain routing thresholds
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Follow-up question suggestions
    #[serde(default)]
    pub follow_ups: FollowUpConfig,

    /// Specialist domains, in priority order
    #[serde(default = "default_domains")]
    pub domains: Vec<DomainConfig>,
}

fn default_true() -> bool {
    true
}

/// Redact a secret for display.
fn redact(s: &Option<String>) -> Option<String> {
    s.as_ref().map(|_| "[REDACTED]".to_string())
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// Base URL of an OpenAI-compatible API (no trailing `/chat/completions`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_generation_timeout")]
    pub request_timeout_secs: u64,
}

fn default_generation_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout() -> u64 {
    120
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            api_url: None,
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_generation_timeout(),
        }
    }
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Base URL; requests go to `{api_url}/retrieve`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_retrieval_timeout")]
    pub request_timeout_secs: u64,
}

fn default_top_k() -> usize {
    5
}
fn default_retrieval_timeout() -> u64 {
    30
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            top_k: default_top_k(),
            request_timeout_secs: default_retrieval_timeout(),
        }
    }
}

impl std::fmt::Debug for RetrievalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("top_k", &self.top_k)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session is evicted
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// Turns kept per session; oldest evicted first
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_session_ttl() -> u64 {
    3600
}
fn default_max_turns() -> usize {
    20
}
fn default_sweep_interval() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            max_turns: default_max_turns(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard deadline per specialist call, measured from dispatch
    #[serde(default = "default_specialist_timeout")]
    pub specialist_timeout_secs: u64,

    /// Deadline for the whole request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_citations")]
    pub max_citations: usize,

    #[serde(default = "default_excerpt_max_chars")]
    pub excerpt_max_chars: usize,

    /// Recent turns offered to classification and specialist prompts
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Character budget for history inside a specialist prompt
    #[serde(default = "default_history_char_budget")]
    pub history_char_budget: usize,

    #[serde(default = "default_max_query_tokens")]
    pub max_query_tokens: usize,

    /// Upper bound on specialists activated for one mixed query
    #[serde(default = "default_max_specialists")]
    pub max_specialists: usize,

    /// Prefix each specialist's section with its display name when mixed
    #[serde(default = "default_true")]
    pub section_headings: bool,
}

fn default_specialist_timeout() -> u64 {
    25
}
fn default_request_timeout() -> u64 {
    60
}
fn default_max_citations() -> usize {
    10
}
fn default_excerpt_max_chars() -> usize {
    300
}
fn default_history_turns() -> usize {
    6
}
fn default_history_char_budget() -> usize {
    4000
}
fn default_max_query_tokens() -> usize {
    150
}
fn default_max_specialists() -> usize {
    2
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            specialist_timeout_secs: default_specialist_timeout(),
            request_timeout_secs: default_request_timeout(),
            max_citations: default_max_citations(),
            excerpt_max_chars: default_excerpt_max_chars(),
            history_turns: default_history_turns(),
            history_char_budget: default_history_char_budget(),
            max_query_tokens: default_max_query_tokens(),
            max_specialists: default_max_specialists(),
            section_headings: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Below this confidence the query goes to the general domain
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Domains within this confidence gap of the leader are activated together
    #[serde(default = "default_mixed_epsilon")]
    pub mixed_epsilon: f32,

    /// Weight of keyword hits in recent user turns relative to the query itself
    #[serde(default = "default_context_weight")]
    pub context_weight: f32,

    #[serde(default = "default_general_domain")]
    pub general_domain: String,
}

fn default_min_confidence() -> f32 {
    0.3
}
fn default_mixed_epsilon() -> f32 {
    0.2
}
fn default_context_weight() -> f32 {
    0.5
}
fn default_general_domain() -> String {
    DomainId::GENERAL.into()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            mixed_epsilon: default_mixed_epsilon(),
            context_weight: default_context_weight(),
            general_domain: default_general_domain(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_follow_up_count")]
    pub count: usize,

    #[serde(default = "default_follow_up_timeout")]
    pub timeout_secs: u64,
}

fn default_follow_up_count() -> usize {
    3
}
fn default_follow_up_timeout() -> u64 {
    8
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: default_follow_up_count(),
            timeout_secs: default_follow_up_timeout(),
        }
    }
}

/// One specialist domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub id: String,

    pub display_name: String,

    /// Knowledge corpus to retrieve from; `None` answers without retrieval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_id: Option<String>,

    /// Lexical signals; multi-word phrases count once per word
    #[serde(default)]
    pub keywords: Vec<String>,

    pub system_prompt: String,
}

const TB_PROMPT: &str = "You are a TB and health specialist. Answer only from the numbered sources provided, citing them as [n]. Cover:
- TB diagnosis and symptoms; lab tests (smear, GeneXpert), imaging
- Treatment protocols and medications (e.g. HRZE, MDR/XDR management)
- Infection control and prevention strategies
- Patient care guidelines, nutrition support and counseling
Keep responses concise (2-3 sentences). Never reveal internal reasoning.
If an image description is provided, use it as additional context.";

const AGRICULTURE_PROMPT: &str = "You are an agriculture specialist. Answer only from the numbered sources provided, citing them as [n]. Cover:
- Crop and soil management, irrigation, fertigation, IPM, yield optimization
- Food safety and nutrition, post-harvest handling
- Practical farm best practices and infrastructure
Keep responses concise (2-3 sentences). Never reveal internal reasoning.
If an image description is provided, use it as additional context.";

const GENERAL_PROMPT: &str = "You are the assistant for a knowledge service focused on tuberculosis, health and agriculture. \
The user's question did not clearly match those topics. If it is related, answer briefly and suggest how to rephrase it. \
Otherwise politely decline and explain what topics you can help with. Never reveal internal reasoning.";

fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| (*w).to_string()).collect()
}

fn default_domains() -> Vec<DomainConfig> {
    vec![
        DomainConfig {
            id: "tuberculosis".into(),
            display_name: "TB & Health".into(),
            corpus_id: Some("tb-knowledge-base".into()),
            keywords: keywords(&[
                "tb", "tuberculosis", "treatment", "symptom", "symptoms", "diagnosis", "cough",
                "sputum", "smear", "genexpert", "mdr", "xdr", "hrze", "isoniazid", "rifampicin",
                "patient", "patients", "infection", "latent", "clinic", "health", "public health",
                "drug resistant", "contact tracing",
            ]),
            system_prompt: TB_PROMPT.into(),
        },
        DomainConfig {
            id: "agriculture".into(),
            display_name: "Agriculture".into(),
            corpus_id: Some("agriculture-knowledge-base".into()),
            keywords: keywords(&[
                "crop", "crops", "soil", "irrigation", "fertigation", "farm", "farming", "farmer",
                "fertilizer", "harvest", "yield", "livestock", "pest", "ipm", "seed", "nutrition",
                "food", "food safety", "post harvest", "greenhouse", "compost",
            ]),
            system_prompt: AGRICULTURE_PROMPT.into(),
        },
        DomainConfig {
            id: DomainId::GENERAL.into(),
            display_name: "General".into(),
            corpus_id: None,
            keywords: Vec::new(),
            system_prompt: GENERAL_PROMPT.into(),
        },
    ]
}

impl AppConfig {
    /// Load configuration from the default path (~/.ragdesk/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `RAGDESK_GENERATION_API_KEY`, falling back to `OPENAI_API_KEY`
    /// - `RAGDESK_GENERATION_URL`, `RAGDESK_MODEL`
    /// - `RAGDESK_RETRIEVAL_URL`, `RAGDESK_RETRIEVAL_API_KEY`
    /// - `RAGDESK_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Load from `path` (or the default path) and apply environment overrides.
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_dir().join("config.toml"),
        };
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("RAGDESK_GENERATION_API_KEY").or_else(|| lookup("OPENAI_API_KEY"))
        {
            self.generation.api_key = Some(key);
        }
        if let Some(url) = lookup("RAGDESK_GENERATION_URL") {
            self.generation.api_url = Some(url);
        }
        if let Some(model) = lookup("RAGDESK_MODEL") {
            self.generation.model = model;
        }
        if let Some(url) = lookup("RAGDESK_RETRIEVAL_URL") {
            self.retrieval.api_url = Some(url);
        }
        if let Some(key) = lookup("RAGDESK_RETRIEVAL_API_KEY") {
            self.retrieval.api_key = Some(key);
        }
        if let Some(port) = lookup("RAGDESK_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid RAGDESK_PORT"),
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragdesk")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return fail("generation.temperature must be between 0.0 and 2.0");
        }
        let c = &self.classifier;
        for (name, v) in [
            ("classifier.min_confidence", c.min_confidence),
            ("classifier.mixed_epsilon", c.mixed_epsilon),
            ("classifier.context_weight", c.context_weight),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }

        let o = &self.orchestrator;
        if o.specialist_timeout_secs == 0 || o.request_timeout_secs == 0 {
            return fail("orchestrator timeouts must be > 0");
        }
        if o.max_specialists == 0 {
            return fail("orchestrator.max_specialists must be >= 1");
        }
        if o.max_citations == 0 || o.excerpt_max_chars < 4 {
            return fail("orchestrator.max_citations must be >= 1 and excerpt_max_chars >= 4");
        }
        if self.session.ttl_secs == 0 || self.session.sweep_interval_secs == 0 {
            return fail("session.ttl_secs and session.sweep_interval_secs must be > 0");
        }
        if self.retrieval.top_k == 0 {
            return fail("retrieval.top_k must be >= 1");
        }

        let mut seen = HashSet::new();
        for d in &self.domains {
            if !seen.insert(d.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate domain id '{}'",
                    d.id
                )));
            }
        }
        if !seen.contains(c.general_domain.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "general domain '{}' is not configured",
                c.general_domain
            )));
        }
        if self.domains.iter().all(|d| d.id == c.general_domain) {
            return fail("at least one specialist domain besides the general domain is required");
        }

        Ok(())
    }

    /// Look up a domain by id.
    pub fn domain(&self, id: &str) -> Option<&DomainConfig> {
        self.domains.iter().find(|d| d.id == id)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// The effective configuration as TOML with secrets masked.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut copy = self.clone();
        copy.generation.api_key = redact(&copy.generation.api_key);
        copy.retrieval.api_key = redact(&copy.retrieval.api_key);
        toml::to_string_pretty(&copy)
            .map_err(|e| ConfigError::ValidationError(format!("cannot render config: {e}")))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
            session: SessionConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            classifier: ClassifierConfig::default(),
            follow_ups: FollowUpConfig::default(),
            domains: default_domains(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
