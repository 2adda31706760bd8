//! Domain identifiers and per-request routing decisions.

use serde::{Deserialize, Serialize};

/// A configured specialist domain (e.g. `"tuberculosis"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(pub String);

impl DomainId {
    /// Id of the catch-all domain used when nothing else clears the threshold.
    pub const GENERAL: &'static str = "general";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn general() -> Self {
        Self(Self::GENERAL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which specialist(s) should answer a request. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainDecision {
    pub primary_domain: DomainId,
    #[serde(default)]
    pub secondary_domains: Vec<DomainId>,
    /// Confidence of the primary domain, in `[0, 1)`.
    pub confidence: f32,
    /// Set when classification hit an internal fault and fell back.
    #[serde(default)]
    pub degraded: bool,
}

impl DomainDecision {
    pub fn single(domain: DomainId, confidence: f32) -> Self {
        Self {
            primary_domain: domain,
            secondary_domains: Vec::new(),
            confidence,
            degraded: false,
        }
    }

    /// The fallback decision used when classification faults.
    pub fn degraded_general(general: DomainId) -> Self {
        Self {
            primary_domain: general,
            secondary_domains: Vec::new(),
            confidence: 0.0,
            degraded: true,
        }
    }

    pub fn is_mixed(&self) -> bool {
        !self.secondary_domains.is_empty()
    }

    /// Active domains in priority order, primary first.
    pub fn active_domains(&self) -> Vec<DomainId> {
        std::iter::once(self.primary_domain.clone())
            .chain(self.secondary_domains.iter().cloned())
            .collect()
    }
}
