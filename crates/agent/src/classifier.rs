//! Domain classifier: routes a query to one or more specialist domains.
//!
//! Scoring is lexical. Each configured keyword that appears in the query
//! adds its word count to the domain's score (a keyword counts once no
//! matter how often it repeats). Keywords found in recent user turns add
//! the same amount scaled by `context_weight`. Confidence is `s / (s + 1)`,
//! strictly increasing in the score, so more or stronger signals never
//! lower it.
//!
//! - No domain reaches `min_confidence`: the general domain answers.
//! - Domains within `mixed_epsilon` of the leader join as secondaries.
//! - Equal confidences are ordered by configuration order.

use std::collections::HashSet;

use ragdesk_config::AppConfig;
use ragdesk_core::domain::{DomainDecision, DomainId};
use ragdesk_core::error::OrchestrationError;
use ragdesk_core::message::{Role, Turn};
use tracing::{debug, warn};

/// Lowercased alphanumeric words of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

#[derive(Debug, Clone)]
struct DomainSignals {
    id: DomainId,
    /// Each keyword as its word sequence.
    keywords: Vec<Vec<String>>,
}

impl DomainSignals {
    fn score(&self, words: &[String], vocabulary: &HashSet<&str>) -> f32 {
        self.keywords
            .iter()
            .filter(|kw| match kw.as_slice() {
                [] => false,
                [single] => vocabulary.contains(single.as_str()),
                phrase => words.windows(phrase.len()).any(|w| w == phrase),
            })
            .map(|kw| kw.len() as f32)
            .sum()
    }
}

/// Thresholds and limits for routing decisions.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierSettings {
    pub min_confidence: f32,
    pub mixed_epsilon: f32,
    pub context_weight: f32,
    pub max_specialists: usize,
}

pub struct DomainClassifier {
    domains: Vec<DomainSignals>,
    general: DomainId,
    settings: ClassifierSettings,
}

impl DomainClassifier {
    /// `domains` in priority order; the general domain is never scored.
    pub fn new(
        domains: Vec<(DomainId, Vec<String>)>,
        general: DomainId,
        settings: ClassifierSettings,
    ) -> Self {
        let domains = domains
            .into_iter()
            .filter(|(id, _)| *id != general)
            .map(|(id, keywords)| DomainSignals {
                id,
                keywords: keywords.iter().map(|k| tokenize(k)).collect(),
            })
            .collect();
        Self {
            domains,
            general,
            settings,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config
                .domains
                .iter()
                .map(|d| (DomainId::new(&d.id), d.keywords.clone()))
                .collect(),
            DomainId::new(&config.classifier.general_domain),
            ClassifierSettings {
                min_confidence: config.classifier.min_confidence,
                mixed_epsilon: config.classifier.mixed_epsilon,
                context_weight: config.classifier.context_weight,
                max_specialists: config.orchestrator.max_specialists,
            },
        )
    }

    pub fn general_domain(&self) -> &DomainId {
        &self.general
    }

    /// Confidence for every scored domain, in configuration order.
    pub fn confidences(&self, query: &str, recent_turns: &[Turn]) -> Vec<(DomainId, f32)> {
        let query_words = tokenize(query);
        let query_vocab: HashSet<&str> = query_words.iter().map(String::as_str).collect();

        let context_text = recent_turns
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let context_words = tokenize(&context_text);
        let context_vocab: HashSet<&str> = context_words.iter().map(String::as_str).collect();

        self.domains
            .iter()
            .map(|d| {
                let score = d.score(&query_words, &query_vocab)
                    + self.settings.context_weight * d.score(&context_words, &context_vocab);
                (d.id.clone(), score / (score + 1.0))
            })
            .collect()
    }

    /// Classify, reporting internal faults instead of degrading.
    pub fn try_classify(
        &self,
        query: &str,
        recent_turns: &[Turn],
    ) -> Result<DomainDecision, OrchestrationError> {
        if self.domains.is_empty() {
            return Err(OrchestrationError::ClassificationDegraded(
                "no specialist domains configured".into(),
            ));
        }

        let mut ranked = self.confidences(query, recent_turns);
        if let Some((id, c)) = ranked.iter().find(|(_, c)| !c.is_finite()) {
            return Err(OrchestrationError::ClassificationDegraded(format!(
                "non-finite confidence {c} for domain '{id}'"
            )));
        }
        // Stable sort keeps configuration order among equal confidences
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (primary, top) = ranked[0].clone();
        if top < self.settings.min_confidence {
            return Ok(DomainDecision::single(self.general.clone(), top));
        }

        let secondary_domains = ranked[1..]
            .iter()
            .filter(|(_, c)| *c >= self.settings.min_confidence)
            .filter(|(_, c)| top - *c <= self.settings.mixed_epsilon)
            .take(self.settings.max_specialists.saturating_sub(1))
            .map(|(id, _)| id.clone())
            .collect();

        Ok(DomainDecision {
            primary_domain: primary,
            secondary_domains,
            confidence: top,
            degraded: false,
        })
    }

    /// Classify; never fails. Internal faults degrade to the general domain.
    pub fn classify(&self, query: &str, recent_turns: &[Turn]) -> DomainDecision {
        match self.try_classify(query, recent_turns) {
            Ok(decision) => {
                debug!(
                    primary = %decision.primary_domain,
                    secondary = ?decision.secondary_domains,
                    confidence = decision.confidence,
                    "Query classified"
                );
                decision
            }
            Err(e) => {
                warn!(error = %e, "Falling back to general domain");
                DomainDecision::degraded_general(self.general.clone())
            }
        }
    }
}
