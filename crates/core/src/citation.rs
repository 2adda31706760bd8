//! Passages and citations.
//!
//! A `RetrievedPassage` is what a specialist got back from retrieval; a
//! `Citation` is the deduplicated, ranked projection the caller sees.

use serde::{Deserialize, Serialize};

use crate::domain::DomainId;

/// Marker appended to excerpts that were cut short.
pub const ELLIPSIS: &str = "...";

/// Request-scoped passage produced by a specialist call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedPassage {
    pub source_locator: String,
    pub excerpt: String,
    pub score: f32,
    pub domain: DomainId,
}

/// Caller-facing citation. `id` is 1-based and stable within one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub id: usize,
    pub title: String,
    pub source: String,
    pub excerpt: String,
    pub confidence: f32,
    pub domain: DomainId,
}

/// Cut `text` to at most `max_chars` characters, ending in [`ELLIPSIS`] when cut.
pub fn truncate_excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_excerpt("  short  ", 300), "short");
    }

    #[test]
    fn long_text_is_cut_with_ellipsis() {
        let text = "a".repeat(400);
        let out = truncate_excerpt(&text, 300);
        assert_eq!(out.chars().count(), 300);
        assert!(out.ends_with(ELLIPSIS));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(20);
        let out = truncate_excerpt(&text, 10);
        assert_eq!(out, format!("{}...", "é".repeat(7)));
    }

    #[test]
    fn citation_serializes_camel_case() {
        let c = Citation {
            id: 1,
            title: "guide".into(),
            source: "s3://kb/guide.pdf".into(),
            excerpt: "x".into(),
            confidence: 0.9,
            domain: DomainId::new("tuberculosis"),
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["domain"], "tuberculosis");
    }
}
