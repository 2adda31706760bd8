//! Citation aggregation: dedupe, rank and cap passages from all specialists.
//!
//! Output is a pure function of the input set. Input order never matters:
//! grouping uses an ordered map, and every comparison has a total tie-break.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use ragdesk_core::citation::{Citation, RetrievedPassage, truncate_excerpt};
use ragdesk_core::domain::DomainId;

const DOCUMENT_EXTENSIONS: &[&str] = &[".pdf", ".md", ".txt", ".html", ".docx"];

/// Canonical form of a source locator used as the dedupe key.
///
/// Trims whitespace, drops any query string or fragment and trailing
/// slashes, and lowercases.
pub fn normalize_locator(locator: &str) -> String {
    let trimmed = locator.trim();
    let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    trimmed[..end].trim_end_matches('/').to_lowercase()
}

/// Human title for a locator: last path segment without a document extension.
pub fn title_from_locator(locator: &str) -> String {
    let normalized = locator.trim();
    let end = normalized.find(['?', '#']).unwrap_or(normalized.len());
    let segment = normalized[..end]
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    let lower = segment.to_ascii_lowercase();
    let stem = DOCUMENT_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| &segment[..segment.len() - ext.len()])
        .unwrap_or(segment);

    if stem.is_empty() || stem.contains(':') {
        "Document".into()
    } else {
        stem.to_string()
    }
}

fn clean_score(score: f32) -> f32 {
    if score.is_nan() { 0.0 } else { score }
}

/// Total order for passages competing for the same slot: higher score first,
/// then shorter excerpt, then lexical excerpt, then domain, then raw locator.
fn better(a: &RetrievedPassage, b: &RetrievedPassage) -> Ordering {
    clean_score(b.score)
        .total_cmp(&clean_score(a.score))
        .then_with(|| a.excerpt.len().cmp(&b.excerpt.len()))
        .then_with(|| a.excerpt.cmp(&b.excerpt))
        .then_with(|| a.domain.cmp(&b.domain))
        .then_with(|| a.source_locator.cmp(&b.source_locator))
}

#[derive(Debug, Clone, Copy)]
pub struct CitationAggregator {
    max_citations: usize,
    excerpt_max_chars: usize,
}

impl CitationAggregator {
    pub fn new(max_citations: usize, excerpt_max_chars: usize) -> Self {
        Self {
            max_citations,
            excerpt_max_chars,
        }
    }

    pub fn aggregate(&self, passages: &[RetrievedPassage]) -> Vec<Citation> {
        let mut groups: BTreeMap<String, &RetrievedPassage> = BTreeMap::new();
        for p in passages {
            let key = normalize_locator(&p.source_locator);
            if key.is_empty() {
                continue;
            }
            groups
                .entry(key)
                .and_modify(|best| {
                    if better(p, *best) == Ordering::Less {
                        *best = p;
                    }
                })
                .or_insert(p);
        }

        let mut ranked: Vec<(String, &RetrievedPassage)> = groups.into_iter().collect();
        ranked.sort_by(|(ka, a), (kb, b)| {
            clean_score(b.score)
                .total_cmp(&clean_score(a.score))
                .then_with(|| ka.cmp(kb))
        });
        ranked.truncate(self.max_citations);

        ranked
            .into_iter()
            .enumerate()
            .map(|(i, (_, p))| Citation {
                id: i + 1,
                title: title_from_locator(&p.source_locator),
                source: p.source_locator.trim().to_string(),
                excerpt: truncate_excerpt(&p.excerpt, self.excerpt_max_chars),
                confidence: clean_score(p.score).clamp(0.0, 1.0),
                domain: p.domain.clone(),
            })
            .collect()
    }
}

/// Rewrite prompt-local `[n]` markers to final citation ids.
///
/// `prompt_passages` are the sources in the order the specialist saw them,
/// so `[n]` refers to `prompt_passages[n - 1]`. Markers whose source did not
/// survive aggregation are removed together with one preceding space.
pub fn renumber_markers(
    text: &str,
    prompt_passages: &[RetrievedPassage],
    citations: &[Citation],
) -> String {
    let final_id = |n: usize| -> Option<usize> {
        let key = normalize_locator(&prompt_passages.get(n.checked_sub(1)?)?.source_locator);
        citations
            .iter()
            .find(|c| normalize_locator(&c.source) == key)
            .map(|c| c.id)
    };

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits = after.len() - after.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let is_marker = (1..=3).contains(&digits) && after[digits..].starts_with(']');
        if !is_marker {
            out.push('[');
            rest = after;
            continue;
        }

        match after[..digits].parse().ok().and_then(final_id) {
            Some(id) => out.push_str(&format!("[{id}]")),
            None => {
                if out.ends_with(' ') {
                    out.pop();
                }
            }
        }
        rest = &after[digits + 1..];
    }
    out.push_str(rest);
    out
}

/// Citations grouped by domain, domains in the given priority order.
pub fn partition_by_domain<'a>(
    citations: &'a [Citation],
    domains: &[DomainId],
) -> Vec<(DomainId, Vec<&'a Citation>)> {
    domains
        .iter()
        .map(|d| (d.clone(), citations.iter().filter(|c| c.domain == *d).collect()))
        .collect()
}
