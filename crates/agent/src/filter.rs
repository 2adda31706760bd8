//! Streaming suppression of model reasoning blocks.
//!
//! Models sometimes emit `<thinking>...</thinking>` (or `<reasoning>`) spans
//! meant for themselves. The filter removes them from a token stream where
//! a tag can be split across any number of chunks. Stray closing tags are
//! dropped too. Text inside a block that never closes is discarded.

const DEFAULT_TAGS: &[&str] = &["thinking", "reasoning"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Open,
    Close,
}

#[derive(Debug)]
pub struct ReasoningFilter {
    /// `(open, close)` markers, lowercase.
    tags: Vec<(String, String)>,
    /// Unemitted text that may still turn out to be (part of) a tag.
    pending: String,
    /// Index into `tags` of the block we are inside, if any.
    inside: Option<usize>,
}

impl Default for ReasoningFilter {
    fn default() -> Self {
        Self::with_tags(DEFAULT_TAGS)
    }
}

impl ReasoningFilter {
    pub fn with_tags(names: &[&str]) -> Self {
        Self {
            tags: names
                .iter()
                .map(|n| {
                    let n = n.to_ascii_lowercase();
                    (format!("<{n}>"), format!("</{n}>"))
                })
                .collect(),
            pending: String::new(),
            inside: None,
        }
    }

    /// Whether the filter is currently inside a suppressed block.
    pub fn is_suppressing(&self) -> bool {
        self.inside.is_some()
    }

    /// Feed a chunk; returns the text that is safe to show now.
    pub fn push(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        let mut visible = String::new();

        loop {
            // ASCII lowercasing keeps byte offsets identical to `pending`
            let lower = self.pending.to_ascii_lowercase();

            if let Some(idx) = self.inside {
                let close = &self.tags[idx].1;
                match lower.find(close.as_str()) {
                    Some(pos) => {
                        self.pending.drain(..pos + close.len());
                        self.inside = None;
                        continue;
                    }
                    None => {
                        // Keep only a tail that could start the closing tag
                        let keep = partial_tag_start(&lower, std::iter::once(close.as_str()));
                        self.pending.drain(..keep);
                        break;
                    }
                }
            }

            match self.earliest_tag(&lower) {
                Some((pos, idx, kind)) => {
                    visible.push_str(&self.pending[..pos]);
                    let len = match kind {
                        TagKind::Open => self.tags[idx].0.len(),
                        TagKind::Close => self.tags[idx].1.len(),
                    };
                    self.pending.drain(..pos + len);
                    if kind == TagKind::Open {
                        self.inside = Some(idx);
                    }
                }
                None => {
                    let keep = partial_tag_start(
                        &lower,
                        self.tags.iter().flat_map(|(o, c)| [o.as_str(), c.as_str()]),
                    );
                    visible.push_str(&self.pending[..keep]);
                    self.pending.drain(..keep);
                    break;
                }
            }
        }
        visible
    }

    /// End of stream: flush held-back text unless inside an unclosed block.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if self.inside.take().is_some() {
            String::new()
        } else {
            rest
        }
    }

    /// Filter a complete text in one go.
    pub fn strip(text: &str) -> String {
        let mut filter = Self::default();
        let mut out = filter.push(text);
        out.push_str(&filter.finish());
        out
    }

    fn earliest_tag(&self, lower: &str) -> Option<(usize, usize, TagKind)> {
        self.tags
            .iter()
            .enumerate()
            .flat_map(|(i, (open, close))| {
                [
                    lower.find(open.as_str()).map(|p| (p, i, TagKind::Open)),
                    lower.find(close.as_str()).map(|p| (p, i, TagKind::Close)),
                ]
            })
            .flatten()
            .min_by_key(|(pos, _, _)| *pos)
    }
}

/// Byte offset where a trailing partial tag begins, or `text.len()` if none.
fn partial_tag_start<'a>(text: &str, tags: impl Iterator<Item = &'a str> + Clone) -> usize {
    text.char_indices()
        .filter(|(_, c)| *c == '<')
        .map(|(i, _)| i)
        .find(|&i| tags.clone().any(|t| t.len() > text.len() - i && t.starts_with(&text[i..])))
        .unwrap_or(text.len())
}
