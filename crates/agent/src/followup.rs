//! Best-effort follow-up question suggestions.
//!
//! Never fails: any error, timeout or unusable output falls back to
//! generic questions.

use std::sync::Arc;
use std::time::Duration;

use ragdesk_core::generation::{GenerationRequest, GenerationService};
use ragdesk_core::message::{Message, Turn};
use tracing::debug;

use crate::filter::ReasoningFilter;

pub const DEFAULT_FOLLOW_UPS: &[&str] = &[
    "Would you like a step-by-step plan?",
    "Do you want references or further reading?",
    "Should I tailor this to a specific setting?",
];

const MIN_QUESTION_CHARS: usize = 10;
const FOLLOW_UP_TEMPERATURE: f32 = 0.2;
const FOLLOW_UP_MAX_TOKENS: u32 = 200;

pub struct FollowUpGenerator {
    generator: Arc<dyn GenerationService>,
    model: String,
    count: usize,
    timeout: Duration,
}

impl FollowUpGenerator {
    pub fn new(
        generator: Arc<dyn GenerationService>,
        model: impl Into<String>,
        count: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            model: model.into(),
            count,
            timeout,
        }
    }

    fn request(&self, query: &str, answer: &str, history: &[Turn]) -> GenerationRequest {
        let system = format!(
            "You suggest follow-up questions a user might ask next. \
             Reply with exactly {} short questions, one per line, and nothing else.",
            self.count
        );
        let transcript: String = history
            .iter()
            .map(|t| format!("{}\n", t.transcript_line()))
            .collect();
        let user = format!(
            "Conversation so far:\n{transcript}\nQuestion: {query}\n\nAnswer: {answer}\n\nFollow-up questions:"
        );

        let mut request =
            GenerationRequest::new(&self.model, vec![Message::system(system), Message::user(user)]);
        request.temperature = FOLLOW_UP_TEMPERATURE;
        request.max_tokens = Some(FOLLOW_UP_MAX_TOKENS);
        request
    }

    pub async fn generate(&self, query: &str, answer: &str, history: &[Turn]) -> Vec<String> {
        let request = self.request(query, answer, history);
        match tokio::time::timeout(self.timeout, self.generator.complete(request)).await {
            Ok(Ok(response)) => parse_follow_ups(&ReasoningFilter::strip(&response.text), self.count),
            Ok(Err(e)) => {
                debug!(error = %e, "Follow-up generation failed, using defaults");
                defaults(self.count)
            }
            Err(_) => {
                debug!(timeout_secs = self.timeout.as_secs(), "Follow-up generation timed out");
                defaults(self.count)
            }
        }
    }
}

fn defaults(count: usize) -> Vec<String> {
    parse_follow_ups("", count)
}

/// Extract up to `count` questions from model output, padded with defaults.
pub fn parse_follow_ups(text: &str, count: usize) -> Vec<String> {
    let mut questions: Vec<String> = text
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| {
                    c.is_ascii_digit() || matches!(c, '-' | '*' | '•' | '.' | ')' | ' ')
                })
                .trim()
                .to_string()
        })
        .filter(|q| q.contains('?') && q.chars().count() > MIN_QUESTION_CHARS)
        .collect();
    questions.dedup();

    for fallback in DEFAULT_FOLLOW_UPS {
        if questions.len() >= count {
            break;
        }
        if !questions.iter().any(|q| q == fallback) {
            questions.push(fallback.to_string());
        }
    }
    questions.truncate(count);
    questions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedGenerator;

    #[test]
    fn parses_numbered_and_bulleted_lines() {
        let text = "1. How long does treatment last?\n- What are side effects?\n* Short?\nNot a question at all";
        assert_eq!(
            parse_follow_ups(text, 3),
            vec![
                "How long does treatment last?".to_string(),
                "What are side effects?".into(),
                DEFAULT_FOLLOW_UPS[0].into(),
            ]
        );
    }

    #[test]
    fn truncates_to_count() {
        let text = "Is it contagious?\nCan children get it?\nIs there a vaccine?\nHow is it spread?";
        assert_eq!(parse_follow_ups(text, 2).len(), 2);
    }

    #[test]
    fn empty_output_gives_defaults() {
        assert_eq!(
            parse_follow_ups("", 3),
            DEFAULT_FOLLOW_UPS.iter().map(|s| s.to_string()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn generate_uses_model_output() {
        let generator = Arc::new(
            ScriptedGenerator::new().rule("follow-up", &["<thinking>x</thinking>1. What dose is used for children?\n2. How long does it last?"]),
        );
        let follow_ups = FollowUpGenerator::new(generator.clone(), "m", 2, Duration::from_secs(8));

        let out = follow_ups.generate("TB dose?", "It depends.", &[]).await;
        assert_eq!(out, vec!["What dose is used for children?", "How long does it last?"]);
        assert!((generator.requests()[0].temperature - 0.2).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn failure_falls_back_to_defaults() {
        let generator = Arc::new(ScriptedGenerator::new().failing("follow-up"));
        let follow_ups = FollowUpGenerator::new(generator, "m", 3, Duration::from_secs(8));
        assert_eq!(follow_ups.generate("q", "a", &[]).await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_back_to_defaults() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .rule("follow-up", &["Is this too slow?"])
                .delayed("follow-up", Duration::from_secs(30)),
        );
        let follow_ups = FollowUpGenerator::new(generator, "m", 3, Duration::from_secs(8));
        let out = follow_ups.generate("q", "a", &[]).await;
        assert_eq!(out[0], DEFAULT_FOLLOW_UPS[0]);
    }
}
