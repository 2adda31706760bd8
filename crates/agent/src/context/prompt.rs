//! Builds the message list for one specialist generation call.

use ragdesk_core::citation::RetrievedPassage;
use ragdesk_core::message::{Message, Role, Turn};

use crate::citations::title_from_locator;

/// Keep the newest turns whose combined text fits in `char_budget`.
///
/// Turns are dropped oldest first; a turn that does not fit stops the walk,
/// so the kept history is always a contiguous tail.
pub fn truncate_history(turns: &[Turn], char_budget: usize) -> Vec<Turn> {
    let mut used = 0;
    let mut kept = Vec::new();
    for turn in turns.iter().rev() {
        let len = turn.text.chars().count();
        if used + len > char_budget {
            break;
        }
        used += len;
        kept.push(turn.clone());
    }
    kept.reverse();
    kept
}

fn sources_block(passages: &[RetrievedPassage]) -> String {
    if passages.is_empty() {
        return "No sources were retrieved for this question. Say so if you cannot answer reliably."
            .into();
    }
    let mut block = String::from("Sources (cite as [n]):\n");
    for (i, p) in passages.iter().enumerate() {
        block.push_str(&format!(
            "[{}] {} ({})\n{}\n",
            i + 1,
            title_from_locator(&p.source_locator),
            p.source_locator,
            p.excerpt
        ));
    }
    block
}

/// System instructions, sources, bounded history, then the query.
pub fn build_messages(
    system_prompt: &str,
    passages: &[RetrievedPassage],
    history: &[Turn],
    history_char_budget: usize,
    query: &str,
    image_context: Option<&str>,
) -> Vec<Message> {
    let mut messages = vec![Message::system(format!(
        "{system_prompt}\n\n{}",
        sources_block(passages)
    ))];

    for turn in truncate_history(history, history_char_budget) {
        messages.push(match turn.role {
            Role::User => Message::user(turn.text),
            Role::Assistant => Message::assistant(turn.text),
            Role::System => Message::system(turn.text),
        });
    }

    let question = match image_context {
        Some(image) => format!("{query}\n\nImage description: {image}"),
        None => query.to_string(),
    };
    messages.push(Message::user(question));
    messages
}
