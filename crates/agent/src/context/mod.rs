//! Prompt context for specialist generation calls.
//!
//! A specialist prompt has three parts, in order:
//!
//! | Part | Source | Trim strategy |
//! |------|--------|---------------|
//! | System | Domain instructions + numbered sources | Never trimmed |
//! | History | Recent session turns | Oldest turns dropped first |
//! | Query | User question + one-shot image description | Never trimmed |

pub mod prompt;
pub mod token;

pub use prompt::{build_messages, truncate_history};
pub use token::estimate_tokens;
