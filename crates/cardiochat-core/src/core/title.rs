//! Display title derivation.

use super::session::{Message, Sender};

/// Title of a conversation that has no user message yet.
pub const PLACEHOLDER_TITLE: &str = "New Conversation";

/// Maximum title length, in characters.
pub const TITLE_MAX_CHARS: usize = 30;

/// Computes a conversation title from its messages.
///
/// Returns the first user message's text cut to [`TITLE_MAX_CHARS`] characters,
/// or [`PLACEHOLDER_TITLE`] when there is no user message (or its text is empty).
pub fn derive_title(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.sender() == Sender::User)
        .map(|m| truncate_chars(m.text(), TITLE_MAX_CHARS))
        .filter(|title| !title.is_empty())
        .map_or_else(|| PLACEHOLDER_TITLE.to_string(), str::to_string)
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
