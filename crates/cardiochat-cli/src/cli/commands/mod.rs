//! CLI command handlers.

use std::io::Write;

use anyhow::{Context, Result};
use cardiochat_core::config::{Config, paths};
use cardiochat_core::core::chat::ChatSession;
use cardiochat_core::core::persistence::FileStore;
use cardiochat_core::core::session::{Conversation, Sender, SessionState};
use cardiochat_core::providers::gemini::{GeminiClient, GeminiConfig};

pub mod chat;
pub mod config;
pub mod send;
pub mod threads;

pub(crate) const PROMPT_PREFIX: &str = "you> ";
pub(crate) const ASSISTANT_PREFIX: &str = "assistant> ";

/// Store rooted at `$CARDIOCHAT_HOME/store`.
pub(crate) fn file_store() -> FileStore {
    FileStore::new(paths::store_dir())
}

/// Opens the stored session with a Gemini client built from `config`.
pub(crate) fn open_session(config: &Config) -> Result<ChatSession<FileStore, GeminiClient>> {
    let gemini = GeminiConfig::from_config(config).context("configure Gemini client")?;
    let client = GeminiClient::new(gemini)?;
    let settings = config.turn_settings().context("resolve system instruction")?;
    Ok(ChatSession::open(file_store(), client, settings))
}

/// Writes one line per conversation, marking the active one with `*`.
pub(crate) fn write_conversation_list(out: &mut impl Write, state: &SessionState) -> Result<()> {
    if state.is_empty() {
        writeln!(out, "No conversations found.")?;
        return Ok(());
    }
    for conversation in state.conversations() {
        let marker = if state.active_id() == Some(conversation.id()) {
            '*'
        } else {
            ' '
        };
        let count = conversation.messages().len();
        let noun = if count == 1 { "message" } else { "messages" };
        writeln!(
            out,
            "{marker} {}  {}  ({count} {noun})",
            conversation.id(),
            conversation.title()
        )?;
    }
    Ok(())
}

/// Writes the header and every message of a conversation.
pub(crate) fn write_transcript(out: &mut impl Write, conversation: &Conversation) -> Result<()> {
    writeln!(
        out,
        "Conversation {}: {}",
        conversation.id(),
        conversation.title()
    )?;
    for message in conversation.messages() {
        let prefix = match message.sender() {
            Sender::User => PROMPT_PREFIX,
            Sender::Assistant => ASSISTANT_PREFIX,
        };
        writeln!(out, "{prefix}{}", message.text())?;
    }
    Ok(())
}
