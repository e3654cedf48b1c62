//! Thread command handlers.
//!
//! These work on the stored state directly and never contact the service.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use cardiochat_core::core::persistence;
use cardiochat_core::core::session::{ConversationId, SessionError};

use super::{file_store, write_conversation_list, write_transcript};

pub fn list() -> Result<()> {
    let state = persistence::load(&file_store());
    write_conversation_list(&mut io::stdout().lock(), &state)
}

pub fn show(id: ConversationId) -> Result<()> {
    let state = persistence::load(&file_store());
    let conversation = state
        .conversation(id)
        .ok_or(SessionError::UnknownConversation(id))?;
    write_transcript(&mut io::stdout().lock(), conversation)
}

pub fn new() -> Result<()> {
    let store = file_store();
    let mut state = persistence::load(&store);
    let id = state.create_conversation()?;
    persistence::persist(&store, &state).context("save conversations")?;
    println!("Created conversation {id}");
    Ok(())
}

pub fn select(id: ConversationId) -> Result<()> {
    let store = file_store();
    let mut state = persistence::load(&store);
    state.select_active(id)?;
    persistence::persist(&store, &state).context("save conversations")?;
    let title = state.conversation(id).map_or("", |c| c.title());
    println!("Active conversation: {id}  {title}");
    Ok(())
}

pub fn delete(id: ConversationId, yes: bool) -> Result<()> {
    let store = file_store();
    let mut state = persistence::load(&store);
    let title = state
        .conversation(id)
        .ok_or(SessionError::UnknownConversation(id))?
        .title()
        .to_string();

    if !yes && !confirm(&format!("Delete conversation {id} \"{title}\"? [y/N] "))? {
        println!("Cancelled.");
        return Ok(());
    }

    state.delete_conversation(id)?;
    persistence::persist(&store, &state).context("save conversations")?;
    println!("Deleted conversation {id}");
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt}")?;
    stdout.flush()?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("read confirmation")?;
    Ok(is_yes(&answer))
}

pub(crate) fn is_yes(answer: &str) -> bool {
    matches!(answer.trim(), "y" | "Y" | "yes" | "Yes")
}
