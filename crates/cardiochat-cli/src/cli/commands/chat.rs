//! Interactive chat loop.
//!
//! Plain lines go to the active conversation; lines starting with `:` are
//! commands. Exits on `:q` or EOF.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use cardiochat_core::config::Config;
use cardiochat_core::core::chat::ChatSession;
use cardiochat_core::core::persistence::PersistentStore;
use cardiochat_core::core::session::ConversationId;
use cardiochat_core::core::turn::{SendOutcome, SkipReason};
use cardiochat_core::providers::CompletionClient;

use super::threads::is_yes;
use super::{
    ASSISTANT_PREFIX, PROMPT_PREFIX, open_session, write_conversation_list, write_transcript,
};

const QUIT_COMMAND: &str = ":q";

const HELP_TEXT: &str = "\
Commands:
  :new           start a new conversation
  :list          list conversations (* marks the active one)
  :select <id>   switch to a conversation
  :delete <id>   delete a conversation
  :status        show the active conversation and question count
  :help          show this help
  :q             quit";

#[derive(Debug, PartialEq, Eq)]
enum ReplCommand<'a> {
    Quit,
    Help,
    New,
    List,
    Status,
    Select(&'a str),
    Delete(&'a str),
    Unknown(&'a str),
}

/// Parses a `:`-prefixed line. Returns `None` for plain messages.
fn parse_command(line: &str) -> Option<ReplCommand<'_>> {
    let trimmed = line.trim();
    if !trimmed.starts_with(':') {
        return None;
    }
    let (name, arg) = trimmed
        .split_once(char::is_whitespace)
        .map_or((trimmed, ""), |(name, arg)| (name, arg.trim()));
    Some(match name {
        QUIT_COMMAND => ReplCommand::Quit,
        ":help" => ReplCommand::Help,
        ":new" => ReplCommand::New,
        ":list" => ReplCommand::List,
        ":status" => ReplCommand::Status,
        ":select" => ReplCommand::Select(arg),
        ":delete" => ReplCommand::Delete(arg),
        _ => ReplCommand::Unknown(name),
    })
}

pub async fn run(config: &Config) -> Result<()> {
    let session = open_session(config)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    run_loop(stdin.lock(), &mut stdout, &session).await
}

/// Runs the loop over arbitrary input and output.
pub async fn run_loop<R, W, S, C>(
    mut input: R,
    output: &mut W,
    session: &ChatSession<S, C>,
) -> Result<()>
where
    R: BufRead,
    W: Write,
    S: PersistentStore,
    C: CompletionClient,
{
    writeln!(
        output,
        "cardiochat: type a message, :help for commands, {QUIT_COMMAND} to quit"
    )?;
    show_active(output, session)?;

    loop {
        write!(output, "{PROMPT_PREFIX}")?;
        output.flush()?;

        let Some(line) = read_line(&mut input)? else {
            writeln!(output)?;
            break;
        };

        match parse_command(&line) {
            Some(ReplCommand::Quit) => {
                writeln!(output, "Goodbye!")?;
                break;
            }
            Some(ReplCommand::Help) => writeln!(output, "{HELP_TEXT}")?,
            Some(ReplCommand::New) => match session.create_conversation() {
                Ok(id) => writeln!(output, "Started conversation {id}.")?,
                Err(e) => writeln!(output, "Error: {e:#}")?,
            },
            Some(ReplCommand::List) => write_conversation_list(output, &session.snapshot())?,
            Some(ReplCommand::Status) => write_status(output, session)?,
            Some(ReplCommand::Select(arg)) => {
                let Some(id) = parse_id(output, arg)? else {
                    continue;
                };
                match session.select_active(id) {
                    Ok(()) => show_active(output, session)?,
                    Err(e) => writeln!(output, "Error: {e:#}")?,
                }
            }
            Some(ReplCommand::Delete(arg)) => {
                let Some(id) = parse_id(output, arg)? else {
                    continue;
                };
                delete(&mut input, output, session, id)?;
            }
            Some(ReplCommand::Unknown(name)) => {
                writeln!(output, "Unknown command {name}. Type :help for commands.")?;
            }
            None if line.trim().is_empty() => {}
            None => send(output, session, &line).await?,
        }
    }

    Ok(())
}

async fn send<W, S, C>(output: &mut W, session: &ChatSession<S, C>, text: &str) -> Result<()>
where
    W: Write,
    S: PersistentStore,
    C: CompletionClient,
{
    match session.send_active(text).await {
        SendOutcome::Sent(turn) => writeln!(output, "{ASSISTANT_PREFIX}{}", turn.reply_text())?,
        SendOutcome::Skipped(SkipReason::UnknownConversation) => {
            writeln!(output, "No active conversation. Use :new to start one.")?;
        }
        SendOutcome::Skipped(SkipReason::Busy) => {
            writeln!(output, "A reply is still pending for this conversation.")?;
        }
        SendOutcome::Skipped(SkipReason::EmptyInput) => {}
    }
    Ok(())
}

fn delete<R, W, S, C>(
    input: &mut R,
    output: &mut W,
    session: &ChatSession<S, C>,
    id: ConversationId,
) -> Result<()>
where
    R: BufRead,
    W: Write,
    S: PersistentStore,
    C: CompletionClient,
{
    let state = session.snapshot();
    let Some(conversation) = state.conversation(id) else {
        writeln!(output, "Conversation {id} not found.")?;
        return Ok(());
    };

    write!(
        output,
        "Delete conversation {id} \"{}\"? [y/N] ",
        conversation.title()
    )?;
    output.flush()?;
    let answer = read_line(input)?.unwrap_or_default();
    if !is_yes(&answer) {
        writeln!(output, "Cancelled.")?;
        return Ok(());
    }

    match session.delete_conversation(id) {
        Ok(()) => {
            writeln!(output, "Deleted conversation {id}.")?;
            show_active(output, session)?;
        }
        Err(e) => writeln!(output, "Error: {e:#}")?,
    }
    Ok(())
}

fn show_active<W, S, C>(output: &mut W, session: &ChatSession<S, C>) -> Result<()>
where
    W: Write,
    S: PersistentStore,
    C: CompletionClient,
{
    let state = session.snapshot();
    match state.active_conversation() {
        Some(conversation) => write_transcript(output, conversation),
        None => {
            writeln!(output, "No conversations. Use :new to start one.")?;
            Ok(())
        }
    }
}

fn write_status<W, S, C>(output: &mut W, session: &ChatSession<S, C>) -> Result<()>
where
    W: Write,
    S: PersistentStore,
    C: CompletionClient,
{
    let state = session.snapshot();
    match state.active_conversation() {
        Some(conversation) => writeln!(
            output,
            "Active conversation: {}  {}",
            conversation.id(),
            conversation.title()
        )?,
        None => writeln!(output, "Active conversation: none")?,
    }
    let counter = session.question_counter();
    writeln!(output, "Questions: {}/{}", counter.count(), counter.max())?;
    Ok(())
}

fn parse_id(output: &mut impl Write, arg: &str) -> Result<Option<ConversationId>> {
    if let Ok(id) = arg.parse() {
        return Ok(Some(id));
    }
    writeln!(output, "Expected a conversation id, got \"{arg}\".")?;
    Ok(None)
}

/// Reads one line without its line terminator. `None` at EOF.
fn read_line(input: &mut impl BufRead) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let trimmed_len = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed_len);
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(":q"), Some(ReplCommand::Quit));
        assert_eq!(parse_command("  :help "), Some(ReplCommand::Help));
        assert_eq!(parse_command(":select 3"), Some(ReplCommand::Select("3")));
        assert_eq!(parse_command(":delete   12 "), Some(ReplCommand::Delete("12")));
        assert_eq!(parse_command(":select"), Some(ReplCommand::Select("")));
        assert_eq!(parse_command(":bogus x"), Some(ReplCommand::Unknown(":bogus")));
        assert_eq!(parse_command("I have chest pain"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_read_line_strips_terminators_only() {
        let mut input = Cursor::new("  padded  \r\nnext\n");
        assert_eq!(read_line(&mut input).unwrap().as_deref(), Some("  padded  "));
        assert_eq!(read_line(&mut input).unwrap().as_deref(), Some("next"));
        assert_eq!(read_line(&mut input).unwrap(), None);
    }

    #[test]
    fn test_parse_id_reports_bad_input() {
        let mut out = Vec::new();
        assert_eq!(parse_id(&mut out, "7").unwrap(), Some(ConversationId::new(7)));
        assert_eq!(parse_id(&mut out, "seven").unwrap(), None);
        assert!(String::from_utf8(out).unwrap().contains("Expected a conversation id"));
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" Yes "));
        assert!(!is_yes(""));
        assert!(!is_yes("n"));
    }
}
