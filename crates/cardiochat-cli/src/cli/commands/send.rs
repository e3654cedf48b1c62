//! One-shot send.

use anyhow::{Result, bail};
use cardiochat_core::config::Config;
use cardiochat_core::core::session::ConversationId;
use cardiochat_core::core::turn::{SendOutcome, SkipReason, TurnOutcome};

use super::open_session;

pub async fn run(config: &Config, text: &str, conversation: Option<ConversationId>) -> Result<()> {
    let session = open_session(config)?;
    let outcome = match conversation {
        Some(id) => session.send(id, text).await,
        None => session.send_active(text).await,
    };

    match outcome {
        SendOutcome::Sent(turn) => {
            println!("{}", turn.reply_text());
            if let TurnOutcome::Failed(err) = &turn {
                eprintln!("Warning: request failed: {err}");
            }
            Ok(())
        }
        SendOutcome::Skipped(SkipReason::EmptyInput) => bail!("Message is empty"),
        SendOutcome::Skipped(SkipReason::UnknownConversation) => match conversation {
            Some(id) => bail!("Conversation {id} not found"),
            None => bail!("No active conversation. Run `cardiochat threads new` to start one."),
        },
        SendOutcome::Skipped(SkipReason::Busy) => {
            bail!("A reply is still pending for this conversation")
        }
    }
}
