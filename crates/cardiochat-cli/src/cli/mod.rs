//! CLI entry and dispatch.

use anyhow::{Context, Result};
use cardiochat_core::config::{self, paths};
use cardiochat_core::core::session::ConversationId;
use cardiochat_core::logging;
use clap::Parser;

mod commands;

#[derive(Parser)]
#[command(name = "cardiochat")]
#[command(version)]
#[command(about = "Cardiovascular symptom chat assistant with saved conversations")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Starts the interactive chat loop (default)
    Chat,
    /// Sends one message and prints the reply
    Send {
        /// The message to send
        #[arg(value_name = "TEXT")]
        text: String,

        /// Conversation to send to (default: the active one)
        #[arg(short, long, value_name = "ID")]
        conversation: Option<ConversationId>,
    },
    /// Manage saved conversations
    Threads {
        #[command(subcommand)]
        command: ThreadCommands,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ThreadCommands {
    /// Lists saved conversations
    List,
    /// Shows the messages of a conversation
    Show {
        #[arg(value_name = "ID")]
        id: ConversationId,
    },
    /// Starts a new conversation and makes it active
    New,
    /// Makes a conversation active
    Select {
        #[arg(value_name = "ID")]
        id: ConversationId,
    },
    /// Deletes a conversation
    Delete {
        #[arg(value_name = "ID")]
        id: ConversationId,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Set the model used for new requests
    SetModel {
        #[arg(value_name = "MODEL")]
        model: String,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    // logging is best effort; stdout belongs to the transcript
    let _log_guard = match logging::init(&paths::logs_dir()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e:#}");
            None
        }
    };
    tracing::debug!(home = %paths::cardiochat_home().display(), "starting");

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let config = config::Config::load().context("load config")?;
            commands::chat::run(&config).await
        }
        Commands::Send { text, conversation } => {
            let config = config::Config::load().context("load config")?;
            commands::send::run(&config, &text, conversation).await
        }
        Commands::Threads { command } => match command {
            ThreadCommands::List => commands::threads::list(),
            ThreadCommands::Show { id } => commands::threads::show(id),
            ThreadCommands::New => commands::threads::new(),
            ThreadCommands::Select { id } => commands::threads::select(id),
            ThreadCommands::Delete { id, yes } => commands::threads::delete(id, yes),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::SetModel { model } => commands::config::set_model(&model),
        },
    }
}
