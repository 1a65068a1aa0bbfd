use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::adapters::config::Settings;
use crate::adapters::emitter::ChannelEmitter;

use super::commands::{branches, conversations, shared::AppContext};

/// Branching assistant conversations on the command line. Every command prints JSON.
#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the conversation database (defaults to ~/.forkchat/forkchat.db)
    #[arg(long, env = "FORKCHAT_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Model to use for new conversations and replies (e.g. 'openai/gpt-4o')
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// List conversations, newest first
    List,
    /// Create an empty conversation
    New {
        #[arg(long)]
        title: Option<String>,
    },
    /// Send a message at the tail of the active path
    Send {
        /// Conversation to continue; a new one is started when omitted
        #[arg(short, long)]
        conversation: Option<String>,
        /// End the active path at this message instead of the default leaf
        #[arg(long)]
        leaf: Option<String>,
        content: String,
    },
    /// Answer an earlier message differently, starting a new branch below it
    Fork {
        #[arg(short, long)]
        conversation: String,
        /// Message on the active path to branch from
        #[arg(short, long)]
        parent: String,
        #[arg(long)]
        leaf: Option<String>,
        content: String,
    },
    /// Show the messages on the active path
    Path {
        #[arg(short, long)]
        conversation: String,
        #[arg(long)]
        leaf: Option<String>,
    },
    /// List branch points and their alternatives
    Branches {
        #[arg(short, long)]
        conversation: String,
        #[arg(long)]
        leaf: Option<String>,
    },
    /// Pick a child at a branch point and follow its newest descent
    Select {
        #[arg(short, long)]
        conversation: String,
        #[arg(long)]
        leaf: Option<String>,
        /// Branch point on the active path
        #[arg(long = "at")]
        branch_point: String,
        child: String,
    },
    /// Replace the active path with an explicit root-first chain of ids
    Switch {
        #[arg(short, long)]
        conversation: String,
        #[arg(required = true)]
        path: Vec<String>,
    },
    /// Compute node positions and edges for the conversation overview
    Layout {
        #[arg(short, long)]
        conversation: String,
        #[arg(long)]
        leaf: Option<String>,
        /// Show full message text instead of excerpts
        #[arg(long)]
        full: bool,
        /// Expand an individual message (repeatable)
        #[arg(long = "expand", value_name = "MESSAGE_ID")]
        expanded: Vec<String>,
    },
    /// Rename a conversation
    Rename {
        #[arg(short, long)]
        conversation: String,
        title: String,
    },
    /// Delete a conversation (soft delete)
    Delete {
        #[arg(short, long)]
        conversation: String,
    },
    /// Delete a single message (soft delete; its branch stays indexed)
    DeleteMessage { message: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{rendered}");
    Ok(())
}

async fn dispatch(ctx: &AppContext, command: Commands) -> Result<(), String> {
    match command {
        Commands::List => print_json(&conversations::list_conversations(ctx)?),
        Commands::New { title } => print_json(&conversations::create_conversation(ctx, title)?),
        Commands::Send {
            conversation,
            leaf,
            content,
        } => print_json(
            &conversations::send_message(ctx, conversation.as_deref(), leaf.as_deref(), &content)
                .await?,
        ),
        Commands::Fork {
            conversation,
            parent,
            leaf,
            content,
        } => print_json(
            &conversations::fork_message(ctx, &conversation, &parent, leaf.as_deref(), &content)
                .await?,
        ),
        Commands::Path { conversation, leaf } => print_json(
            &conversations::get_conversation_messages(ctx, &conversation, leaf.as_deref())?,
        ),
        Commands::Branches { conversation, leaf } => {
            print_json(&branches::list_branches(ctx, &conversation, leaf.as_deref())?)
        }
        Commands::Select {
            conversation,
            leaf,
            branch_point,
            child,
        } => print_json(&branches::select_branch(
            ctx,
            &conversation,
            leaf.as_deref(),
            &branch_point,
            &child,
        )?),
        Commands::Switch { conversation, path } => {
            print_json(&branches::switch_branch(ctx, &conversation, &path)?)
        }
        Commands::Layout {
            conversation,
            leaf,
            full,
            expanded,
        } => print_json(&branches::compute_layout(
            ctx,
            &conversation,
            leaf.as_deref(),
            full,
            &expanded,
        )?),
        Commands::Rename {
            conversation,
            title,
        } => conversations::rename_conversation(ctx, &conversation, &title),
        Commands::Delete { conversation } => conversations::delete_conversation(ctx, &conversation),
        Commands::DeleteMessage { message } => conversations::delete_message(ctx, &message),
    }
}

pub fn run(cli: Cli) -> Result<(), String> {
    let mut settings = Settings::load_global();
    if let Some(db) = cli.db {
        settings.db_path = Some(db.to_string_lossy().into_owned());
    }
    if let Some(model) = cli.model.as_deref() {
        settings.set_model(model)?;
    }

    let (emitter, mut events) = ChannelEmitter::channel();
    let ctx = AppContext::from_settings(settings, Arc::new(emitter))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start async runtime: {e}"))?;
    let result = runtime.block_on(dispatch(&ctx, cli.command));

    while let Ok(event) = events.try_recv() {
        log::info!(
            "session event: {}",
            serde_json::to_string(&event).unwrap_or_default()
        );
    }
    result
}
