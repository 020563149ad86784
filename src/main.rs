use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use huddle::model::{MessageKind, ROOM};
use huddle::output::Format;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "huddle",
    version,
    about = "Git-native message log for multi-agent chat"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, global = true, hide = true)]
    pretty: bool,
    /// Act as this agent (defaults to $HUDDLE_AGENT)
    #[arg(long = "as", global = true)]
    agent: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new .huddle/ directory in the current directory
    Init,
    /// Post a message
    Post {
        /// Message body
        body: String,
        /// Home: room, or a thread ID, prefix, or path
        #[arg(long = "in", default_value = ROOM)]
        home: String,
        /// Message this one replies to
        #[arg(long)]
        reply_to: Option<String>,
        #[arg(long, value_enum, default_value = "user")]
        kind: MessageKind,
    },
    /// Replace a message body
    Edit {
        id: String,
        body: String,
        /// Why the message was edited
        #[arg(long)]
        reason: Option<String>,
    },
    /// Soft-delete a message
    Delete { id: String },
    /// Move a message to another home
    Move {
        id: String,
        #[arg(long)]
        to: String,
    },
    /// Add a reaction
    React { id: String, label: String },
    /// Remove a reaction
    Unreact { id: String, label: String },
    /// Display a single message
    Show {
        id: String,
        /// Print the creation record as first written
        #[arg(long)]
        original: bool,
    },
    /// List and filter messages
    List {
        #[arg(long = "in")]
        home: Option<String>,
        /// Only messages at or after this RFC 3339 time
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Only messages at or before this RFC 3339 time
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        /// Only messages carrying this reaction
        #[arg(long)]
        label: Option<String>,
        /// Only messages mentioning this agent
        #[arg(long)]
        mentions: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Keep only the newest N
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Manage threads
    Thread {
        #[command(subcommand)]
        action: ThreadAction,
    },
    /// Subscribe to a thread
    Subscribe { thread: String },
    /// Unsubscribe from a thread
    Unsubscribe { thread: String },
    /// Favorite a message
    Fave { id: String },
    /// Remove a favorite
    Unfave { id: String },
    /// Pin a message in its home
    Pin { id: String },
    /// Unpin a message
    Unpin { id: String },
    /// Mark a home read up to a message
    Read { home: String, id: String },
    /// Count unread messages in a home
    Unread { home: String },
    /// Discard old messages from the live log, leaving one tombstone
    Prune {
        /// Scope: room (default) or a thread
        #[arg(long = "in")]
        home: Option<String>,
        /// Keep the newest N messages (defaults to config default_keep)
        #[arg(long)]
        keep: Option<usize>,
        /// Discard everything in scope and clear the archive
        #[arg(long)]
        all: bool,
        /// Discard messages carrying this reaction
        #[arg(long)]
        label: Option<String>,
        /// Report what would be discarded without writing
        #[arg(long)]
        dry_run: bool,
        /// Skip the git guardrails
        #[arg(long)]
        force: bool,
    },
    /// Rebuild the index from the event log
    Reindex,
    /// Compare the index against a replay of the log
    Verify {
        /// Rebuild the index when they disagree
        #[arg(long)]
        fix: bool,
    },
    /// Stream new messages
    Watch {
        #[arg(long = "in")]
        home: Option<String>,
        /// Poll interval in milliseconds
        #[arg(long)]
        interval: Option<u64>,
        /// Stop after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ThreadAction {
    /// Create a thread
    Create {
        name: String,
        /// Parent thread
        #[arg(long)]
        parent: Option<String>,
        /// Message the thread hangs off
        #[arg(long)]
        anchor: Option<String>,
    },
    /// Start a thread anchored on a message
    Sub { anchor: String, name: String },
    Rename { thread: String, name: String },
    Archive { thread: String },
    Reopen { thread: String },
    /// Move a thread under another, or to the root without --to
    Reparent {
        thread: String,
        #[arg(long)]
        to: Option<String>,
    },
    List,
    Tree,
}

fn run(cli: Cli, format: Format) -> huddle::error::Result<()> {
    // Every command except `init` runs inside an existing project.
    let root = huddle::store::repo::find_repo_root;
    let agent = huddle::agent::current_agent(cli.agent.as_deref());

    match cli.command {
        Commands::Init => huddle::commands::init::run(&std::env::current_dir()?),
        Commands::Post {
            body,
            home,
            reply_to,
            kind,
        } => huddle::commands::message::post(&root()?, body, &home, reply_to, kind, &agent, format),
        Commands::Edit { id, body, reason } => {
            huddle::commands::message::edit(&root()?, &id, &body, reason, &agent, format)
        }
        Commands::Delete { id } => huddle::commands::message::delete(&root()?, &id, &agent, format),
        Commands::Move { id, to } => huddle::commands::message::move_to(&root()?, &id, &to, format),
        Commands::React { id, label } => {
            huddle::commands::message::react(&root()?, &id, &label, &agent, false, format)
        }
        Commands::Unreact { id, label } => {
            huddle::commands::message::react(&root()?, &id, &label, &agent, true, format)
        }
        Commands::Show { id, original } => {
            huddle::commands::show::run(&root()?, &id, original, format)
        }
        Commands::List {
            home,
            since,
            until,
            label,
            mentions,
            author,
            limit,
        } => huddle::commands::list::run(
            &root()?, home, since, until, label, mentions, author, limit, &agent, format,
        ),
        Commands::Thread { action } => match action {
            ThreadAction::Create {
                name,
                parent,
                anchor,
            } => huddle::commands::thread::create(&root()?, &name, parent, anchor, &agent, format),
            ThreadAction::Sub { anchor, name } => {
                huddle::commands::thread::sub(&root()?, &anchor, &name, &agent, format)
            }
            ThreadAction::Rename { thread, name } => {
                huddle::commands::thread::rename(&root()?, &thread, &name, format)
            }
            ThreadAction::Archive { thread } => {
                huddle::commands::thread::archive(&root()?, &thread, format)
            }
            ThreadAction::Reopen { thread } => {
                huddle::commands::thread::reopen(&root()?, &thread, format)
            }
            ThreadAction::Reparent { thread, to } => {
                huddle::commands::thread::reparent(&root()?, &thread, to, format)
            }
            ThreadAction::List => huddle::commands::thread::list(&root()?, format),
            ThreadAction::Tree => huddle::commands::thread::tree(&root()?, format),
        },
        Commands::Subscribe { thread } => {
            huddle::commands::membership::subscribe(&root()?, &thread, &agent, true, format)
        }
        Commands::Unsubscribe { thread } => {
            huddle::commands::membership::subscribe(&root()?, &thread, &agent, false, format)
        }
        Commands::Fave { id } => huddle::commands::membership::fave(&root()?, &id, &agent, true, format),
        Commands::Unfave { id } => {
            huddle::commands::membership::fave(&root()?, &id, &agent, false, format)
        }
        Commands::Pin { id } => huddle::commands::membership::pin(&root()?, &id, &agent, true, format),
        Commands::Unpin { id } => {
            huddle::commands::membership::pin(&root()?, &id, &agent, false, format)
        }
        Commands::Read { home, id } => {
            huddle::commands::read::mark(&root()?, &home, &id, &agent, format)
        }
        Commands::Unread { home } => huddle::commands::read::unread(&root()?, &home, &agent, format),
        Commands::Prune {
            home,
            keep,
            all,
            label,
            dry_run,
            force,
        } => huddle::commands::prune::run(&root()?, home, keep, all, label, dry_run, force, format),
        Commands::Reindex => huddle::commands::reindex::run(&root()?, format),
        Commands::Verify { fix } => huddle::commands::verify::run(&root()?, fix, format),
        Commands::Watch {
            home,
            interval,
            timeout,
        } => huddle::commands::watch::run(
            &root()?,
            home,
            interval.map(Duration::from_millis),
            timeout,
            format,
        ),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("HUDDLE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    if let Err(e) = run(cli, format) {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            _ => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}
