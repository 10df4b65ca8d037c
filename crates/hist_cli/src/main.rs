//! mcpdiff - review, accept, and reject LM workspace edits.

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use hist_core::{HistoryError, HistoryStore};
use std::path::PathBuf;
use std::time::Duration;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "mcpdiff")]
#[command(about = "Review edit history recorded by the filesystem tool-server", long_about = None)]
#[command(version)]
struct Cli {
    /// Workspace root (default: walk upward from the current directory)
    #[arg(short = 'w', long, global = true)]
    workspace: Option<PathBuf>,

    /// Verbose diagnostic logging (MCP_DEBUG=1 does the same)
    #[arg(long, global = true)]
    verbose: bool,

    /// Lock acquisition timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Reclaim stale locks before running the command
    #[arg(long, global = true)]
    force_cleanup: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List history entries, newest first
    #[command(visible_alias = "st")]
    Status {
        /// Only entries of this conversation (id prefix or suffix)
        #[arg(long = "conv")]
        conversation: Option<String>,
        /// Only entries whose path contains this fragment
        #[arg(long)]
        file: Option<String>,
        /// Only entries with this status (pending, accepted, rejected)
        #[arg(long)]
        status: Option<String>,
        /// Only entries with this operation (create, replace, edit, delete, move)
        #[arg(long = "op")]
        operation: Option<String>,
        /// Only entries younger than this (e.g. 30s, 5m, 1h, 3d1h)
        #[arg(long)]
        time: Option<String>,
        /// Maximum entries to list; 0 removes the limit
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },

    /// Print the diff(s) of an edit or a whole conversation
    #[command(visible_aliases = ["sh", "s"])]
    Show {
        /// Edit or conversation id (prefixes accepted)
        id: String,
    },

    /// Mark edits accepted and re-materialize the affected files
    #[command(visible_alias = "a")]
    Accept {
        #[command(flatten)]
        target: DecisionTarget,
    },

    /// Mark edits rejected and re-materialize the affected files
    #[command(visible_alias = "r")]
    Reject {
        #[command(flatten)]
        target: DecisionTarget,
    },

    /// Walk pending edits interactively, oldest first
    #[command(visible_alias = "v")]
    Review {
        /// Restrict to one conversation (id prefix or suffix)
        #[arg(short = 'c', long = "conv")]
        conversation: Option<String>,
    },

    /// Remove stale locks left behind by dead processes
    #[command(visible_alias = "clean")]
    Cleanup,
}

/// Either one edit or one conversation, never both.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct DecisionTarget {
    /// Edit id (prefix accepted)
    #[arg(short = 'e', long = "edit")]
    edit: Option<String>,

    /// Conversation id (prefix or suffix accepted)
    #[arg(short = 'c', long = "conv")]
    conversation: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("{} {err:#}", style("error:").red().bold());
        if let Some(history_err) = err.downcast_ref::<HistoryError>() {
            if let Some(hint) = history_err.recovery_suggestion() {
                eprintln!("  {} {hint}", style("hint:").cyan());
            }
        }
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    let store = open_store(&cli)?;

    if cli.force_cleanup {
        let cleaned = hist_core::lock::cleanup_stale_locks(store.history_root(), Duration::ZERO)?;
        if cleaned > 0 {
            println!(
                "{} Reclaimed {cleaned} stale lock(s) before starting.",
                style("→").cyan()
            );
        }
    }

    match cli.command {
        Commands::Status {
            conversation,
            file,
            status,
            operation,
            time,
            limit,
        } => commands::status::run(&store, conversation, file, status, operation, time, limit),
        Commands::Show { id } => commands::show::run(&store, &id),
        Commands::Accept { target } => {
            commands::decision::run(&store, target.edit, target.conversation, true)
        }
        Commands::Reject { target } => {
            commands::decision::run(&store, target.edit, target.conversation, false)
        }
        Commands::Review { conversation } => commands::review::run(&store, conversation),
        Commands::Cleanup => commands::cleanup::run(&store),
    }
}

/// Locates and opens the history store, applying global overrides.
fn open_store(cli: &Cli) -> Result<HistoryStore> {
    let workspace = match &cli.workspace {
        Some(path) => path.clone(),
        None => {
            let cwd = std::env::current_dir()?;
            HistoryStore::find_workspace_root(&cwd).ok_or_else(|| {
                anyhow!(
                    "no {} found between {} and the filesystem root; pass -w/--workspace",
                    hist_core::HISTORY_DIR,
                    cwd.display()
                )
            })?
        }
    };

    let mut store = HistoryStore::open(&workspace)?;
    if let Some(timeout) = cli.timeout {
        store.set_lock_timeout(timeout);
    }
    Ok(store)
}

/// Distinct exit codes per error category.
fn exit_code(err: &anyhow::Error) -> i32 {
    let Some(history_err) = err.downcast_ref::<HistoryError>() else {
        return 1;
    };
    match history_err {
        HistoryError::PathOutsideWorkspace { .. }
        | HistoryError::InvalidSelector { .. }
        | HistoryError::ConflictingEdit { .. }
        | HistoryError::AnchorNotFound { .. }
        | HistoryError::FileMissing { .. }
        | HistoryError::FileExists { .. }
        | HistoryError::MalformedEntry { .. }
        | HistoryError::NoMatch(_)
        | HistoryError::AmbiguousId { .. } => 2,
        HistoryError::LockTimeout { .. } | HistoryError::StaleLockRetained { .. } => 3,
        HistoryError::HashMismatchExternal { .. } | HistoryError::MissingCheckpoint { .. } => 4,
        HistoryError::PatchContextMismatch { .. } | HistoryError::MalformedDiff(_) => 5,
        HistoryError::InternalHashDrift { .. } => 6,
        HistoryError::Io(_) | HistoryError::Serialization(_) | HistoryError::ConfigError(_) => 1,
    }
}

/// Tracing to stderr; RUST_LOG wins, then --verbose / MCP_DEBUG=1, then warn.
fn init_tracing(verbose: bool) {
    let debug_env = std::env::var("MCP_DEBUG").map(|v| v == "1").unwrap_or(false);
    let default_level = if verbose || debug_env { "debug" } else { "warn" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}
