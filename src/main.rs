//! # Memory Harness CLI (`mem`)
//!
//! ## Usage
//!
//! ```bash
//! mem --config ./config/mem.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mem init` | Create (or bootstrap) the store and its git repository |
//! | `mem add` | Create a memory |
//! | `mem get <id>` | Print one memory |
//! | `mem update <id>` | Edit fields of a memory |
//! | `mem delete <id>` | Remove a memory |
//! | `mem list` | List memories, newest first |
//! | `mem search "<query>"` | Hybrid search |
//! | `mem sync` | Pull from and push to the remote |
//! | `mem reindex` | Rebuild the semantic index from disk |
//! | `mem stats` | Counts and sync status |
//! | `mem watch` | Keep the index and remote in step until Ctrl-C |
//! | `mem completions <shell>` | Print shell completions |
//!
//! Logging goes to stderr and is controlled by `MEM_LOG` (default `warn`).

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use memory_harness::commands::{self, AddArgs, UpdateArgs};
use memory_harness::config;
use memory_harness::models::ListFilter;

/// Memory Harness — a local-first personal knowledge store.
#[derive(Parser)]
#[command(
    name = "mem",
    about = "Memory Harness — a local-first personal knowledge store",
    version,
    long_about = "Memory Harness keeps memories as markdown files with YAML frontmatter, \
    versions them in git (optionally mirrored to a remote), and retrieves them with hybrid \
    semantic + lexical search."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mem.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the store.
    ///
    /// Creates the git repository and skeleton, or bootstraps from the
    /// configured remote. Safe to run repeatedly.
    Init,

    /// Create a memory and print its id.
    Add {
        #[arg(long)]
        title: String,
        /// Body text, or `-` to read stdin.
        #[arg(long)]
        content: Option<String>,
        /// Slash-delimited type, e.g. `travel/japan/2024`.
        #[arg(long = "type", default_value = "note")]
        entity_type: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Id of a related memory.
        #[arg(long = "relation")]
        relations: Vec<String>,
        /// Expiry timestamp (RFC 3339).
        #[arg(long)]
        expires: Option<String>,
        /// Store under this directory instead of the one derived from `--type`.
        #[arg(long)]
        dir: Option<String>,
    },

    /// Print a memory.
    Get {
        id: String,
        #[arg(long)]
        json: bool,
    },

    /// Edit a memory. The file stays where it is.
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        /// Body text, or `-` to read stdin.
        #[arg(long)]
        content: Option<String>,
        #[arg(long = "type")]
        entity_type: Option<String>,
        /// Replace tags (repeatable).
        #[arg(long = "tag", conflicts_with = "clear_tags")]
        tags: Vec<String>,
        #[arg(long)]
        clear_tags: bool,
        /// Replace relations (repeatable).
        #[arg(long = "relation")]
        relations: Vec<String>,
        #[arg(long, conflicts_with = "clear_expires")]
        expires: Option<String>,
        #[arg(long)]
        clear_expires: bool,
    },

    /// Delete a memory.
    Delete { id: String },

    /// List memories, most recently updated first.
    List {
        /// Exact type match.
        #[arg(long = "type")]
        entity_type: Option<String>,
        /// Require this tag (repeatable; all must match).
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        json: bool,
    },

    /// Hybrid search over memories.
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long = "type")]
        entity_type: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        json: bool,
    },

    /// Pull remote changes, then push local ones.
    Sync,

    /// Rebuild the semantic index from the file tree.
    ///
    /// Also purges index entries for files deleted outside the store.
    Reindex,

    /// Show memory and index counts and sync status.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Watch the file tree and sync in the background until Ctrl-C.
    Watch,

    /// Print shell completions to stdout.
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MEM_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "mem", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Add {
            title,
            content,
            entity_type,
            tags,
            relations,
            expires,
            dir,
        } => {
            let args = AddArgs {
                title,
                content,
                entity_type,
                tags,
                relations,
                expires,
                directory: dir,
            };
            commands::run_add(&cfg, args).await?;
        }
        Commands::Get { id, json } => commands::run_get(&cfg, &id, json).await?,
        Commands::Update {
            id,
            title,
            content,
            entity_type,
            tags,
            clear_tags,
            relations,
            expires,
            clear_expires,
        } => {
            let tags = if clear_tags {
                Some(Vec::new())
            } else if tags.is_empty() {
                None
            } else {
                Some(tags)
            };
            let args = UpdateArgs {
                title,
                content,
                entity_type,
                tags,
                relations: (!relations.is_empty()).then_some(relations),
                expires,
                clear_expires,
            };
            commands::run_update(&cfg, &id, args).await?;
        }
        Commands::Delete { id } => commands::run_delete(&cfg, &id).await?,
        Commands::List {
            entity_type,
            tags,
            json,
        } => {
            let filter = ListFilter { entity_type, tags };
            commands::run_list(&cfg, filter, json).await?;
        }
        Commands::Search {
            query,
            limit,
            entity_type,
            tags,
            json,
        } => {
            let filter = ListFilter { entity_type, tags };
            commands::run_search(&cfg, &query, limit, filter, json).await?;
        }
        Commands::Sync => commands::run_sync(&cfg).await?,
        Commands::Reindex => commands::run_reindex(&cfg).await?,
        Commands::Stats { json } => commands::run_stats(&cfg, json).await?,
        Commands::Watch => commands::run_watch(&cfg).await?,
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
