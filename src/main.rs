//! # Shelf CLI (`shelf`)
//!
//! Manage a local bookshelf, index it into OpenSearch, search it, and
//! serve the retrieval API.
//!
//! ## Usage
//!
//! ```bash
//! shelf --config ./config/shelf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shelf init` | Create the record store and run schema migrations |
//! | `shelf add <file-or-url>` | Add a document to an owner's bookshelf |
//! | `shelf remove <id>` | Delete a document and its index entries |
//! | `shelf list` | List an owner's documents |
//! | `shelf index <id>` | Index one document |
//! | `shelf deindex <id>` | Remove one document from the index |
//! | `shelf sync` | Index every document of an owner (or of all owners) |
//! | `shelf search "<query>"` | Retrieve passages for an owner |
//! | `shelf serve` | Start the HTTP API |
//!
//! Log verbosity follows `SHELF_LOG` (an `EnvFilter` directive) or
//! `-v` / `-q`.

use bookshelf_retrieval::{commands, config, migrate, server};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Shelf: per-user document retrieval with an OpenSearch index and an
/// in-process fallback.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/shelf.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "shelf", version, about = "Per-user document retrieval")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/shelf.toml")]
    config: PathBuf,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the record store schema.
    ///
    /// Creates the SQLite file and the documents table. Idempotent.
    Init,

    /// Add a document to an owner's library.
    ///
    /// Local files are embedded in the record (base64); http(s) URLs are
    /// stored as the document's storage URL and downloaded when needed.
    Add {
        /// Local file path or http(s) URL.
        source: String,
        /// Owning user id.
        #[arg(long)]
        owner: String,
        /// Display title (defaults to the file name).
        #[arg(long)]
        title: Option<String>,
        /// Attach the document to a chat session instead of the bookshelf.
        #[arg(long)]
        session: Option<String>,
        /// Declared file type (`pdf`, `text`, ...); inferred from the extension if omitted.
        #[arg(long = "type")]
        file_type: Option<String>,
        /// Document id (a random UUID if omitted).
        #[arg(long)]
        id: Option<String>,
    },

    /// Delete a document record and remove it from the index.
    Remove {
        /// Document id.
        id: String,
    },

    /// List an owner's documents.
    List {
        #[arg(long)]
        owner: String,
        /// List a session's documents instead of the bookshelf.
        #[arg(long)]
        session: Option<String>,
    },

    /// Fetch, chunk and index one document.
    Index {
        /// Document id.
        id: String,
    },

    /// Remove every chunk of a document from the index.
    Deindex {
        /// Document id.
        id: String,
    },

    /// Index every document of an owner.
    ///
    /// Without `--owner`, every owner in the record store is synced.
    Sync {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },

    /// Retrieve passages for a query.
    ///
    /// Uses the index when it has hits for the owner, otherwise scans the
    /// owner's documents. Only the first pages of large PDFs are scanned in
    /// a one-off CLI run.
    Search {
        /// The search query.
        query: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        session: Option<String>,
        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("SHELF_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Record store initialized successfully.");
        }
        Commands::Add {
            source,
            owner,
            title,
            session,
            file_type,
            id,
        } => {
            commands::run_add(
                &cfg,
                commands::AddOptions {
                    source,
                    owner,
                    title,
                    session,
                    file_type,
                    id,
                },
            )
            .await?;
        }
        Commands::Remove { id } => {
            commands::run_remove(&cfg, &id).await?;
        }
        Commands::List { owner, session } => {
            commands::run_list(&cfg, &owner, session).await?;
        }
        Commands::Index { id } => {
            commands::run_index(&cfg, &id).await?;
        }
        Commands::Deindex { id } => {
            commands::run_deindex(&cfg, &id).await?;
        }
        Commands::Sync { owner, session } => {
            commands::run_sync(&cfg, owner, session).await?;
        }
        Commands::Search {
            query,
            owner,
            session,
            limit,
        } => {
            commands::run_search(&cfg, &query, &owner, session, limit).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
