//! # Stateful Agent CLI (`stateful-agent`)
//!
//! Runs the HTTP backend for the browser extension and exposes the same
//! operations for local use.
//!
//! ## Usage
//!
//! ```bash
//! stateful-agent --config ./config/agent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `init` | Create the SQLite database, run migrations, create the corpus directory |
//! | `serve` | Start the HTTP server |
//! | `upload <paths..>` | Ingest local files into the corpus |
//! | `files` | List stored documents |
//! | `delete <name>` | Remove a document and its chunks |
//! | `ask "<message>"` | Answer a message from the command line |
//! | `keys status` | Show which credentials are stored |
//! | `keys set` | Store credentials (does not rebuild the agent) |
//! | `reinit` | Rebuild the agent from stored credentials |
//! | `reindex` | Re-embed chunks produced by a previous embedding model |

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stateful_agent::app::App;
use stateful_agent::config;
use stateful_agent::db;
use stateful_agent::logging;
use stateful_agent::models::{CredentialUpdate, PageContext, UploadedFile};
use stateful_agent::server;

/// Backend for a browser-side assistant that answers from your documents.
#[derive(Parser)]
#[command(name = "stateful-agent", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/agent.toml")]
    config: PathBuf,

    /// Log filter (e.g. `info`, `debug`, `stateful_agent=trace`). Overrides `RUST_LOG`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and corpus directory.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP server.
    ///
    /// Seeds credentials from the environment on first run and builds the
    /// agent before accepting requests.
    Serve,

    /// Ingest local files.
    Upload {
        /// Files to ingest. Each is stored under its file name.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List stored documents.
    Files,

    /// Delete a stored document.
    Delete {
        /// File name as shown by `files`.
        name: String,
    },

    /// Ask a question.
    Ask {
        message: String,

        /// Title of the page the question is about.
        #[arg(long, default_value = "")]
        title: String,

        /// Text excerpt of the page the question is about.
        #[arg(long, default_value = "")]
        excerpt: String,

        /// Also print the retrieved chunks.
        #[arg(long)]
        show_sources: bool,
    },

    /// Manage stored credentials.
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Rebuild the agent from the stored credentials.
    Reinit,

    /// Re-embed chunks produced by a different embedding model.
    Reindex,
}

#[derive(Subcommand)]
enum KeysAction {
    /// Show which credentials are set. Values are never printed.
    Status,
    /// Store one or more credentials.
    Set {
        #[arg(long)]
        openai_key: Option<String>,
        #[arg(long)]
        composio_key: Option<String>,
        #[arg(long)]
        embedding_model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref())?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::open(&cfg).await?;
            std::fs::create_dir_all(&cfg.storage.corpus_dir).with_context(|| {
                format!(
                    "Failed to create corpus directory: {}",
                    cfg.storage.corpus_dir.display()
                )
            })?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let app = App::open(cfg).await?;
            app.start().await?;
            server::run_server(app).await?;
        }
        Commands::Upload { paths } => {
            let mut files = Vec::with_capacity(paths.len());
            for path in &paths {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("Not a file path: {}", path.display()))?;
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                files.push(UploadedFile::new(name, bytes));
            }

            let app = App::open(cfg).await?;
            app.start().await?;

            let outcomes = app.pipeline.ingest(files).await;
            let mut failed = 0;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(chunks) => println!("  {}: {} chunks", outcome.name, chunks),
                    Err(e) => {
                        failed += 1;
                        println!("  {}: FAILED ({}) {}", outcome.name, e.code(), e);
                    }
                }
            }
            println!("{} ingested, {} failed", outcomes.len() - failed, failed);
            if failed > 0 {
                bail!("{} file(s) failed to ingest", failed);
            }
        }
        Commands::Files => {
            let app = App::open(cfg).await?;
            let files = app.pipeline.list().await?;
            if files.is_empty() {
                println!("No documents stored.");
            }
            for f in files {
                println!("{:>10}  {}  {}", f.size, f.modified, f.name);
            }
        }
        Commands::Delete { name } => {
            let app = App::open(cfg).await?;
            if app.pipeline.delete(&name).await? {
                println!("Deleted {}", name);
            } else {
                bail!("No document named '{}'", name);
            }
        }
        Commands::Ask {
            message,
            title,
            excerpt,
            show_sources,
        } => {
            let app = App::open(cfg).await?;
            app.start().await?;

            let context = PageContext {
                title,
                description: String::new(),
                excerpt,
            };
            let turn = app.chat.respond(&message, context).await?;
            println!("{}", turn.response);

            if show_sources {
                println!();
                for chunk in &turn.retrieved {
                    println!("  [{:.3}] {} #{}", chunk.score, chunk.filename, chunk.seq);
                }
            }
        }
        Commands::Keys { action } => {
            let app = App::open(cfg).await?;
            match action {
                KeysAction::Status => {
                    let status = app.credentials.status().await?;
                    println!("openai_key:      {}", set_or_missing(status.openai_key));
                    println!("composio_key:    {}", set_or_missing(status.composio_key));
                    println!("embedding_model: {}", set_or_missing(status.embedding_model));
                }
                KeysAction::Set {
                    openai_key,
                    composio_key,
                    embedding_model,
                } => {
                    app.credentials
                        .update(CredentialUpdate {
                            openai_key,
                            composio_key,
                            embedding_model,
                        })
                        .await?;
                    println!("Credentials saved. Run `reinit` to apply them.");
                }
            }
        }
        Commands::Reinit => {
            let app = App::open(cfg).await?;
            app.credentials.seed_from_env().await?;
            let instance = app.lifecycle.reinitialize().await?;
            println!("Agent ready: {}", instance.id());
        }
        Commands::Reindex => {
            let app = App::open(cfg).await?;
            app.start().await?;
            let report = app.pipeline.reembed_stale().await?;
            println!(
                "Re-embedded {} chunk(s) with {} ({} failed)",
                report.reembedded, report.model, report.failed
            );
        }
    }

    Ok(())
}

fn set_or_missing(present: bool) -> &'static str {
    if present {
        "set"
    } else {
        "missing"
    }
}
