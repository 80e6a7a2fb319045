//! # Deep Research CLI (`dr`)
//!
//! ## Usage
//!
//! ```bash
//! dr --config ./config/dr.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dr init` | Create the SQLite database and schema |
//! | `dr serve` | Start the HTTP API and backend proxy |
//! | `dr research "<query>"` | Run one research turn and print the result |
//! | `dr history list` | List stored PDFs and Google Doc exports |
//! | `dr history get <id> --out FILE` | Write a stored PDF to disk |
//! | `dr history delete <id>` | Delete a stored PDF |
//! | `dr settings get <key>` / `set <key> <value>` | Read or write a setting |
//! | `dr upload <file-or-url>` | Add a reference file to the knowledge vector store |
//!
//! ## Examples
//!
//! ```bash
//! dr init
//! dr research "Explain entropy" --json > entropy.json
//! dr research "Explain entropy" --continue-from entropy.json --pdf
//! dr history list --kind pdf
//! dr upload ./papers/clausius-1865.pdf
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use deep_research::config::{self, Config};
use deep_research::llm::HttpModelClient;
use deep_research::models::{format_ts_iso, HistoryKind, HistoryPayload, ResearchSession};
use deep_research::pdf::export_pdf;
use deep_research::research::{render_content, run_research, ResearchRequest};
use deep_research::store::{HistoryStore, SqliteHistoryStore};
use deep_research::upload::{FileUploader, UploadSource};
use deep_research::{db, migrate, server};

/// Deep Research: a research assistant that asks a model for a cited paper
/// and exports it to PDF or Google Docs.
#[derive(Parser)]
#[command(
    name = "dr",
    about = "Deep Research: cited research papers from a language model, exported to PDF or Google Docs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Run one research turn and print the session.
    Research {
        /// The research question.
        query: String,

        /// Sampling temperature, clamped to [0.1, 1.0].
        #[arg(long)]
        temperature: Option<f64>,

        /// Continue a session previously printed with `--json`.
        #[arg(long, value_name = "FILE")]
        continue_from: Option<PathBuf>,

        /// Also render a PDF, record it in history, and write it to the
        /// current directory.
        #[arg(long)]
        pdf: bool,

        /// Print the session as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Inspect and manage export history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Read or write user settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Upload a local file or a URL to the knowledge vector store.
    ///
    /// The vector store is created on first use and its id kept in the
    /// `vector_store_id` setting.
    Upload {
        /// Path to a local file, or an http(s) URL.
        source: String,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List history entries, newest first.
    List {
        /// Only show one kind: `pdf` or `doc`.
        #[arg(long)]
        kind: Option<HistoryKind>,
    },
    /// Write a stored PDF to a file.
    Get {
        id: i64,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Delete a stored PDF.
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum SettingsAction {
    Get { key: String },
    Set { key: String, value: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_store(cfg: &Config) -> Result<SqliteHistoryStore> {
    let pool = db::connect(cfg).await?;
    migrate::apply_schema(&pool).await?;
    Ok(SqliteHistoryStore::new(pool))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Research {
            query,
            temperature,
            continue_from,
            pdf,
            json,
        } => {
            run_research_command(&cfg, query, temperature, continue_from, pdf, json).await?;
        }
        Commands::History { action } => {
            let store = open_store(&cfg).await?;
            run_history_command(&store, action).await?;
            store.close().await;
        }
        Commands::Settings { action } => {
            let store = open_store(&cfg).await?;
            match action {
                SettingsAction::Get { key } => match store.get_setting(&key).await? {
                    Some(value) => println!("{}", value),
                    None => anyhow::bail!("setting not found: {}", key),
                },
                SettingsAction::Set { key, value } => {
                    store.set_setting(&key, &value).await?;
                    println!("{} = {}", key, value);
                }
            }
            store.close().await;
        }
        Commands::Upload { source } => {
            let uploader = FileUploader::new(&cfg.files)?;
            let store = open_store(&cfg).await?;
            let uploaded = uploader
                .upload_source(&store, &UploadSource::parse(&source))
                .await?;
            store.close().await;
            println!(
                "Uploaded {} as {} to vector store {}",
                uploaded.filename, uploaded.file_id, uploaded.vector_store_id
            );
        }
    }

    Ok(())
}

async fn run_research_command(
    cfg: &Config,
    query: String,
    temperature: Option<f64>,
    continue_from: Option<PathBuf>,
    pdf: bool,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!("query must not be empty");
    }

    let previous = match continue_from {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read session file: {}", path.display()))?;
            let session: ResearchSession = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid session file: {}", path.display()))?;
            Some(session)
        }
        None => None,
    };

    let client = HttpModelClient::new(&cfg.llm)?;
    let request = ResearchRequest {
        query,
        temperature,
        previous,
    };
    let session = run_research(&client, cfg.llm.temperature, &request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        println!("# {}", session.title);
        println!();
        println!("{}", render_content(&session));
        if !session.citations.is_empty() {
            println!();
            println!("References:");
            for (i, c) in session.citations.iter().enumerate() {
                println!("  [{}] {} {}", i + 1, c.title, c.url);
            }
        }
    }

    if pdf {
        let store = open_store(cfg).await?;
        let export = export_pdf(&store, &session, &cfg.pdf).await?;
        std::fs::write(&export.pdf.filename, &export.pdf.bytes)
            .with_context(|| format!("Failed to write {}", export.pdf.filename))?;
        match export.history_id {
            Some(id) => eprintln!(
                "Wrote {} ({} pages, history id {})",
                export.pdf.filename, export.pdf.page_count, id
            ),
            None => eprintln!(
                "Wrote {} ({} pages, not recorded in history)",
                export.pdf.filename, export.pdf.page_count
            ),
        }
        store.close().await;
    }

    Ok(())
}

async fn run_history_command(store: &dyn HistoryStore, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List { kind } => {
            let entries = store.list_all().await?;
            let entries: Vec<_> = entries
                .into_iter()
                .filter(|e| kind.map_or(true, |k| e.kind() == k))
                .collect();

            if entries.is_empty() {
                println!("No history entries.");
                return Ok(());
            }

            println!("{:<6} {:<11} {:<25} TITLE", "ID", "KIND", "CREATED");
            for entry in &entries {
                let detail = match &entry.payload {
                    HistoryPayload::Pdf { query, .. } => format!("(query: {})", query),
                    HistoryPayload::DocExport { .. } => entry
                        .as_doc_export()
                        .map(|record| record.edit_url())
                        .unwrap_or_default(),
                };
                println!(
                    "{:<6} {:<11} {:<25} {}  {}",
                    entry.id,
                    entry.kind().as_str(),
                    format_ts_iso(entry.created_at),
                    entry.title,
                    detail
                );
            }
        }
        HistoryAction::Get { id, out } => {
            let pdf = store
                .get_pdf(id)
                .await?
                .with_context(|| format!("no stored pdf with id {}", id))?;
            std::fs::write(&out, &pdf.pdf_data)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Wrote {} ({} bytes)", out.display(), pdf.pdf_data.len());
        }
        HistoryAction::Delete { id } => {
            if store.delete_pdf(id).await? {
                println!("Deleted pdf {}.", id);
            } else {
                anyhow::bail!("no stored pdf with id {}", id);
            }
        }
    }
    Ok(())
}
