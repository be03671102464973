//! # POS Assistant CLI (`posa`)
//!
//! Scans dashboard pages, answers questions about them and manages chat
//! sessions.
//!
//! ## Usage
//!
//! ```bash
//! posa --config ./config/posa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `posa init` | Create the SQLite database |
//! | `posa scan [ROUTES..]` | Scan routes, a saved page (`--file`) or the snapshot dir |
//! | `posa pages` | List cached pages |
//! | `posa context` | Print the combined context |
//! | `posa forget [KEY]` | Drop one cached page, or all with `--all` |
//! | `posa ask "<question>"` | One-shot answer against the cached pages |
//! | `posa chat <action>` | Manage chat sessions and send messages |
//! | `posa serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (e.g. `RUST_LOG=pos_assistant=debug`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use pos_assistant::chat::{self, AnswerBackend, ChatClient, ChatStore, HttpBackend};
use pos_assistant::config::{self, Config};
use pos_assistant::llm::{create_model, GenerativeModel};
use pos_assistant::models::{ChatSession, ScanReport};
use pos_assistant::page_store::PageStore;
use pos_assistant::scan::Scanner;
use pos_assistant::{db, migrate, server};

/// POS Assistant: answers questions about what the dashboard shows.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/posa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "posa",
    about = "POS Assistant: page-content indexing and question answering for a POS dashboard",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/posa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Scan dashboard pages into the page cache.
    ///
    /// With no arguments every configured route is fetched from
    /// `[scan].base_url`.
    Scan {
        /// Routes to scan (e.g. `inventory`, `/sales`).
        routes: Vec<String>,

        /// Index a saved HTML file instead of fetching routes.
        #[arg(long, conflicts_with_all = ["routes", "snapshots"])]
        file: Option<PathBuf>,

        /// Cache key for `--file` (defaults to `unknown`).
        #[arg(long, requires = "file")]
        key: Option<String>,

        /// Index the `[scan.snapshots]` directory.
        #[arg(long, conflicts_with = "routes")]
        snapshots: bool,
    },

    /// List cached pages.
    Pages,

    /// Print the combined context sent with questions.
    Context,

    /// Remove cached pages.
    Forget {
        /// Page key to remove.
        key: Option<String>,

        /// Remove every cached page.
        #[arg(long, conflicts_with = "key")]
        all: bool,
    },

    /// Answer one question from the cached pages.
    Ask {
        question: String,

        /// Ask a running server's `/api/chat` instead of answering locally.
        #[arg(long)]
        remote: Option<String>,
    },

    /// Manage chat sessions.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ChatAction {
    /// Start a new chat and make it active.
    New,
    /// List chats, newest first.
    List,
    /// Print a chat transcript (the active chat by default).
    Show { id: Option<String> },
    /// Make a chat active.
    Select { id: String },
    /// Delete a chat.
    Delete { id: String },
    /// Send a message in the active chat.
    Send { text: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Scan {
            routes,
            file,
            key,
            snapshots,
        } => run_scan(&cfg, routes, file, key, snapshots).await?,
        Commands::Pages => {
            let pages = page_store(&cfg).await?;
            let map = pages.page_map().await?;
            println!("{:<24} {:>8}  SCANNED", "KEY", "CHARS");
            for page in &map {
                println!(
                    "{:<24} {:>8}  {}",
                    page.key,
                    page.text.chars().count(),
                    page.scanned_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            println!("{} page(s)", map.len());
        }
        Commands::Context => {
            let pages = page_store(&cfg).await?;
            print!("{}", pages.get_combined_context().await);
        }
        Commands::Forget { key, all } => {
            let pages = page_store(&cfg).await?;
            let removed = match (key, all) {
                (_, true) => pages.clear().await?,
                (Some(key), false) => pages.remove_page(&key).await?,
                (None, false) => bail!("pass a page key or --all"),
            };
            println!("removed {} page(s)", removed);
        }
        Commands::Ask { question, remote } => run_ask(&cfg, &question, remote).await?,
        Commands::Chat { action } => run_chat(&cfg, action).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

async fn page_store(cfg: &Config) -> Result<PageStore> {
    Ok(PageStore::new(db::open(cfg).await?))
}

async fn run_scan(
    cfg: &Config,
    routes: Vec<String>,
    file: Option<PathBuf>,
    key: Option<String>,
    snapshots: bool,
) -> Result<()> {
    let scanner = Scanner::new(cfg, page_store(cfg).await?)?;

    let report = if let Some(path) = file {
        let html = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let key = key.unwrap_or_else(|| pos_assistant::scan::UNKNOWN_KEY.to_string());
        let changed = scanner.scan_current_page(Some(key.as_str()), &html).await?;
        ScanReport {
            scanned: vec![key.clone()],
            changed: if changed { vec![key] } else { Vec::new() },
            failed: Vec::new(),
        }
    } else if snapshots {
        let snapshots = cfg
            .scan
            .snapshots
            .as_ref()
            .context("[scan.snapshots] is not configured")?;
        scanner.scan_snapshots(snapshots).await?
    } else {
        let routes = if routes.is_empty() {
            cfg.scan.routes.clone()
        } else {
            routes
        };
        scanner.scan_all_routes(&routes).await
    };

    println!("scan");
    println!("  scanned: {}", report.scanned.len());
    println!("  changed: {}", report.changed.len());
    println!("  failed: {}", report.failed.len());
    for route in &report.failed {
        println!("    {}", route);
    }
    println!("ok");
    Ok(())
}

fn model(cfg: &Config) -> Result<Arc<dyn GenerativeModel>> {
    Ok(Arc::from(create_model(&cfg.llm)?))
}

async fn run_ask(cfg: &Config, question: &str, remote: Option<String>) -> Result<()> {
    let pages = page_store(cfg).await?;
    let context = pages.get_combined_context().await;

    let backend: Arc<dyn AnswerBackend> = match remote {
        Some(url) => Arc::new(HttpBackend::new(
            url,
            Duration::from_secs(cfg.llm.timeout_secs),
        )?),
        None => chat::create_backend(cfg, model(cfg)?)?,
    };

    let limited = pos_assistant::llm::truncate_chars(&context, cfg.chat.context_char_limit);
    match backend.ask(question, limited).await? {
        Some(answer) => println!("{}", answer),
        None => println!("{}", chat::NO_PRECISE_ANSWER),
    }
    Ok(())
}

async fn run_chat(cfg: &Config, action: ChatAction) -> Result<()> {
    let pool = db::open(cfg).await?;
    let store = ChatStore::new(pool.clone());

    match action {
        ChatAction::New => {
            let session = store.new_chat().await?;
            println!("{}", session.id);
        }
        ChatAction::List => {
            let active = store.active_id().await?;
            for session in store.list().await? {
                let marker = if active.as_deref() == Some(session.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {}  {:<32} {} message(s)",
                    marker,
                    session.id,
                    session.title,
                    session.messages.len()
                );
            }
        }
        ChatAction::Show { id } => {
            let session = match id {
                Some(id) => store.get(&id).await?,
                None => store.active().await?,
            };
            match session {
                Some(session) => print_transcript(&session),
                None => bail!("chat session not found"),
            }
        }
        ChatAction::Select { id } => {
            store.select(&id).await?;
            println!("active: {}", id);
        }
        ChatAction::Delete { id } => {
            if !store.delete(&id).await? {
                bail!("chat session not found: {}", id);
            }
            println!("deleted: {}", id);
        }
        ChatAction::Send { text } => {
            if store.active_id().await?.is_none() {
                bail!("no active chat; run `posa chat new` first");
            }
            let scanner = Scanner::new(cfg, PageStore::new(pool))?;
            let backend = chat::create_backend(cfg, model(cfg)?)?;
            let client = ChatClient::new(
                store,
                scanner,
                backend,
                cfg.scan.routes.clone(),
                cfg.chat.clone(),
            );
            match client.send(&text).await? {
                Some(reply) => println!("{}", reply.text),
                None => bail!("message must not be empty"),
            }
        }
    }
    Ok(())
}

fn print_transcript(session: &ChatSession) {
    println!("# {} ({})", session.title, session.id);
    for message in &session.messages {
        println!(
            "[{}] {}: {}",
            message.timestamp.format("%H:%M:%S"),
            message.sender.as_str(),
            message.text
        );
    }
}
