use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use murmur_core::logging::{self, LoggingConfig};
use murmur_core::{
    Config, Conversation, ConversationOptions, DeliveryState, LiveEvent, LiveSession, MessageContent, MessageRecord,
    ProximityOutcome, ScopeFilter, ScrollState, SessionError, StorePageFetcher,
};
use murmur_store::HistoryDb;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Murmur - conversation log synchronization
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(about = "Page through and chat on top of a synchronized conversation log", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to murmur.toml (default: ./murmur.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Identity override; falls back to `[identity]` in the config
#[derive(clap::Args, Debug, Default, Clone)]
struct ScopeArgs {
    /// Query as an authenticated principal
    #[arg(long, value_name = "ID", conflicts_with = "device")]
    principal: Option<String>,

    /// Query as an anonymous device
    #[arg(long, value_name = "ID")]
    device: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write an example murmur.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Load a JSON array of stored messages into the history store
    Seed {
        /// JSON file with `{message, isAgent, createdAt}` rows
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Print history, newest page first
    History {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Keep paging back until the start of history
        #[arg(long)]
        all: bool,
    },
    /// Interactive chat against a local echo session
    Chat {
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(|| PathBuf::from("murmur.toml"));

    if let Commands::Init { force } = cli.command {
        return cmd_init(&config_path, force);
    }

    let config = load_or_create_config(&config_path)?;

    let mut logging_config = LoggingConfig::from(config.logging.clone());
    if cli.verbose {
        logging_config = logging_config.with_level("debug");
        println!("{} Using config: {}", "Info:".blue().bold(), config_path.display());
        println!("{} Store: {}", "Info:".blue().bold(), logging::sanitize_path(&config.store.path));
    }
    let _log_guard = logging::init_logging(Some(logging_config)).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Seed { file, scope } => cmd_seed(&config, &file, &scope).await,
        Commands::History { scope, all } => cmd_history(&config, &scope, all).await,
        Commands::Chat { scope } => cmd_chat(&config, &scope).await,
    }
}

/// Write the example config
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    std::fs::write(path, Config::example()).context("Failed to write config")?;
    println!("{} Wrote example config to {}", "Success:".green().bold(), path.display());
    Ok(())
}

/// Load config from file or create from example
fn load_or_create_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    } else {
        println!("{} Config not found at {}", "Warning:".yellow().bold(), path.display());
        println!("{} Creating config from example...", "Info:".blue().bold());

        std::fs::write(path, Config::example()).context("Failed to create config")?;

        println!(
            "{} Created config at {}. Please edit it with your settings.",
            "Success:".green().bold(),
            path.display()
        );

        anyhow::bail!("Please edit {} with your settings and run again", path.display())
    }
}

/// Command-line identity wins over the config
fn resolve_scope(config: &Config, args: &ScopeArgs) -> Result<ScopeFilter> {
    match (&args.principal, &args.device) {
        (Some(principal), _) if !principal.trim().is_empty() => Ok(ScopeFilter::Principal(principal.trim().to_string())),
        (_, Some(device)) if !device.trim().is_empty() => Ok(ScopeFilter::Device(device.trim().to_string())),
        (None, None) => config.scope_filter().context("No identity configured"),
        _ => anyhow::bail!("Identity must not be blank"),
    }
}

async fn open_store(config: &Config) -> Result<HistoryDb> {
    HistoryDb::open(&config.store.path)
        .await
        .with_context(|| format!("Failed to open history store at {}", config.store.path.display()))
}

fn conversation_options(config: &Config) -> ConversationOptions {
    ConversationOptions {
        page_size: config.history.page_size,
        content: LoggingConfig::from(config.logging.clone()).content,
        ..Default::default()
    }
}

/// Load rows from a JSON file
async fn cmd_seed(config: &Config, file: &Path, scope: &ScopeArgs) -> Result<()> {
    let scope = resolve_scope(config, scope)?;
    let json = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let db = open_store(config).await?;
    let inserted = db.import_json(&scope, &json).await.context("Failed to import messages")?;
    let total = db.count(&scope).await?;

    println!(
        "{} Imported {} messages for {} ({} total)",
        "Success:".green().bold(),
        inserted.to_string().cyan(),
        scope.to_string().cyan(),
        total
    );
    Ok(())
}

/// Page through history and print it with day headers
async fn cmd_history(config: &Config, scope: &ScopeArgs, all: bool) -> Result<()> {
    let scope = resolve_scope(config, scope)?;
    let db = open_store(config).await?;
    let fetcher = StorePageFetcher::new(db, scope).with_timeout(config.history.fetch_timeout());
    let conversation = Conversation::with_options(Arc::new(fetcher), NoSession, conversation_options(config));

    loop {
        match conversation.notify_scroll_proximity().await {
            Ok(ProximityOutcome::Loaded(outcome)) => {
                if !all {
                    break;
                }
                tracing::debug!(inserted = outcome.inserted, duplicates = outcome.duplicates, "Page loaded");
            }
            Ok(_) => break,
            Err(e) => {
                eprintln!("{} Could not load history: {} (run again to retry)", "Warning:".yellow().bold(), e);
                break;
            }
        }
    }

    let snapshot = conversation.current_timeline();
    if snapshot.is_empty() {
        println!("{} No messages", "Info:".blue().bold());
        return Ok(());
    }

    print_lines(&render_timeline(&snapshot, &conversation.day_boundaries()));
    Ok(())
}

/// Interactive loop: `/more` pages back, `/reload` starts over, `/quit` exits
async fn cmd_chat(config: &Config, scope: &ScopeArgs) -> Result<()> {
    let scope = resolve_scope(config, scope)?;
    let db = open_store(config).await?;
    let fetcher = StorePageFetcher::new(db.clone(), scope.clone()).with_timeout(config.history.fetch_timeout());

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let session = EchoSession::new(db, scope.clone(), events_tx);
    let conversation = Conversation::with_options(Arc::new(fetcher), session, conversation_options(config));
    conversation.live().handle(LiveEvent::Connection(true));

    load_page(&conversation).await;
    print_lines(&render_timeline(&conversation.current_timeline(), &conversation.day_boundaries()));
    println!(
        "{} Chatting as {}. Commands: /more, /reload, /quit",
        "Info:".blue().bold(),
        scope.to_string().cyan()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/more" | "/reload" => {
                        if line.trim() == "/reload" {
                            conversation.reset();
                        }
                        load_page(&conversation).await;
                        print_lines(&render_timeline(&conversation.current_timeline(), &conversation.day_boundaries()));
                    }
                    _ => match conversation.send_outgoing(&line).await {
                        Ok(echo) => print_lines(&[render_record(&echo)]),
                        Err(e) => eprintln!("{} {}", "Warning:".yellow().bold(), e),
                    },
                }
            }
            Some(event) = events_rx.recv() => {
                if let Some(record) = conversation.live().handle(event) {
                    print_lines(&[render_record(&record)]);
                }
            }
        }
    }

    conversation.live().handle(LiveEvent::Connection(false));
    Ok(())
}

async fn load_page<F, S>(conversation: &Conversation<F, S>)
where
    F: murmur_core::PageFetcher,
    S: LiveSession,
{
    match conversation.notify_scroll_proximity().await {
        Ok(outcome) if reached_start(&outcome) => {
            println!("{} Start of history", "Info:".blue().bold());
        }
        Ok(ProximityOutcome::Ignored(state)) => {
            tracing::debug!(?state, "Load request ignored");
        }
        Ok(_) => {}
        Err(e) => eprintln!("{} Could not load history: {} (try /more)", "Warning:".yellow().bold(), e),
    }
}

/// Whether a proximity outcome means there is no older history to load
fn reached_start(outcome: &ProximityOutcome) -> bool {
    matches!(outcome, ProximityOutcome::Exhausted | ProximityOutcome::Ignored(ScrollState::Exhausted))
}

/// Session used by `history`, which never sends
struct NoSession;

#[async_trait::async_trait]
impl LiveSession for NoSession {
    async fn send_text(&self, _text: &str) -> std::result::Result<(), SessionError> {
        Err(SessionError::Disconnected)
    }
}

/// Local stand-in for the real-time session: stores each line and echoes it back
struct EchoSession {
    db: HistoryDb,
    scope: ScopeFilter,
    events: mpsc::UnboundedSender<LiveEvent>,
}

impl EchoSession {
    fn new(db: HistoryDb, scope: ScopeFilter, events: mpsc::UnboundedSender<LiveEvent>) -> Self {
        Self { db, scope, events }
    }

    fn reply_to(text: &str) -> String {
        match MessageContent::parse(text) {
            MessageContent::Media { url, .. } => format!("Nice picture! ({url})"),
            MessageContent::Text { text } => format!("You said: {text}"),
        }
    }
}

#[async_trait::async_trait]
impl LiveSession for EchoSession {
    async fn send_text(&self, text: &str) -> std::result::Result<(), SessionError> {
        self.db
            .insert(&self.scope, text, false, Utc::now())
            .await
            .map_err(|e| SessionError::SendFailed(e.to_string()))?;

        let reply = Self::reply_to(text);
        self.db
            .insert(&self.scope, &reply, true, Utc::now())
            .await
            .map_err(|e| SessionError::SendFailed(e.to_string()))?;

        self.events.send(LiveEvent::AgentText(reply)).map_err(|_| SessionError::Disconnected)
    }
}

/// A rendered output line
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    DayHeader(String),
    Message { speaker: &'static str, body: String, note: Option<&'static str> },
}

fn render_record(record: &MessageRecord) -> Line {
    let time = record.timestamp.with_timezone(&Local).format("%H:%M");
    let body = match &record.content {
        MessageContent::Text { text } => format!("[{time}] {text}"),
        MessageContent::Media { url, .. } => format!("[{time}] [media] {url}"),
    };
    let note = match record.delivery {
        Some(DeliveryState::Pending) => Some("sending"),
        Some(DeliveryState::Failed) => Some("not delivered"),
        Some(DeliveryState::Sent) | None => None,
    };

    Line::Message { speaker: if record.is_agent { "agent" } else { "you" }, body, note }
}

fn render_timeline(records: &[MessageRecord], boundaries: &[bool]) -> Vec<Line> {
    let mut lines = Vec::with_capacity(records.len());
    for (record, new_day) in records.iter().zip(boundaries) {
        if *new_day {
            let day = record.timestamp.with_timezone(&Local).format("%A, %B %-d %Y");
            lines.push(Line::DayHeader(day.to_string()));
        }
        lines.push(render_record(record));
    }
    lines
}

fn print_lines(lines: &[Line]) {
    for line in lines {
        match line {
            Line::DayHeader(day) => println!("{}", format!("--- {day} ---").dimmed()),
            Line::Message { speaker, body, note } => {
                let speaker = if *speaker == "agent" { speaker.magenta().bold().to_string() } else { speaker.cyan().bold().to_string() };
                match note {
                    Some(note) => println!("{speaker}: {body} {}", format!("({note})").yellow()),
                    None => println!("{speaker}: {body}"),
                }
            }
        }
    }
}
