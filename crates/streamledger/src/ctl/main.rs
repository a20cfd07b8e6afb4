//! streamledgerctl - command line client for resumable conversation streams
//!
//! Every invocation mounts the current session of the local store, so an
//! answer interrupted by a crash or Ctrl-C is picked up by the next run.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{LevelFilter, debug};

use streamledger::assets::{AssetDispatcher, HttpAssetFetcher};
use streamledger::config::{self, EngineConfig};
use streamledger::storage::{StoreConfig, create_store};
use streamledger::{
    ConversationEngine, EventSourceTransport, LifecycleOutcome, StreamStep, TokenCredentials,
};

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    if let Command::Config { command } = &cli.command {
        init_logging(&cli, "info");
        return handle_config(command, &config_path);
    }

    let config = EngineConfig::load(&config_path)?;
    init_logging(&cli, &config.logging.level);
    debug!("Loaded config from {}", config_path.display());

    let mut engine = open_engine(&cli, &config)?;
    match cli.command {
        Command::Ask { question } => handle_ask(&mut engine, &question).await,
        Command::Resume => handle_resume(&mut engine).await,
        Command::Document { id } => handle_document(&mut engine, &id, cli.json).await,
        Command::History => handle_history(&engine, cli.json),
        Command::Status => handle_status(&engine, cli.json),
        Command::Reset => {
            engine.reset()?;
            println!("Session {} reset", engine.session_id());
            Ok(())
        }
        Command::Config { .. } => Ok(()),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "streamledgerctl",
    author,
    version,
    about = "Ask questions over a resumable event stream and keep the history locally."
)]
struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', env = "STREAMLEDGER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory of the session store (overrides config)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Bearer token sent with every request
    #[arg(long, env = "STREAMLEDGER_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// User id, when the token does not carry one
    #[arg(long, env = "STREAMLEDGER_USER_ID", global = true)]
    user_id: Option<String>,

    /// Output machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask a question and stream the answer
    Ask {
        /// The question to send
        question: String,
    },

    /// Continue an interrupted answer
    Resume,

    /// Load a document feed and print its records
    Document {
        /// Document id
        id: String,
    },

    /// Print the session history
    History,

    /// Show session stage, activity and tail state
    Status,

    /// Clear history, stage and activity of the session
    Reset,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(cli: &Cli, configured: &str) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(configured));
    let level = if cli.quiet {
        Some(LevelFilter::Error)
    } else {
        match cli.verbose {
            0 => None,
            1 => Some(LevelFilter::Debug),
            _ => Some(LevelFilter::Trace),
        }
    };
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.try_init().ok();
}

fn open_engine(cli: &Cli, config: &EngineConfig) -> Result<ConversationEngine> {
    let store_config = match (&cli.storage_dir, config.store_config()) {
        (Some(dir), _) => StoreConfig::Local(dir.clone()),
        (None, StoreConfig::Memory) => StoreConfig::Local(config::default_data_dir()?),
        (None, configured) => configured,
    };
    let store = create_store(store_config);
    let credentials = Arc::new(TokenCredentials::new(
        cli.token.clone(),
        cli.user_id.clone(),
    ));

    let mut engine = ConversationEngine::open(
        config,
        store,
        Arc::new(EventSourceTransport::new()),
        credentials,
    )
    .context("opening session")?;
    if let Some(endpoint) = config.asset_endpoint() {
        engine = engine.with_assets(AssetDispatcher::new(Arc::new(HttpAssetFetcher::new(
            endpoint,
        ))));
    }
    Ok(engine)
}

/// Print the target item as it grows, starting after what is already shown.
async fn stream_answer(
    engine: &mut ConversationEngine,
    item_id: &str,
    mut shown: usize,
) -> Result<()> {
    let mut stdout = io::stdout();
    while let Some(step) = engine.next_update().await {
        match step {
            Ok(StreamStep::Delta { applied: true, .. }) => {
                if let Some(item) = engine.items().iter().find(|i| i.id == item_id) {
                    if let Some(fresh) = item.content.get(shown..) {
                        write!(stdout, "{fresh}")?;
                        stdout.flush()?;
                    }
                    shown = item.content.len();
                }
            }
            Ok(StreamStep::Completed { .. }) => {
                writeln!(stdout)?;
            }
            Ok(_) => {}
            Err(e) => {
                writeln!(stdout)?;
                return Err(e)
                    .context("stream interrupted; run `streamledgerctl resume` to continue");
            }
        }
    }
    Ok(())
}

async fn continue_interrupted(engine: &mut ConversationEngine) -> Result<bool> {
    match engine.mount()? {
        LifecycleOutcome::Resumed { item_id } => {
            let partial = engine
                .items()
                .iter()
                .find(|i| i.id == item_id)
                .map(|i| i.content.clone())
                .unwrap_or_default();
            print!("{partial}");
            stream_answer(engine, &item_id, partial.len()).await?;
            Ok(true)
        }
        LifecycleOutcome::Reset => {
            eprintln!(
                "Session {} was reset after too many reattachments",
                engine.session_id()
            );
            Ok(false)
        }
        _ => Ok(false),
    }
}

async fn handle_ask(engine: &mut ConversationEngine, question: &str) -> Result<()> {
    continue_interrupted(engine).await?;
    let item = engine.send(question)?;
    stream_answer(engine, &item.id, 0).await
}

async fn handle_resume(engine: &mut ConversationEngine) -> Result<()> {
    if continue_interrupted(engine).await? {
        return Ok(());
    }
    let item = engine.resume()?;
    print!("{}", item.content);
    stream_answer(engine, &item.id, item.content.len()).await
}

async fn handle_document(engine: &mut ConversationEngine, id: &str, json: bool) -> Result<()> {
    engine.load_document(id)?;
    engine.drive().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(engine.documents())?);
        return Ok(());
    }
    for record in engine.documents() {
        println!("[{}] {}", record.id, record.content);
        for asset in &record.assets {
            println!("    asset: {asset}");
        }
    }
    Ok(())
}

fn handle_history(engine: &ConversationEngine, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(engine.items())?);
        return Ok(());
    }
    for item in engine.items() {
        let marker = if item.completed { "" } else { " (interrupted)" };
        println!("{}{}: {}", item.role, marker, item.content);
    }
    Ok(())
}

fn handle_status(engine: &ConversationEngine, json: bool) -> Result<()> {
    let snapshot = engine.snapshot()?;
    let tail = snapshot.history.last();
    if json {
        let value = serde_json::json!({
            "session_id": snapshot.session_id,
            "stage": snapshot.stage,
            "last_active_at": snapshot.last_active_at,
            "items": snapshot.history.len(),
            "tail_completed": tail.map(|t| t.completed),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    println!("Session:     {}", snapshot.session_id);
    println!("Stage:       {}", snapshot.stage);
    match snapshot.last_active_at {
        Some(at) => println!("Last active: {}", at.to_rfc3339()),
        None => println!("Last active: never"),
    }
    println!("Items:       {}", snapshot.history.len());
    if tail.is_some_and(|t| t.is_in_flight()) {
        println!("Tail:        interrupted (resumable)");
    }
    Ok(())
}

fn handle_config(command: &ConfigCommand, path: &Path) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = EngineConfig::load(path)?;
            println!("# {}", path.display());
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "config file {} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            EngineConfig::write_default(path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
