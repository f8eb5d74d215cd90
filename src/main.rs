//! Tidewater main entry point
//!
//! Command-line interface for the supervisor (recrawl actor), the crawl
//! worker, and the maintenance commands around them.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tidewater::actor::{ActorRunner, SqliteActorStore};
use tidewater::config::{load_config_with_hash, resolve_config_path, Config};
use tidewater::mq::{MqInbox, MqOutbox, WaitPolicy};
use tidewater::process::{ProcessHeartbeater, ProcessService, CRAWLER_PROCESS};
use tidewater::recrawl::{actor_name, recrawl_from_crawl_data, RecrawlActor, RecrawlMessage};
use tidewater::storage::{Database, FileStorageType, SqliteFileStorage, StorageId};
use tidewater::worker::{CrawlWorker, HttpFetcher, WorkerSettings};
use tidewater::{resynchronize, CrawlScope};
use tracing_subscriber::EnvFilter;

/// Inbox the supervisor receives crawler replies on
const SUPERVISOR_INBOX: &str = "supervisor";

/// Tidewater: resumable domain crawls
///
/// A supervisor drives recrawls of registered crawl data areas through a
/// checkpointed state machine; a separate crawler process does the fetching
/// and writes one append-only fetch log per domain.
#[derive(Parser, Debug)]
#[command(name = "tidewater")]
#[command(version)]
#[command(about = "Resumable domain crawls", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (relative paths resolve against $TIDEWATER_HOME)
    #[arg(short, long, value_name = "CONFIG", default_value = "tidewater.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recrawl a crawl data area
    Recrawl {
        /// Storage id of the crawl data
        #[arg(long)]
        data: i64,

        /// Storage id of the crawl spec (defaults to the data's source)
        #[arg(long)]
        spec: Option<i64>,
    },

    /// Resume an interrupted recrawl
    Resume {
        /// Storage id of the crawl data
        #[arg(long)]
        data: i64,
    },

    /// Run the crawl worker until interrupted
    Crawler,

    /// Rebuild a damaged fetch log into a new file
    Resync {
        /// Domain the log belongs to
        #[arg(long)]
        domain: String,

        /// The existing log
        existing: PathBuf,

        /// Where to write the rebuilt log
        output: PathBuf,
    },

    /// Register a storage area
    RegisterStorage {
        #[arg(long, value_enum)]
        kind: StorageKind,

        #[arg(long)]
        path: PathBuf,

        #[arg(long, default_value = "")]
        description: String,

        /// Storage id this one is produced from
        #[arg(long)]
        source: Option<i64>,
    },

    /// Show processes, actors and storages
    Status,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StorageKind {
    CrawlSpec,
    CrawlData,
    ProcessedData,
    Other,
}

impl From<StorageKind> for FileStorageType {
    fn from(kind: StorageKind) -> Self {
        match kind {
            StorageKind::CrawlSpec => FileStorageType::CrawlSpec,
            StorageKind::CrawlData => FileStorageType::CrawlData,
            StorageKind::ProcessedData => FileStorageType::ProcessedData,
            StorageKind::Other => FileStorageType::Other,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Resync {
            domain,
            existing,
            output,
        } => handle_resync(&domain, &existing, &output),
        Command::Recrawl { data, spec } => {
            let (config, db) = open_control(&cli.config)?;
            let mut message = recrawl_from_crawl_data(StorageId(data));
            if let Some(spec) = spec {
                message = message.with_crawl_spec_id(StorageId(spec));
            }
            handle_recrawl(&config, db, message.crawl_storage_id, Some(message)).await
        }
        Command::Resume { data } => {
            let (config, db) = open_control(&cli.config)?;
            handle_recrawl(&config, db, StorageId(data), None).await
        }
        Command::Crawler => {
            let (config, db) = open_control(&cli.config)?;
            handle_crawler(&config, db).await
        }
        Command::RegisterStorage {
            kind,
            path,
            description,
            source,
        } => {
            let (_, db) = open_control(&cli.config)?;
            handle_register(db, kind, &path, &description, source)
        }
        Command::Status => {
            let (config, db) = open_control(&cli.config)?;
            handle_status(&config, db)
        }
    }
}

/// Loads the configuration and opens the control database it names
fn open_control(config: &Path) -> anyhow::Result<(Config, Database)> {
    let config_path = resolve_config_path(config)?;
    tracing::info!("Loading configuration from: {}", config_path.display());
    let (config, hash) = load_config_with_hash(&config_path)
        .with_context(|| format!("Failed to load configuration {}", config_path.display()))?;
    tracing::debug!("Configuration loaded (hash: {})", hash);

    let db = Database::open(&config.control.database_path).with_context(|| {
        format!(
            "Failed to open control database {}",
            config.control.database_path.display()
        )
    })?;

    Ok((config, db))
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("tidewater=info,warn"),
            1 => EnvFilter::new("tidewater=debug,info"),
            2 => EnvFilter::new("tidewater=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Runs the recrawl actor for one crawl data area
///
/// Starts from `message` when given, otherwise resumes from the checkpoint.
async fn handle_recrawl(
    config: &Config,
    db: Database,
    crawl_data: StorageId,
    message: Option<RecrawlMessage>,
) -> anyhow::Result<()> {
    let staleness = Duration::from_millis(config.liveness.heartbeat_staleness_ms);
    let actor = RecrawlActor::new(
        Arc::new(MqOutbox::new(db.clone(), CRAWLER_PROCESS, SUPERVISOR_INBOX)),
        Arc::new(ProcessService::new(db.clone()).with_staleness(staleness)),
        Arc::new(SqliteFileStorage::new(db.clone())),
    )
    .with_wait_policy(WaitPolicy::from(&config.liveness));

    let name = actor_name(crawl_data);
    let runner = ActorRunner::new(&name, actor, SqliteActorStore::new(db))?;

    let result = match message {
        Some(message) => runner.start(message).await?,
        None => runner.resume().await?,
    };

    println!(
        "Recrawl {} finished (crawl request #{})",
        name, result.crawler_msg_id
    );
    Ok(())
}

/// Serves crawl requests until Ctrl-C
async fn handle_crawler(config: &Config, db: Database) -> anyhow::Result<()> {
    let fetcher = HttpFetcher::from_config(config).context("Failed to build HTTP client")?;

    let worker = CrawlWorker::new(
        MqInbox::new(db.clone(), CRAWLER_PROCESS),
        Arc::new(SqliteFileStorage::new(db.clone())),
        Arc::new(fetcher),
        ProcessHeartbeater::new(db, CRAWLER_PROCESS),
        WorkerSettings::from(config),
    );

    worker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            tracing::info!("Interrupted, finishing current request");
        })
        .await?;
    Ok(())
}

/// Rebuilds a fetch log offline
fn handle_resync(domain: &str, existing: &Path, output: &Path) -> anyhow::Result<()> {
    if !existing.exists() {
        bail!("{} does not exist", existing.display());
    }

    let (frontier, recorder, report) =
        resynchronize(existing, output, CrawlScope::for_domain(domain))?;
    let path = recorder.finish()?;

    println!("=== Resync of {} ===\n", existing.display());
    println!("  Records read:    {}", report.records_read);
    println!("  Records skipped: {}", report.records_skipped);
    println!("  Records copied:  {}", report.records_copied);
    println!("  Links queued:    {}", report.links_enqueued);
    println!("  Truncated:       {}", if report.truncated { "yes" } else { "no" });
    println!("\n  Visited: {}, pending: {}", frontier.visited_len(), frontier.pending_len());
    println!("  Written to {}", path.display());
    Ok(())
}

fn handle_register(
    db: Database,
    kind: StorageKind,
    path: &Path,
    description: &str,
    source: Option<i64>,
) -> anyhow::Result<()> {
    let storages = SqliteFileStorage::new(db);
    let path = if path.is_relative() {
        std::env::current_dir()?.join(path)
    } else {
        path.to_path_buf()
    };
    let storage = storages.register(kind.into(), &path, description)?;

    if let Some(source) = source {
        storages.relate(StorageId(source), storage.id)?;
    }

    println!("Registered {} storage {} at {}", storage.kind, storage.id, storage.path.display());
    Ok(())
}

fn handle_status(config: &Config, db: Database) -> anyhow::Result<()> {
    let staleness = Duration::from_millis(config.liveness.heartbeat_staleness_ms);

    println!("=== Processes ===");
    let heartbeats = ProcessService::new(db.clone()).heartbeats()?;
    if heartbeats.is_empty() {
        println!("  (none)");
    }
    for hb in &heartbeats {
        let state = if hb.is_running(staleness) {
            "RUNNING"
        } else if hb.is_stopped() {
            "STOPPED"
        } else {
            "MISSING"
        };
        println!("  {:<20} {:<8} {}", hb.process_id, state, hb.progress_bar(20));
    }

    println!("\n=== Actors ===");
    let checkpoints = SqliteActorStore::new(db.clone()).list()?;
    if checkpoints.is_empty() {
        println!("  (none)");
    }
    for cp in &checkpoints {
        println!(
            "  {:<20} {:<10} {:<9} {}",
            cp.actor_name,
            cp.state_name,
            cp.status.to_db_string(),
            cp.error.as_deref().unwrap_or("")
        );
    }

    println!("\n=== Storages ===");
    for storage in SqliteFileStorage::new(db).list()? {
        println!(
            "  {:>4} {:<14} {} {}",
            storage.id,
            storage.kind,
            storage.path.display(),
            storage.description
        );
    }

    Ok(())
}
