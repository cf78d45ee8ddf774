use clap::{Parser, Subcommand};
use engagement_engine::application::engine::EngagementEngine;
use engagement_engine::application::sweeper::DeadlineSweeper;
use engagement_engine::config::EngineConfig;
use engagement_engine::infrastructure::in_memory::{
    InMemoryCommitmentStore, InMemorySessionStore, InMemoryTeachingRequestStore,
};
#[cfg(feature = "storage-rocksdb")]
use engagement_engine::infrastructure::rocksdb::RocksDBStore;
use engagement_engine::interfaces::csv::commitment_writer::CommitmentWriter;
use engagement_engine::interfaces::script::reader::ScriptReader;
use engagement_engine::interfaces::script::runner::ScriptRunner;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON-lines command script and print a CSV summary of all commitments
    Replay {
        /// Input script, one timestamped command per line
        script: PathBuf,

        #[command(flatten)]
        storage: StorageArgs,
    },
    /// Run the deadline sweeper on the system clock
    Sweep {
        #[command(flatten)]
        storage: StorageArgs,

        /// Sweep once, print the report and exit
        #[arg(long)]
        once: bool,

        /// Seconds between sweeps (overrides the config file)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[derive(clap::Args)]
struct StorageArgs {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --verbose
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    match cli.command {
        Command::Replay { script, storage } => replay(script, storage).await,
        Command::Sweep {
            storage,
            once,
            interval_secs,
        } => sweep(storage, once, interval_secs).await,
    }
}

async fn replay(script: PathBuf, storage: StorageArgs) -> Result<()> {
    let engine = build_engine(&storage)?;
    let runner = ScriptRunner::new(engine);

    let file = File::open(script).into_diagnostic()?;
    let reader = ScriptReader::new(file);
    for (line_no, command) in reader.commands() {
        match command {
            Ok(command) => {
                let op = command.op.name();
                if let Err(e) = runner.apply(command).await {
                    warn!(line_no, op = %op, error = %e, "Error processing command");
                }
            }
            Err(e) => {
                error!(line_no, error = %e, "Error reading line");
            }
        }
    }

    let commitments = runner.engine().list_commitments().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = CommitmentWriter::new(stdout.lock());
    writer.write_commitments(&commitments).into_diagnostic()?;

    Ok(())
}

async fn sweep(storage: StorageArgs, once: bool, interval_secs: Option<u64>) -> Result<()> {
    let engine = build_engine(&storage)?;

    let report = if once {
        engine.sweep_once().await.into_diagnostic()?
    } else {
        let mut sweeper = DeadlineSweeper::new(Arc::new(engine));
        if let Some(secs) = interval_secs {
            if secs == 0 {
                return Err(miette::miette!("--interval-secs must be greater than 0"));
            }
            sweeper = sweeper.with_interval(std::time::Duration::from_secs(secs));
        }
        sweeper
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for the shutdown signal");
                }
            })
            .await
    };

    println!("{}", serde_json::to_string(&report).into_diagnostic()?);
    Ok(())
}

fn build_engine(storage: &StorageArgs) -> Result<EngagementEngine> {
    let config = match &storage.config {
        Some(path) => EngineConfig::load(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    Ok(open_stores(storage.db_path.as_deref())?.with_config(config))
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<&Path>) -> Result<EngagementEngine> {
    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok(EngagementEngine::new(
                Box::new(store.clone()),
                Box::new(store.clone()),
                Box::new(store),
            ))
        }
        None => Ok(in_memory_engine()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<&Path>) -> Result<EngagementEngine> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_engine())
}

fn in_memory_engine() -> EngagementEngine {
    EngagementEngine::new(
        Box::new(InMemoryTeachingRequestStore::new()),
        Box::new(InMemoryCommitmentStore::new()),
        Box::new(InMemorySessionStore::new()),
    )
}
