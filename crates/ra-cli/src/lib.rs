//! Rock Annotator CLI library

pub mod annotator;
pub mod export;
pub mod lease;
pub mod tasks;

use anyhow::{Context as _, Result};
use ra_core::{Clock, Config, DatabaseManager, Store, SystemClock};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

// Re-export CLI types for testing
pub use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ra")]
#[command(about = "Rock Annotator CLI")]
#[command(version, author, long_about = None)]
pub struct Cli {
    /// State directory holding the database, uploads and exports
    #[arg(long, global = true, env = "RA_HOME", value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info", value_name = "LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy JPEG or PNG files into the uploads directory and create tasks
    Ingest(tasks::IngestArgs),
    /// Task administration
    Tasks {
        #[command(subcommand)]
        subcommand: tasks::TaskCommands,
    },
    /// Annotator accounts
    Annotator {
        #[command(subcommand)]
        subcommand: annotator::AnnotatorCommands,
    },
    /// Task leases
    Lease {
        #[command(subcommand)]
        subcommand: lease::LeaseCommands,
    },
    /// Submit annotation content for the leased task
    Submit(lease::SubmitArgs),
    /// Latest unique submissions of an annotator
    Progress(lease::ProgressArgs),
    /// Export completed tasks into a labelme archive
    Export(export::ExportArgs),
    /// Produced export archives
    Exports {
        #[command(subcommand)]
        subcommand: export::ExportsCommands,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let home = self.home;
        match self.command {
            Commands::Ingest(args) => args.run(&AppContext::open(home)?).await,
            Commands::Tasks { subcommand } => subcommand.run(&AppContext::open(home)?).await,
            Commands::Annotator { subcommand } => subcommand.run(&AppContext::open(home)?).await,
            Commands::Lease { subcommand } => subcommand.run(&AppContext::open(home)?).await,
            Commands::Submit(args) => args.run(&AppContext::open(home)?).await,
            Commands::Progress(args) => args.run(&AppContext::open(home)?).await,
            Commands::Export(args) => args.run(&AppContext::open(home)?).await,
            Commands::Exports { subcommand } => subcommand.run(&AppContext::open(home)?).await,
        }
    }
}

/// Resolved configuration plus the open database shared by every command.
pub struct AppContext {
    pub config: Config,
    pub db: DatabaseManager,
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn open(home: Option<PathBuf>) -> Result<Self> {
        let config = Config::resolve(home).context("Failed to resolve home directory")?;
        config.ensure_dirs().with_context(|| {
            format!("Failed to create home directory {}", config.home.display())
        })?;
        let db = config.open_database().with_context(|| {
            format!("Failed to open database {}", config.database_path.display())
        })?;
        tracing::debug!(home = %config.home.display(), "Opened state directory");
        Ok(Self {
            config,
            db,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::new(self.db.clone())
    }
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
