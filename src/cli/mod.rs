use crate::errors::AppResult;
use clap::{Parser, Subcommand};
use tracing_subscriber;

pub mod commands;

/// Multi-Source Message Structure Consensus Engine
#[derive(Parser)]
#[command(name = "message-consensus")]
#[command(about = "Multi-Source Message Structure Consensus Engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Vote on all extractions and write canonical message definitions
    Vote(commands::vote::VoteCommand),
    /// Generate validation and discrepancy reports without writing canonical output
    Report(commands::report::ReportCommand),
    /// Compute structural fingerprints for one extraction file, optionally diffing against another
    Fingerprint(commands::fingerprint::FingerprintCommand),
    /// Run structural sanity checks over extraction files
    Check(commands::check::CheckCommand),
    /// Fold one new extraction file into existing canonical records
    Update(commands::update::UpdateCommand),
}

pub fn run() -> AppResult<()> {
    // Initialise tracing subscriber to capture info!() macros
    // Uses RUST_LOG environment variable (defaults to "error" if not set)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Vote(command) => command.run(),
        Commands::Report(command) => command.run(),
        Commands::Fingerprint(command) => command.run(),
        Commands::Check(command) => command.run(),
        Commands::Update(command) => command.run(),
    }
}
