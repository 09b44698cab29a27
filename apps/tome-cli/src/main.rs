use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tome_core::Settings;

mod commands;

use commands::{
    ApplyArgs, AuditArgs, CaptureArgs, ConfigCmd, DrainArgs, IndexArgs, PathsArgs, ReviewsCmd,
    TriggerArgs,
};

#[derive(Parser)]
#[command(
    name = "tome",
    version,
    about = "Keep a repository's knowledge base current"
)]
struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(long, global = true, env = "TOME_REPO")]
    repo: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a fact for reconciliation and return immediately
    Capture(CaptureArgs),
    /// Session-start hook: start an audit if the revision moved, report reviews
    Trigger(TriggerArgs),
    /// Reconcile queued facts into the knowledge store
    Drain(DrainArgs),
    /// Check every entry against the current codebase
    Audit(AuditArgs),
    /// Apply answered and automatic reviews
    Apply(ApplyArgs),
    /// Inspect and answer pending reviews
    Reviews {
        #[command(subcommand)]
        cmd: ReviewsCmd,
    },
    /// Rebuild or check the knowledge indexes
    Index(IndexArgs),
    /// Print effective paths and settings (JSON)
    Paths(PathsArgs),
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

fn settings(repo: Option<PathBuf>) -> Result<Settings> {
    let root = match repo {
        Some(root) => root,
        None => std::env::current_dir().context("determine current directory")?,
    };
    Settings::resolve(root)
}

async fn run(cli: Cli) -> Result<()> {
    let command = match cli.command {
        Commands::Config { cmd } => return commands::config::execute(cmd),
        command => command,
    };
    let settings = settings(cli.repo)?;
    tome_otel::init(Some(&settings.logs_dir()));
    match command {
        Commands::Capture(args) => commands::capture::run(&settings, args).await,
        Commands::Trigger(args) => commands::trigger::run(&settings, args).await,
        Commands::Drain(args) => commands::drain::run(&settings, args).await,
        Commands::Audit(args) => commands::audit::run(&settings, args).await,
        Commands::Apply(args) => commands::apply::run(&settings, args).await,
        Commands::Reviews { cmd } => commands::reviews::execute(&settings, cmd).await,
        Commands::Index(args) => commands::index::run(&settings, args).await,
        Commands::Paths(args) => commands::paths::run(&settings, args),
        Commands::Config { cmd } => commands::config::execute(cmd),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        tracing::error!(error = %format!("{err:#}"), "command failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
