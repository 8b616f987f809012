//! Main CLI application structure

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, info, Level};

use super::output::{Output, OutputFormat};
use super::{artifacts, stacks, versions};
use crate::config::{ProviderKind, Settings};

#[derive(Parser)]
#[command(name = "sdt")]
#[command(author, version, about = "Deploy ordered sets of CloudFormation stacks")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    pub debug: bool,

    /// Show what would happen without changing anything
    #[arg(long, global = true)]
    pub drymode: bool,

    /// Settings file (defaults to config.toml in the user config directory)
    #[arg(long, global = true, env = "SDT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Provisioning backend, overrides the settings file
    #[arg(long)]
    pub provider: Option<ProviderKind>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stack manipulation commands
    #[command(subcommand)]
    Stacks(stacks::StacksCommands),

    /// Artifact upload, download and promotion
    #[command(subcommand)]
    Artifacts(artifacts::ArtifactsCommands),

    /// Project version commands
    #[command(subcommand)]
    Versions(versions::VersionsCommands),
}

/// Everything a command needs besides its own arguments
pub struct Session {
    pub output: Output,
    pub settings: Settings,
    pub dry_run: bool,
}

fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    // A second initialisation (tests) is harmless
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(provider) = cli.provider {
        settings.stacks.provider = provider;
    }
    debug!("Settings: {:?}", settings);

    if cli.drymode {
        info!("-- DRY MODE --");
    }

    let session = Session {
        output: Output::new(cli.format),
        settings,
        dry_run: cli.drymode,
    };

    match cli.command {
        Commands::Stacks(cmd) => stacks::run(cmd, &session),
        Commands::Artifacts(cmd) => artifacts::run(cmd, &session),
        Commands::Versions(cmd) => versions::run(cmd, &session),
    }
}
