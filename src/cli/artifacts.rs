//! Artifact CLI commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use tracing::{debug, info};

use super::app::Session;
use super::stacks::provisioning_api;
use crate::artifacts::{Artifact, ArtifactDefaults, ArtifactStore, NexusStore, S3Store};
use crate::config::{HelperRegistry, StacksConfig};
use crate::provision::ApiOutputs;
use crate::versioning::default_render_vars;

/// Where artifacts are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    S3,
    Nexus,
}

impl StoreKind {
    fn as_str(self) -> &'static str {
        match self {
            StoreKind::S3 => "s3",
            StoreKind::Nexus => "nexus",
        }
    }
}

#[derive(Subcommand)]
pub enum ArtifactsCommands {
    /// Upload a file to a repository
    Upload {
        /// File to upload
        file: PathBuf,

        /// Target repository
        #[arg(long, short = 'r', default_value = "sandbox")]
        repo: String,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Download an artifact into a file
    Download {
        /// File to download into
        file: PathBuf,

        /// Source repository
        #[arg(long, short = 'r', default_value = "sandbox")]
        repo: String,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Promote an artifact to the next repository of the promotion path
    Promote {
        /// Artifact file name
        file: PathBuf,

        /// Repository the artifact is promoted from
        from_repo: String,

        #[command(flatten)]
        store: StoreArgs,
    },
}

/// Store selection and artifact coordinates
#[derive(Args)]
pub struct StoreArgs {
    /// Stacks configuration holding `/artifacts/<provider>` defaults
    #[arg(long, short = 's', default_value = "stacks.yml")]
    pub stacksconf: PathBuf,

    /// Target store
    #[arg(long, short = 'p', value_enum, default_value = "s3")]
    pub provider: StoreKind,

    /// Repository URL (nexus)
    #[arg(long, short = 'u')]
    pub url: Option<String>,

    /// Repository user (nexus)
    #[arg(long)]
    pub user: Option<String>,

    /// Repository password (nexus)
    #[arg(long)]
    pub pass: Option<String>,

    /// Bucket (s3)
    #[arg(long, short = 'b', default_value = "")]
    pub bucket: String,

    /// Bucket region (s3)
    #[arg(long, short = 'n', default_value = "us-east-1")]
    pub region: String,

    /// Repository group, e.g. com.example
    #[arg(long, short = 'g', default_value = "")]
    pub group: String,

    /// Artifact name
    #[arg(long, short = 'a', default_value = "")]
    pub artifact: String,

    /// Artifact version
    #[arg(long, short = 'v', default_value = "")]
    pub artifact_version: String,
}

impl StoreArgs {
    fn artifact(&self, file: &Path, repo: &str) -> Artifact {
        Artifact {
            repo: repo.to_string(),
            group: self.group.clone(),
            name: self.artifact.clone(),
            file_name: file.to_string_lossy().into_owned(),
            version: self.artifact_version.clone(),
        }
    }
}

pub fn run(cmd: ArtifactsCommands, session: &Session) -> Result<()> {
    match cmd {
        ArtifactsCommands::Upload { file, repo, store } => {
            let store = open_store(session, &store, &file, &repo)?;
            if session.dry_run {
                return Ok(());
            }
            let location = store.upload()?;
            info!("Uploaded to: {}", location);
            session.output.success(&location);
        }
        ArtifactsCommands::Download { file, repo, store } => {
            let store = open_store(session, &store, &file, &repo)?;
            if session.dry_run {
                return Ok(());
            }
            store.download()?;
            info!("Downloaded: {}", file.display());
            session.output.success(&file.display().to_string());
        }
        ArtifactsCommands::Promote {
            file,
            from_repo,
            store,
        } => {
            let target = session.settings.artifacts.promotion_target(&from_repo)?;
            let store = open_store(session, &store, &file, target)?;
            if session.dry_run {
                return Ok(());
            }
            store.promote(&from_repo)?;
            info!("Promoted: {} to {}", file.display(), target);
            session.output.success(target);
        }
    }
    Ok(())
}

fn open_store(
    session: &Session,
    args: &StoreArgs,
    file: &Path,
    repo: &str,
) -> Result<Box<dyn ArtifactStore>> {
    let artifact = args.artifact(file, repo);
    let mut store: Box<dyn ArtifactStore> = match args.provider {
        StoreKind::S3 => Box::new(
            S3Store::new(artifact, args.bucket.clone(), &session.settings.artifacts)
                .with_region(Some(args.region.clone())),
        ),
        StoreKind::Nexus => {
            let url = args
                .url
                .clone()
                .or_else(|| session.settings.artifacts.nexus_url.clone())
                .unwrap_or_default();
            Box::new(
                NexusStore::new(artifact, url)
                    .with_credentials(args.user.clone(), args.pass.clone()),
            )
        }
    };

    if let Some(defaults) = stacks_defaults(session, &args.stacksconf, args.provider)? {
        store.merge_defaults(&defaults);
    }
    debug!("Artifact: {:?}", store.artifact());
    Ok(store)
}

/// Reads `/artifacts/<provider>` from the stacks configuration, when there is one
fn stacks_defaults(
    session: &Session,
    conf: &Path,
    provider: StoreKind,
) -> Result<Option<ArtifactDefaults>> {
    if !conf.is_file() {
        debug!("No stacks configuration at {}", conf.display());
        return Ok(None);
    }

    let api = provisioning_api(&session.settings.stacks)?;
    let helpers = HelperRegistry::with_builtins(Some(Box::new(ApiOutputs(api))));
    let config = StacksConfig::load(conf, helpers, default_render_vars(Path::new(".")))
        .with_context(|| format!("Failed to load stacks configuration {}", conf.display()))?;

    let section = config.fetch_pointer(&format!("/artifacts/{}", provider.as_str()))?;
    Ok(section
        .map(|value| ArtifactDefaults::from_yaml(&value))
        .filter(|defaults| !defaults.is_empty()))
}
