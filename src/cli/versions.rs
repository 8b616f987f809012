//! Version CLI commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use tracing::warn;

use super::app::Session;
use crate::domain::{Bump, Version};
use crate::versioning::{load_version, write_version, BuildProps, Git, BUILD_PROPS, VERSION_PROPS};

/// Part of the version to change
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BumpPart {
    Major,
    Minor,
    Patch,
    /// Build metadata becomes the current git hash
    Metadata,
}

#[derive(Subcommand)]
pub enum VersionsCommands {
    /// Bump the version in version.properties
    Bump {
        #[arg(value_enum)]
        part: BumpPart,
    },

    /// Print the current version
    Print,

    /// Set the version
    Set {
        #[arg(value_name = "VERSION")]
        value: Version,

        /// Properties file to write
        #[arg(default_value = VERSION_PROPS)]
        file: PathBuf,
    },

    /// Start at 0.0.0 with the git hash as build metadata
    Init {
        /// Properties file to write
        #[arg(default_value = VERSION_PROPS)]
        file: PathBuf,
    },

    /// Write build.properties with the artifact version and git details
    Build {
        /// Properties file to write
        #[arg(default_value = BUILD_PROPS)]
        file: PathBuf,
    },
}

pub fn run(cmd: VersionsCommands, session: &Session) -> Result<()> {
    let git = Git::new(".");
    let version_file = Path::new(VERSION_PROPS);

    match cmd {
        VersionsCommands::Bump { part } => {
            let mut version = load_version(version_file)?;
            session.output.field("Current version", "current", &version.to_string());

            match part {
                BumpPart::Major => version.bump(Bump::Major),
                BumpPart::Minor => version.bump(Bump::Minor),
                BumpPart::Patch => version.bump(Bump::Patch),
                BumpPart::Metadata => {
                    let hash = git.hash().context("No git commit to take metadata from")?;
                    version.set_build(&hash)?;
                }
            }

            session.output.field("New version", "new", &version.to_string());
            write(session, version_file, &version)
        }

        VersionsCommands::Print => {
            let version = load_version(version_file)?;
            session.output.field("Version", "version", &version.to_string());
            Ok(())
        }

        VersionsCommands::Set { value, file } => {
            session.output.field("New version", "new", &value.to_string());
            write(session, &file, &value)
        }

        VersionsCommands::Init { file } => {
            let mut version = Version::default();
            match git.hash() {
                Some(hash) => version.set_build(&hash)?,
                None => warn!("Not a git repository, no build metadata"),
            }
            session.output.field("New version", "new", &version.to_string());
            write(session, &file, &version)
        }

        VersionsCommands::Build { file } => {
            let mut version = load_version(version_file)?;
            let commit = git.hash().unwrap_or_default();
            if !commit.is_empty() {
                version.set_build(&commit)?;
            }
            let props = BuildProps {
                version,
                commit,
                branch: git.branch().unwrap_or_default(),
            };

            if !session.dry_run {
                props.write(&file)?;
            }
            session.output.field(
                "Artifact version",
                "artifact_version",
                &props.version.to_string(),
            );
            Ok(())
        }
    }
}

fn write(session: &Session, file: &Path, version: &Version) -> Result<()> {
    if session.dry_run {
        return Ok(());
    }
    write_version(file, version)?;
    Ok(())
}
