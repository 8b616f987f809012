//! `version.properties` and `build.properties` files

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::domain::{Version, VersionError};

/// Default file holding the project version
pub const VERSION_PROPS: &str = "version.properties";

/// Default file `versions build` writes
pub const BUILD_PROPS: &str = "build.properties";

const VERSION_KEY: &str = "version=";

#[derive(Debug, Error)]
pub enum PropsError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Version {
        path: PathBuf,
        #[source]
        source: VersionError,
    },
}

/// Reads the version from a properties file; a missing file means `0.0.0`
pub fn load_version(path: &Path) -> Result<Version, PropsError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not found, using 0.0.0", path.display());
            return Ok(Version::default());
        }
        Err(source) => {
            return Err(PropsError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let value = content
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(VERSION_KEY))
        .unwrap_or(content.trim());

    value.parse().map_err(|source| PropsError::Version {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `version=<v>`, replacing the file
pub fn write_version(path: &Path, version: &Version) -> Result<(), PropsError> {
    write(path, &format!("{VERSION_KEY}{version}\n"))
}

/// Facts about a build, written for downstream jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProps {
    pub version: Version,
    pub commit: String,
    pub branch: String,
}

impl BuildProps {
    pub fn to_properties(&self) -> String {
        format!(
            "ARTIFACT_VERSION={}\nARTIFACT_GIT_COMMIT={}\nARTIFACT_GIT_BRANCH={}\n",
            self.version, self.commit, self.branch
        )
    }

    pub fn write(&self, path: &Path) -> Result<(), PropsError> {
        write(path, &self.to_properties())
    }
}

fn write(path: &Path, content: &str) -> Result<(), PropsError> {
    fs::write(path, content).map_err(|source| PropsError::Io {
        path: path.to_path_buf(),
        source,
    })
}
