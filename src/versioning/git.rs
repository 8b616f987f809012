//! Git metadata for versions and build properties
//!
//! Every lookup runs `git` in a working directory and yields `None` when
//! git is missing, the directory is not a repository, or the query has no
//! answer (no tags yet).

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

/// Queries one working directory
#[derive(Debug, Clone)]
pub struct Git {
    dir: PathBuf,
}

impl Git {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current branch name
    pub fn branch(&self) -> Option<String> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Full hash of the last commit
    pub fn hash(&self) -> Option<String> {
        self.run(&["log", "-n", "1", "--pretty=format:%H"])
    }

    /// Most recent tag reachable from HEAD
    pub fn latest_tag(&self) -> Option<String> {
        self.run(&["describe", "--tags", "--abbrev=0"])
    }

    fn run(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            Ok(out) => {
                debug!(
                    "git {} failed: {}",
                    args.join(" "),
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                None
            }
            Err(e) => {
                debug!("Cannot run git: {}", e);
                None
            }
        }
    }
}
