//! Tool settings
//!
//! Settings are read from the file given with `--config` (or `SDT_CONFIG`),
//! falling back to `config.toml` in the platform config directory
//! (`~/.config/stack-deploy/` on Linux). A missing file means defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Failed to parse settings: {0}")]
    Parse(String),
}

/// Which provisioning backend to talk to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// CloudFormation through the AWS SDK
    #[default]
    Aws,
    /// In-process simulation, nothing leaves the machine
    Memory,
}

/// Settings for stack operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StacksSettings {
    pub provider: ProviderKind,

    /// Upper bound on a single wait loop, in seconds
    pub max_wait_secs: u64,

    /// Pause between two status checks, in seconds
    pub poll_interval_secs: u64,

    /// Overrides the region from the AWS environment and profile
    pub region: Option<String>,

    /// File the memory provider keeps its stacks in between runs
    pub memory_state: Option<PathBuf>,
}

impl Default for StacksSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Aws,
            max_wait_secs: 15 * 60,
            poll_interval_secs: 15,
            region: None,
            memory_state: None,
        }
    }
}

impl StacksSettings {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Settings for artifact stores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    /// Object key template (placeholders: {{Repo}}, {{Key}}, {{Name}}, {{Version}}, {{FileName}})
    pub s3_path: String,

    /// Bucket URL template (placeholder: {{Bucket}})
    pub s3_bucket_url: String,

    /// Nexus upload endpoint
    pub nexus_url: Option<String>,

    /// Repositories in promotion order
    pub promotion_path: Vec<String>,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            s3_path: "artifacts/{{Repo}}/{{Key}}/{{Name}}/{{Version}}/{{FileName}}".to_string(),
            s3_bucket_url: "s3://{{Bucket}}/".to_string(),
            nexus_url: None,
            promotion_path: ["sandbox", "snapshot", "staging", "release"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ArtifactSettings {
    /// Returns the repository an artifact in `from` is promoted to
    pub fn promotion_target(&self, from: &str) -> Result<&str, SettingsError> {
        let idx = self
            .promotion_path
            .iter()
            .position(|r| r == from)
            .ok_or_else(|| SettingsError::Invalid(format!("Unknown repository: {}", from)))?;

        self.promotion_path
            .get(idx + 1)
            .map(String::as_str)
            .ok_or_else(|| SettingsError::Invalid(format!("Nothing to promote to after {}", from)))
    }
}

/// All settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub stacks: StacksSettings,
    pub artifacts: ArtifactSettings,
}

impl Settings {
    /// Loads settings from an explicit path, or from the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Returns the default settings file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "stack-deploy", "stack-deploy")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;

        Self::parse(&content).context("Failed to parse settings")
    }

    /// Parses settings from TOML text
    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| SettingsError::Parse(e.to_string()))?;

        if settings.artifacts.promotion_path.is_empty() {
            return Err(SettingsError::Invalid(
                "artifacts.promotion_path must not be empty".to_string(),
            ));
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_settings() {
        let settings = Settings::default();

        assert_eq!(settings.stacks.provider, ProviderKind::Aws);
        assert_eq!(settings.stacks.max_wait(), Duration::from_secs(900));
        assert_eq!(settings.stacks.poll_interval(), Duration::from_secs(15));
        assert_eq!(settings.artifacts.promotion_path.len(), 4);
    }

    #[test]
    fn parse_partial_settings() {
        let toml = r#"
[stacks]
provider = "memory"
poll_interval_secs = 0

[artifacts]
nexus_url = "https://nexus.example.com/service/local/artifact/maven/content"
"#;

        let settings = Settings::parse(toml).unwrap();
        assert_eq!(settings.stacks.provider, ProviderKind::Memory);
        assert_eq!(settings.stacks.poll_interval_secs, 0);
        assert_eq!(settings.stacks.max_wait_secs, 900);
        assert!(settings.artifacts.nexus_url.is_some());
        assert!(settings.artifacts.s3_path.contains("{{FileName}}"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Settings::parse("stacks = 3"),
            Err(SettingsError::Parse(_))
        ));
        assert!(matches!(
            Settings::parse("[artifacts]\npromotion_path = []"),
            Err(SettingsError::Invalid(_))
        ));
    }

    #[test]
    fn load_from_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[stacks]\nmax_wait_secs = 60\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.stacks.max_wait_secs, 60);

        assert!(Settings::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn promotion_targets() {
        let settings = ArtifactSettings::default();

        assert_eq!(settings.promotion_target("sandbox").unwrap(), "snapshot");
        assert_eq!(settings.promotion_target("staging").unwrap(), "release");
        assert!(settings.promotion_target("release").is_err());
        assert!(settings.promotion_target("nightly").is_err());
    }
}
