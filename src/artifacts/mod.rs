//! # Artifacts
//!
//! Build artifacts are uploaded to, downloaded from and promoted between
//! repositories (`sandbox`, `snapshot`, ...) of a store:
//!
//! | Store | Upload | Download | Promote |
//! |-------|--------|----------|---------|
//! | [`S3Store`] | yes | yes | yes |
//! | [`NexusStore`] | yes | no | no |
//!
//! Fields not given on the command line can come from the `/artifacts/<store>`
//! section of a stacks document, see [`ArtifactDefaults`].

mod nexus;
mod s3;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::config::SettingsError;

pub use nexus::NexusStore;
pub use s3::S3Store;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Missing artifact setting: {0}")]
    MissingField(&'static str),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed: {message}")]
    Aws {
        operation: &'static str,
        message: String,
    },

    #[error("Upload to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("{operation} is not supported by the {store} store")]
    Unsupported {
        store: &'static str,
        operation: &'static str,
    },

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// One versioned file in a repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    /// Repository, e.g. `sandbox`
    pub repo: String,
    /// Dotted group, e.g. `com.example.ops`
    pub group: String,
    pub name: String,
    /// Local file to upload or download into
    pub file_name: String,
    pub version: String,
}

impl Artifact {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Default::default()
        }
    }

    /// Base name of the local file
    pub fn base_name(&self) -> &str {
        self.file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.file_name)
    }

    /// Group as a path, `com.example` becomes `com/example`
    pub fn key(&self) -> String {
        self.group.replace('.', "/")
    }

    fn merge(&mut self, defaults: &ArtifactDefaults) {
        fill(&mut self.repo, defaults.get("repo"));
        fill(&mut self.group, defaults.get("group"));
        fill(&mut self.name, defaults.get("name"));
        fill(&mut self.version, defaults.get("version"));
        fill(&mut self.file_name, defaults.get("fileName").or(defaults.get("file_name")));
    }
}

/// Fills an empty field
fn fill(field: &mut String, value: Option<&str>) {
    if field.is_empty() {
        if let Some(v) = value {
            *field = v.to_string();
        }
    }
}

/// String settings for a store, keyed like the stacks document spells them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactDefaults(BTreeMap<String, String>);

impl ArtifactDefaults {
    /// Collects the scalar entries of a YAML mapping
    pub fn from_yaml(value: &serde_yaml::Value) -> Self {
        let Some(map) = value.as_mapping() else {
            return Self::default();
        };
        Self(
            map.iter()
                .filter_map(|(k, v)| {
                    let value = match v {
                        serde_yaml::Value::String(s) => s.clone(),
                        serde_yaml::Value::Number(n) => n.to_string(),
                        serde_yaml::Value::Bool(b) => b.to_string(),
                        _ => return None,
                    };
                    Some((k.as_str()?.to_string(), value))
                })
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A place artifacts live
pub trait ArtifactStore {
    /// Store name as used on the command line
    fn kind(&self) -> &'static str;

    fn artifact(&self) -> &Artifact;

    /// Fills settings not given explicitly; explicit values win
    fn merge_defaults(&mut self, defaults: &ArtifactDefaults);

    /// Uploads the artifact's file and returns where it went
    fn upload(&self) -> Result<String, ArtifactError>;

    /// Downloads the artifact into its file
    fn download(&self) -> Result<(), ArtifactError>;

    /// Copies the artifact from `from_repo` into the artifact's repository
    fn promote(&self, from_repo: &str) -> Result<(), ArtifactError>;
}

fn double_slashes() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([^:])(//)").expect("valid regex"))
}

/// Collapses `//` left by empty placeholders, keeping `scheme://`
pub fn clean_double_slashes(path: &str) -> String {
    double_slashes().replace_all(path, "$1/").into_owned()
}

/// Replaces `{{Field}}` placeholders; unknown ones become empty
pub fn fill_path(template: &str, fields: &[(&str, &str)]) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_]+)\s*\}\}").expect("valid regex"));

    re.replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        fields
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
            .unwrap_or_default()
    })
    .into_owned()
}
