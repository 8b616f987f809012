//! Stack definitions, references and remote status

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing a stack reference
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StackRefError {
    #[error("Empty stack reference")]
    Empty,

    #[error("Malformed stack reference: {0}")]
    Malformed(String),
}

/// Which stacks of an environment a command applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every stack of the environment
    All,
    /// Only the named stack labels, in the given order
    Labels(Vec<String>),
}

/// A parsed `env`, `env.label` or `env[a,b,...]` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRef {
    pub environment: String,
    pub selection: Selection,
}

impl FromStr for StackRef {
    type Err = StackRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(StackRefError::Empty);
        }

        let malformed = || StackRefError::Malformed(s.to_string());

        if let Some((env, rest)) = s.split_once('[') {
            let inner = rest.strip_suffix(']').ok_or_else(malformed)?;
            let labels: Vec<String> = inner
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
            if env.is_empty() || labels.is_empty() || inner.contains(['[', ']']) {
                return Err(malformed());
            }
            return Ok(StackRef {
                environment: env.to_string(),
                selection: Selection::Labels(labels),
            });
        }

        if s.contains(']') {
            return Err(malformed());
        }

        match s.split_once('.') {
            Some((env, label)) if !env.is_empty() && !label.is_empty() => Ok(StackRef {
                environment: env.to_string(),
                selection: Selection::Labels(vec![label.to_string()]),
            }),
            Some(_) => Err(malformed()),
            None => Ok(StackRef {
                environment: s.to_string(),
                selection: Selection::All,
            }),
        }
    }
}

impl fmt::Display for StackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selection {
            Selection::All => write!(f, "{}", self.environment),
            Selection::Labels(labels) if labels.len() == 1 => {
                write!(f, "{}.{}", self.environment, labels[0])
            }
            Selection::Labels(labels) => write!(f, "{}[{}]", self.environment, labels.join(",")),
        }
    }
}

/// Anything that can be placed in a dependency graph
pub trait Dependent {
    /// Unique key within the environment
    fn label(&self) -> &str;
    /// Labels this item must come after
    fn depends_on(&self) -> &[String];
}

/// A stack as declared in one environment, with its values already rendered
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackDefinition {
    /// Key of the stack within its environment
    pub label: String,
    /// Remote stack name; defaults to the label
    pub name: String,
    /// Template name used to locate the template body; defaults to the label
    pub template: String,
    pub depends_on: Vec<String>,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl StackDefinition {
    /// Creates a definition with only a label, everything else defaulted
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            name: label.clone(),
            template: label.clone(),
            label,
            depends_on: Vec::new(),
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Adds dependencies (builder style)
    pub fn with_depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }
}

impl Dependent for StackDefinition {
    fn label(&self) -> &str {
        &self.label
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }
}

/// Remote provisioning status, e.g. `CREATE_IN_PROGRESS`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackStatus(pub String);

impl StackStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Terminal failure, including `ROLLBACK_FAILED` and friends
    pub fn is_failed(&self) -> bool {
        self.0.ends_with("_FAILED")
    }

    /// Terminal success (note that `ROLLBACK_COMPLETE` counts)
    pub fn is_complete(&self) -> bool {
        self.0.ends_with("_COMPLETE")
    }

    pub fn is_terminal(&self) -> bool {
        self.is_failed() || self.is_complete()
    }

    /// Still being worked on by the provider
    pub fn is_pending(&self) -> bool {
        self.0.ends_with("_IN_PROGRESS") || self.0.ends_with("_PENDING")
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StackStatus {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
