//! Stack configuration documents
//!
//! ```yaml
//! artifacts:
//!   s3: { bucket: my-bucket }
//! stacks:
//!   build:                       # environment
//!     Endpoint: "{{output stack=\"elb-build\" key=\"ELBDNS\"}}"   # environment value
//!     nagios-elb:                # stack label
//!       stack_name: "nagios-elb-build"
//!       template: elb
//!       parameters: { Port: 443 }
//!       tags: { team: ops }
//!     nagios-server:
//!       depends_on: nagios-elb
//! ```
//!
//! Values are rendered on access. Stack names are rendered when an
//! environment is fetched; parameters, tags and templates only when a stack
//! is prepared, so they may refer to outputs of stacks deployed earlier in
//! the same run.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::debug;

use super::directives::{load_template, TemplateBody, TemplateError};
use super::render::{HelperRegistry, RenderError, Renderer, TemplateRenderer};
use crate::domain::{
    resolve, Dependent, ExecutionPlan, ResolveError, Selection, StackDefinition, StackRef,
    StackRefError,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read stack configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid stack configuration: {0}")]
    Parse(String),

    #[error("Environment not found: {0}")]
    UnknownEnvironment(String),

    #[error("Stack {label} not found in environment {environment}")]
    UnknownStack { environment: String, label: String },

    #[error("Stack {label} depends on unknown stack {dependency}")]
    UnknownDependency { label: String, dependency: String },

    #[error("Invalid {key} for stack {label}: {reason}")]
    InvalidValue {
        label: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Reference(#[from] StackRefError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// A parsed stack configuration file plus the renderer for its values
pub struct StacksConfig {
    path: PathBuf,
    document: Value,
    renderer: Box<dyn Renderer>,
}

impl StacksConfig {
    /// Loads a configuration file, rendering with the built-in template renderer
    pub fn load(
        path: &Path,
        helpers: HelperRegistry,
        defaults: BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document = parse_document(&text)?;
        let json = serde_json::to_value(&document).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let renderer = TemplateRenderer::from_env(helpers, defaults).with_document(json);

        Ok(Self::new(path, document, Box::new(renderer)))
    }

    /// Creates a configuration from an already parsed document
    pub fn new(path: &Path, document: Value, renderer: Box<dyn Renderer>) -> Self {
        Self {
            path: path.to_path_buf(),
            document,
            renderer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory templates are looked up in
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// Returns the document as written, nothing rendered
    pub fn raw(&self) -> &Value {
        &self.document
    }

    /// Returns the whole document rendered
    pub fn fetch_all(&self) -> Result<Value, ConfigError> {
        self.render_value(&self.document)
    }

    /// Returns a top-level value rendered, if present
    pub fn fetch(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        self.document
            .get(key)
            .map(|v| self.render_value(v))
            .transpose()
    }

    /// Returns the value at a JSON pointer rendered, if present
    pub fn fetch_pointer(&self, ptr: &str) -> Result<Option<Value>, ConfigError> {
        pointer(&self.document, ptr)
            .map(|v| self.render_value(v))
            .transpose()
    }

    /// Renders every string inside a value
    pub fn render_value(&self, value: &Value) -> Result<Value, ConfigError> {
        Ok(match value {
            Value::String(s) => Value::String(self.renderer.render(s)?),
            Value::Sequence(items) => Value::Sequence(
                items
                    .iter()
                    .map(|v| self.render_value(v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Mapping(map) => {
                let mut out = Mapping::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.render_value(v)?);
                }
                Value::Mapping(out)
            }
            other => other.clone(),
        })
    }

    /// Renders a string through this configuration's renderer
    pub fn render(&self, input: &str) -> Result<String, ConfigError> {
        Ok(self.renderer.render(input)?)
    }

    /// Parses `reference` and selects stacks of one environment
    pub fn environment_by_ref(
        &self,
        reference: &str,
    ) -> Result<EnvironmentStacks<'_>, ConfigError> {
        self.environment(&reference.parse()?)
    }

    /// Selects stacks of one environment and orders them
    pub fn environment(&self, reference: &StackRef) -> Result<EnvironmentStacks<'_>, ConfigError> {
        let env = &reference.environment;
        let scope = self
            .document
            .get("stacks")
            .and_then(|s| s.get(env.as_str()))
            .and_then(Value::as_mapping)
            .ok_or_else(|| ConfigError::UnknownEnvironment(env.clone()))?;

        let declared: Vec<&str> = scope
            .iter()
            .filter(|(_, v)| v.is_mapping())
            .filter_map(|(k, _)| k.as_str())
            .collect();

        let selected: Vec<&str> = match &reference.selection {
            Selection::All => declared.clone(),
            Selection::Labels(labels) => labels
                .iter()
                .map(|l| {
                    declared
                        .iter()
                        .find(|d| **d == l.as_str())
                        .copied()
                        .ok_or_else(|| ConfigError::UnknownStack {
                            environment: env.clone(),
                            label: l.clone(),
                        })
                })
                .collect::<Result<_, _>>()?,
        };

        let known: HashSet<&str> = declared.iter().copied().collect();
        let mut entries = Vec::with_capacity(selected.len());
        let mut seen = HashSet::new();
        for label in selected {
            if !seen.insert(label) {
                continue;
            }
            debug!("looking for stack: {}", label);
            let yaml = scope
                .get(label)
                .and_then(Value::as_mapping)
                .cloned()
                .unwrap_or_default();
            entries.push(self.entry(label, yaml, &known)?);
        }

        let plan = resolve(&entries)?;
        debug!("stack order for {}: {:?}", reference, plan.order());

        Ok(EnvironmentStacks {
            config: self,
            environment: env.clone(),
            scope: scope.clone(),
            entries,
            plan,
        })
    }

    fn entry(
        &self,
        label: &str,
        yaml: Mapping,
        known: &HashSet<&str>,
    ) -> Result<StackEntry, ConfigError> {
        let name = match yaml.get("stack_name") {
            Some(v) => self.scalar(label, "stack_name", v)?,
            None => label.to_string(),
        };

        let depends_on = match yaml.get("depends_on") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(d)) => vec![d.clone()],
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|d| {
                    d.as_str().map(String::from).ok_or_else(|| ConfigError::InvalidValue {
                        label: label.to_string(),
                        key: "depends_on".into(),
                        reason: "expected a list of stack labels".into(),
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(ConfigError::InvalidValue {
                    label: label.to_string(),
                    key: "depends_on".into(),
                    reason: "expected a stack label or a list of them".into(),
                })
            }
        };

        if let Some(dependency) = depends_on.iter().find(|d| !known.contains(d.as_str())) {
            return Err(ConfigError::UnknownDependency {
                label: label.to_string(),
                dependency: dependency.clone(),
            });
        }

        Ok(StackEntry {
            label: label.to_string(),
            name,
            depends_on,
            yaml,
        })
    }

    /// Renders a scalar into a string
    fn scalar(&self, label: &str, key: &str, value: &Value) -> Result<String, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            label: label.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        };

        match value {
            Value::String(s) => self.render(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Ok(String::new()),
            Value::Sequence(items) => items
                .iter()
                .map(|v| match v {
                    Value::Sequence(_) | Value::Mapping(_) => {
                        Err(invalid("nested lists are not supported"))
                    }
                    v => self.scalar(label, key, v),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|parts| parts.join(",")),
            Value::Mapping(_) | Value::Tagged(_) => Err(invalid("expected a scalar value")),
        }
    }

    fn string_map(
        &self,
        label: &str,
        key: &str,
        value: Option<&Value>,
    ) -> Result<BTreeMap<String, String>, ConfigError> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(BTreeMap::new());
        };
        let map = value.as_mapping().ok_or_else(|| ConfigError::InvalidValue {
            label: label.to_string(),
            key: key.to_string(),
            reason: "expected a mapping".into(),
        })?;

        map.iter()
            .map(|(k, v)| {
                let k = match k {
                    Value::String(s) => s.clone(),
                    other => self.scalar(label, key, other)?,
                };
                Ok((k, self.scalar(label, key, v)?))
            })
            .collect()
    }
}

/// Parses YAML text into a document whose top level is a mapping
pub fn parse_document(text: &str) -> Result<Value, ConfigError> {
    let document: Value =
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    if !document.is_mapping() {
        return Err(ConfigError::Parse("top level must be a mapping".into()));
    }
    Ok(document)
}

/// Resolves an RFC 6901 pointer inside a YAML value
pub fn pointer<'a>(value: &'a Value, ptr: &str) -> Option<&'a Value> {
    if ptr.is_empty() {
        return Some(value);
    }
    let rest = ptr.strip_prefix('/')?;

    rest.split('/').try_fold(value, |current, token| {
        let token = token.replace("~1", "/").replace("~0", "~");
        match current {
            Value::Mapping(map) => map.get(token.as_str()),
            Value::Sequence(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

/// A stack as declared, before its values are rendered
#[derive(Debug, Clone)]
pub struct StackEntry {
    pub label: String,
    pub name: String,
    pub depends_on: Vec<String>,
    yaml: Mapping,
}

impl Dependent for StackEntry {
    fn label(&self) -> &str {
        &self.label
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }
}

/// The stacks selected from one environment, in execution order
pub struct EnvironmentStacks<'a> {
    config: &'a StacksConfig,
    environment: String,
    scope: Mapping,
    entries: Vec<StackEntry>,
    plan: ExecutionPlan,
}

impl<'a> EnvironmentStacks<'a> {
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Labels in creation/update order
    pub fn order(&self) -> &[String] {
        self.plan.order()
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn entry(&self, label: &str) -> Option<&StackEntry> {
        self.entries.iter().find(|e| e.label == label)
    }

    /// Remote name of a stack
    pub fn stack_name(&self, label: &str) -> Option<&str> {
        self.entry(label).map(|e| e.name.as_str())
    }

    /// Returns an environment-level value rendered, if present
    pub fn fetch(&self, item: &str) -> Result<Option<Value>, ConfigError> {
        self.scope
            .get(item)
            .map(|v| self.config.render_value(v))
            .transpose()
    }

    /// Returns the whole environment section rendered
    pub fn fetch_all(&self) -> Result<Value, ConfigError> {
        self.config.render_value(&Value::Mapping(self.scope.clone()))
    }

    /// Renders one stack's values
    pub fn definition(&self, label: &str) -> Result<StackDefinition, ConfigError> {
        let entry = self.entry(label).ok_or_else(|| ConfigError::UnknownStack {
            environment: self.environment.clone(),
            label: label.to_string(),
        })?;

        let template = match entry.yaml.get("template") {
            Some(v) => self.config.scalar(label, "template", v)?,
            None => label.to_string(),
        };

        Ok(StackDefinition {
            label: entry.label.clone(),
            name: entry.name.clone(),
            template,
            depends_on: entry.depends_on.clone(),
            parameters: self.config.string_map(label, "parameters", entry.yaml.get("parameters"))?,
            tags: self.config.string_map(label, "tags", entry.yaml.get("tags"))?,
        })
    }

    /// Loads the template body for a rendered definition
    pub fn template(&self, definition: &StackDefinition) -> Result<TemplateBody, ConfigError> {
        Ok(load_template(
            self.config.base_dir(),
            &[definition.template.as_str(), definition.name.as_str()],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::config::render::OutputFinder;
    use handlebars::{Context, Handlebars, Helper, HelperResult, Output, RenderContext};
    use tempfile::TempDir;

    const STACKS: &str = r#"
artifacts:
  s3:
    version: "${APP_VERSION:-0.0.1}"
stacks:
  build:
    Endpoint: '{{output stack="nagios-elb-build-{{env.STACK_VERSION}}" key="ELBDNS"}}'
    "E/P": testing
    "A~B": hello
    nagios-elb:
      stack_name: '{{#escstackname}}nagios-elb-build-{{pipeline_version}}{{/escstackname}}'
      parameters:
        Port: 443
        Public: true
        Subnets: [a, b]
      tags:
        team: "ops-{{env.TEAM default=\"core\"}}"
    nagios-server:
      depends_on: nagios-elb
      template: server
  qa2:
    nagios-internal-dns: {}
    nagios-r53:
      depends_on: [nagios-internal-dns]
    nagios-elb: {}
    nagios-server:
      depends_on: [nagios-elb]
  broken:
    a:
      depends_on: ghost
  cyclic:
    a: { depends_on: c }
    b: { depends_on: a }
    c: { depends_on: b }
"#;

    struct Outputs;

    impl OutputFinder for Outputs {
        fn find_output(&self, stack: &str, key: &str) -> Result<String, String> {
            Ok(format!("https://{stack}/{key}"))
        }
    }

    fn config(dir: &Path) -> StacksConfig {
        let vars: HashMap<String, String> = [
            ("PIPELINE_VERSION", "1.2.3"),
            ("STACK_VERSION", "4-3-2"),
            ("APP_VERSION", "1.3.3"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let document = parse_document(STACKS).unwrap();
        let json = serde_json::to_value(&document).unwrap();
        let helpers = HelperRegistry::with_builtins(Some(Box::new(Outputs)));
        let renderer = TemplateRenderer::new(helpers, vars).with_document(json);
        StacksConfig::new(&dir.join("stacks.yml"), document, Box::new(renderer))
    }

    #[test]
    fn fetch_renders_values() {
        let dir = TempDir::new().unwrap();
        let c = config(dir.path());

        assert_eq!(
            c.fetch_pointer("/artifacts/s3/version").unwrap(),
            Some(Value::String("1.3.3".into()))
        );
        assert!(c.fetch("nothing").unwrap().is_none());
        assert!(c.fetch_all().unwrap().is_mapping());
    }

    #[test]
    fn dependency_order() {
        let dir = TempDir::new().unwrap();
        let c = config(dir.path());

        let build = c.environment_by_ref("build").unwrap();
        assert_eq!(build.order(), ["nagios-elb", "nagios-server"]);
        assert_eq!(build.stack_name("nagios-elb"), Some("nagios-elb-build-1-2-3"));
        assert_eq!(build.stack_name("nagios-server"), Some("nagios-server"));
    }

    #[test]
    fn independent_chains_keep_their_order() {
        let dir = TempDir::new().unwrap();
        let c = config(dir.path());

        let qa2 = c.environment_by_ref("qa2").unwrap();
        let idx = |l: &str| qa2.order().iter().position(|o| o == l).unwrap();
        assert_eq!(qa2.order().len(), 4);
        assert!(idx("nagios-internal-dns") < idx("nagios-r53"));
        assert!(idx("nagios-elb") < idx("nagios-server"));
    }

    #[test]
    fn selection_of_single_stack() {
        let dir = TempDir::new().unwrap();
        let c = config(dir.path());

        let env = c.environment_by_ref("build.nagios-server").unwrap();
        assert_eq!(env.order(), ["nagios-server"]);
        assert!(env.entry("nagios-elb").is_none());
    }

    #[test]
    fn environment_values() {
        let dir = TempDir::new().unwrap();
        let c = config(dir.path());
        let env = c.environment_by_ref("build.nagios-server").unwrap();

        assert_eq!(
            env.fetch("Endpoint").unwrap(),
            Some(Value::String("https://nagios-elb-build-4-3-2/ELBDNS".into()))
        );
        assert_eq!(env.fetch("E/P").unwrap(), Some(Value::String("testing".into())));
        assert_eq!(env.fetch("A~B").unwrap(), Some(Value::String("hello".into())));
        assert!(env.fetch("asdfasdf").unwrap().is_none());
    }

    #[test]
    fn definition_renders_parameters_and_tags() {
        let dir = TempDir::new().unwrap();
        let c = config(dir.path());
        let env = c.environment_by_ref("build").unwrap();

        let elb = env.definition("nagios-elb").unwrap();
        assert_eq!(elb.template, "nagios-elb");
        assert_eq!(elb.parameters["Port"], "443");
        assert_eq!(elb.parameters["Public"], "true");
        assert_eq!(elb.parameters["Subnets"], "a,b");
        assert_eq!(elb.tags["team"], "ops-core");

        let server = env.definition("nagios-server").unwrap();
        assert_eq!(server.template, "server");
        assert_eq!(server.depends_on, vec!["nagios-elb"]);
    }

    #[test]
    fn template_lookup_falls_back_to_stack_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("nagios-elb-build-1-2-3.yaml"), "Resources: {}\n").unwrap();
        let c = config(dir.path());
        let env = c.environment_by_ref("build").unwrap();

        let elb = env.definition("nagios-elb").unwrap();
        let body = env.template(&elb).unwrap();
        assert!(body.path.ends_with("nagios-elb-build-1-2-3.yaml"));

        let server = env.definition("nagios-server").unwrap();
        assert!(matches!(env.template(&server), Err(ConfigError::Template(_))));
    }

    #[test]
    fn configuration_errors() {
        let dir = TempDir::new().unwrap();
        let c = config(dir.path());

        assert!(matches!(
            c.environment_by_ref("prod"),
            Err(ConfigError::UnknownEnvironment(_))
        ));
        assert!(matches!(
            c.environment_by_ref("build[nagios-elb,nope]"),
            Err(ConfigError::UnknownStack { .. })
        ));
        assert!(matches!(
            c.environment_by_ref("broken"),
            Err(ConfigError::UnknownDependency { .. })
        ));
        assert!(matches!(
            c.environment_by_ref("cyclic"),
            Err(ConfigError::Resolve(ResolveError::CyclicDependency { .. }))
        ));
        assert!(matches!(c.environment_by_ref(""), Err(ConfigError::Reference(_))));
    }

    #[test]
    fn pointer_escapes() {
        let doc = parse_document("a/b: {c~d: [x, y]}").unwrap();
        assert_eq!(pointer(&doc, "/a~1b/c~0d/1"), Some(&Value::String("y".into())));
        assert_eq!(pointer(&doc, ""), Some(&doc));
        assert!(pointer(&doc, "nope").is_none());
    }

    #[test]
    fn rejects_non_mapping_document() {
        assert!(matches!(parse_document("- a\n- b"), Err(ConfigError::Parse(_))));
        assert!(matches!(parse_document("a: ["), Err(ConfigError::Parse(_))));
    }

    fn noop(
        _: &Helper,
        _: &Handlebars,
        _: &Context,
        _: &mut RenderContext,
        _: &mut dyn Output,
    ) -> HelperResult {
        Ok(())
    }

    #[test]
    fn load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stacks.yml");
        fs::write(&path, "stacks:\n  dev:\n    app: {}\n").unwrap();

        let mut helpers = HelperRegistry::with_builtins(None);
        helpers.register("noop", noop);
        let c = StacksConfig::load(&path, helpers, BTreeMap::new()).unwrap();

        assert_eq!(c.environment_by_ref("dev").unwrap().order(), ["app"]);

        let missing = dir.path().join("missing.yml");
        assert!(StacksConfig::load(&missing, HelperRegistry::new(), BTreeMap::new()).is_err());
    }
}
