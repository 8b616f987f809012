//! Template rendering for configuration values
//!
//! Two passes run over every string value:
//!
//! 1. `${VAR}` / `${VAR:-default}` substitution from the render variables
//!    (process environment over computed defaults)
//! 2. Handlebars expressions: `{{helper arg key="value"}}`,
//!    `{{#helper}}...{{/helper}}` and `{{env.VAR}}`
//!
//! Helpers are registered on an explicit [`HelperRegistry`] that is handed to
//! the renderer; there is no process-wide helper table. The render context is
//!
//! | Key | Value |
//! |-----|-------|
//! | `env` | every render variable |
//! | `user`, `eid` | `USER` |

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use chrono::Utc;
use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext,
    RenderErrorReason, Renderable,
};
use regex::Regex;
use serde_json::{json, Value as Json};
use thiserror::Error;
use tracing::debug;

/// Nesting limit for helpers that render configuration themselves (`from_yaml`)
const MAX_DEPTH: usize = 8;

/// Handlebars calls this for unknown names, including `env.VAR` paths
const HELPER_MISSING: &str = "helperMissing";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Unknown helper: {0}")]
    UnknownHelper(String),

    #[error("Malformed expression '{expr}': {reason}")]
    Malformed { expr: String, reason: String },

    #[error("Helper {helper} failed: {reason}")]
    Helper { helper: String, reason: String },

    #[error("Template nesting too deep")]
    TooDeep,
}

impl RenderError {
    fn helper(helper: &str, reason: impl Into<String>) -> Self {
        RenderError::Helper {
            helper: helper.to_string(),
            reason: reason.into(),
        }
    }

    fn into_handlebars(self) -> handlebars::RenderError {
        RenderErrorReason::NestedError(Box::new(self)).into()
    }

    /// Recovers errors raised by our helpers from the engine's error
    fn from_handlebars(err: handlebars::RenderError, input: &str) -> Self {
        match err.reason() {
            RenderErrorReason::NestedError(inner) => match inner.downcast_ref::<RenderError>() {
                Some(ours) => ours.clone(),
                None => RenderError::Malformed {
                    expr: input.to_string(),
                    reason: inner.to_string(),
                },
            },
            RenderErrorReason::HelperNotFound(name) => RenderError::UnknownHelper(name.clone()),
            reason => RenderError::Malformed {
                expr: input.to_string(),
                reason: reason.to_string(),
            },
        }
    }
}

/// Renders one configuration string
pub trait Renderer {
    fn render(&self, input: &str) -> Result<String, RenderError>;
}

/// Looks up an output value of a deployed stack
pub trait OutputFinder: Send + Sync {
    fn find_output(&self, stack: &str, key: &str) -> Result<String, String>;
}

/// Registered helpers by name
pub struct HelperRegistry {
    handlebars: Handlebars<'static>,
}

impl Default for HelperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HelperRegistry {
    /// Creates a registry without helpers; output is never HTML-escaped
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper(HELPER_MISSING, Box::new(missing_helper));
        Self { handlebars }
    }

    /// Creates a registry with the built-in helpers
    ///
    /// `output` is only registered when a finder is supplied.
    pub fn with_builtins(outputs: Option<Box<dyn OutputFinder>>) -> Self {
        let mut registry = Self::new();
        registry.register("env", env_helper);
        registry.register("pipeline_version", pipeline_version_helper);
        registry.register("timestamp", timestamp_helper);
        registry.register("escstackname", EscStackName);
        registry.register("from_yaml", FromYaml::default());
        if let Some(finder) = outputs {
            registry.register("output", OutputHelper { finder });
        }
        registry
    }

    /// Registers (or replaces) a helper
    pub fn register(&mut self, name: &str, helper: impl HelperDef + Send + Sync + 'static) {
        self.handlebars.register_helper(name, Box::new(helper));
    }
}

/// Replaces every character outside `[A-Za-z0-9]` with `-`
pub fn escape_stack_name(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// A render variable from the context; empty values count as unset
fn env_var<'a>(ctx: &'a Context, key: &str) -> Option<&'a str> {
    ctx.data()
        .get("env")
        .and_then(|env| env.get(key))
        .and_then(Json::as_str)
        .filter(|v| !v.is_empty())
}

fn scalar(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

/// A positional argument, itself rendered as a template
fn param(
    h: &Helper<'_>,
    idx: usize,
    r: &Handlebars<'_>,
    ctx: &Context,
) -> Result<Option<String>, handlebars::RenderError> {
    h.param(idx)
        .map(|p| render_with(r, ctx, &scalar(p.value())).map_err(RenderError::into_handlebars))
        .transpose()
}

/// A `key=value` argument, itself rendered as a template
fn hash(
    h: &Helper<'_>,
    key: &str,
    r: &Handlebars<'_>,
    ctx: &Context,
) -> Result<Option<String>, handlebars::RenderError> {
    h.hash_get(key)
        .map(|p| render_with(r, ctx, &scalar(p.value())).map_err(RenderError::into_handlebars))
        .transpose()
}

fn missing_helper(
    h: &Helper,
    r: &Handlebars,
    ctx: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let Some(var) = h.name().strip_prefix("env.") else {
        return Err(RenderError::UnknownHelper(h.name().to_string()).into_handlebars());
    };
    let default = hash(h, "default", r, ctx)?.unwrap_or_default();
    out.write(env_var(ctx, var).unwrap_or(&default))?;
    Ok(())
}

fn env_helper(
    h: &Helper,
    r: &Handlebars,
    ctx: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let key = match hash(h, "key", r, ctx)? {
        Some(key) => key,
        None => param(h, 0, r, ctx)?
            .ok_or_else(|| RenderError::helper("env", "missing key").into_handlebars())?,
    };
    let default = hash(h, "default", r, ctx)?.unwrap_or_default();
    debug!("env helper({}) default: {}", key, default);

    out.write(env_var(ctx, &key).unwrap_or(&default))?;
    Ok(())
}

fn pipeline_version_helper(
    _: &Helper,
    _: &Handlebars,
    ctx: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(env_var(ctx, "PIPELINE_VERSION").unwrap_or("NA"))?;
    Ok(())
}

fn timestamp_helper(
    _: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&Utc::now().timestamp().to_string())?;
    Ok(())
}

/// `{{#escstackname}}...{{/escstackname}}` or `{{escstackname "1.2.3"}}`
struct EscStackName;

impl HelperDef for EscStackName {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let input = match h.template() {
            Some(body) => body.renders(r, ctx, rc)?,
            None => param(h, 0, r, ctx)?.unwrap_or_default(),
        };
        out.write(&escape_stack_name(&input))?;
        Ok(())
    }
}

/// JSON encoding of a rendered subtree of the configuration document
#[derive(Default)]
struct FromYaml {
    document: Option<Json>,
    depth: AtomicUsize,
}

impl FromYaml {
    fn lookup(
        &self,
        pointer: &str,
        r: &Handlebars<'_>,
        ctx: &Context,
    ) -> Result<String, RenderError> {
        let pointer = if pointer.starts_with('/') {
            pointer.to_string()
        } else {
            format!("/{pointer}")
        };
        debug!("from_yaml {}", pointer);

        let Some(value) = self.document.as_ref().and_then(|d| d.pointer(&pointer)) else {
            return Ok(String::new());
        };
        let rendered = render_json_with(r, ctx, value)?;
        serde_json::to_string(&rendered)
            .map_err(|e| RenderError::helper("from_yaml", e.to_string()))
    }
}

impl HelperDef for FromYaml {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let Some(pointer) = param(h, 0, r, ctx)? else {
            return Ok(());
        };

        let depth = self.depth.fetch_add(1, Ordering::SeqCst);
        let result = if depth >= MAX_DEPTH {
            Err(RenderError::TooDeep)
        } else {
            self.lookup(&pointer, r, ctx)
        };
        self.depth.fetch_sub(1, Ordering::SeqCst);

        out.write(&result.map_err(RenderError::into_handlebars)?)?;
        Ok(())
    }
}

struct OutputHelper {
    finder: Box<dyn OutputFinder>,
}

impl HelperDef for OutputHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let missing =
            |what: &str| RenderError::helper("output", format!("missing {what}")).into_handlebars();
        let stack = hash(h, "stack", r, ctx)?.ok_or_else(|| missing("stack"))?;
        let key = hash(h, "key", r, ctx)?.ok_or_else(|| missing("key"))?;
        debug!("looking for output {} of {}", key, stack);

        let value = self
            .finder
            .find_output(&stack, &key)
            .map_err(|reason| RenderError::helper("output", reason).into_handlebars())?;
        out.write(&value)?;
        Ok(())
    }
}

fn env_var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid regex")
    })
}

/// `${VAR}` pass; unlike helpers, an empty variable still counts as set
fn substitute_vars(input: &str, ctx: &Context) -> Result<String, RenderError> {
    let env = ctx.data().get("env");
    let mut missing = None;
    let result = env_var_re().replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        match (env.and_then(|e| e.get(name)).and_then(Json::as_str), caps.get(2)) {
            (Some(v), _) => v.to_string(),
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(RenderError::UndefinedVariable(name)),
        None => Ok(result.into_owned()),
    }
}

fn render_with(r: &Handlebars<'_>, ctx: &Context, input: &str) -> Result<String, RenderError> {
    if !input.contains("${") && !input.contains("{{") {
        return Ok(input.to_string());
    }

    let substituted = substitute_vars(input, ctx)?;
    if !substituted.contains("{{") {
        return Ok(substituted);
    }
    r.render_template_with_context(&substituted, ctx)
        .map_err(|e| RenderError::from_handlebars(e, &substituted))
}

fn render_json_with(r: &Handlebars<'_>, ctx: &Context, value: &Json) -> Result<Json, RenderError> {
    Ok(match value {
        Json::String(s) => Json::String(render_with(r, ctx, s)?),
        Json::Array(items) => Json::Array(
            items
                .iter()
                .map(|v| render_json_with(r, ctx, v))
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(map) => Json::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_json_with(r, ctx, v)?)))
                .collect::<Result<_, RenderError>>()?,
        ),
        other => other.clone(),
    })
}

/// The built-in [`Renderer`]
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
    context: Context,
}

impl TemplateRenderer {
    /// Creates a renderer over explicit variables
    pub fn new(helpers: HelperRegistry, vars: HashMap<String, String>) -> Self {
        let user = vars.get("USER").cloned().unwrap_or_default();
        let data = json!({
            "env": vars,
            "user": user,
            "eid": user,
        });
        Self {
            handlebars: helpers.handlebars,
            context: Context::from(data),
        }
    }

    /// Creates a renderer whose variables are `defaults` overridden by the process environment
    pub fn from_env(helpers: HelperRegistry, defaults: BTreeMap<String, String>) -> Self {
        let mut vars: HashMap<String, String> = defaults.into_iter().collect();
        vars.extend(std::env::vars());
        Self::new(helpers, vars)
    }

    /// Attaches the document `from_yaml` reads from
    pub fn with_document(mut self, document: Json) -> Self {
        self.handlebars.register_helper(
            "from_yaml",
            Box::new(FromYaml {
                document: Some(document),
                depth: AtomicUsize::new(0),
            }),
        );
        self
    }

    /// Looks up a render variable; empty values count as unset
    pub fn var(&self, key: &str) -> Option<&str> {
        env_var(&self.context, key)
    }

    /// Renders every string inside a JSON value
    pub fn render_json(&self, value: &Json) -> Result<Json, RenderError> {
        render_json_with(&self.handlebars, &self.context, value)
    }
}

impl Renderer for TemplateRenderer {
    fn render(&self, input: &str) -> Result<String, RenderError> {
        render_with(&self.handlebars, &self.context, input)
    }
}
