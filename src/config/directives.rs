//! Template bodies and their include directives
//!
//! | Form | Body | Expands to |
//! |------|------|------------|
//! | `${Local::IncludeFileLines f}` | YAML | lines of `f`, indented at the directive's column |
//! | `!Local::IncludeFileLines f` | YAML | `!Sub \|` block holding the lines of `f` |
//! | `${Local::IncludeEnv VAR}` / `!Local::IncludeEnv VAR` | YAML | value of `VAR` |
//! | `{"Fn::Local::IncludeFileLines": "f"}` | JSON | list of `{"Fn::Sub": line}` |
//!
//! `IncludeFile` is accepted as a synonym of `IncludeFileLines`. File paths
//! are relative to the directory of the template.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

pub const FN_INCLUDE_FILE_LINES: &str = "Fn::Local::IncludeFileLines";

const EXTENSIONS: [&str; 4] = ["", ".yml", ".yaml", ".json"];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("No template found for: {}", .0.join(", "))]
    NotFound(Vec<String>),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON template {path}: {reason}")]
    Json { path: PathBuf, reason: String },
}

/// Syntax of a template body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    Yaml,
    Json,
}

/// A template body with directives applied
#[derive(Debug, Clone)]
pub struct TemplateBody {
    pub path: PathBuf,
    pub format: TemplateFormat,
    pub body: String,
}

/// Locates and loads a template
///
/// Each candidate name (relative to `dir`) is tried as is, then with
/// `.yml`, `.yaml` and `.json` appended; the first existing file wins.
pub fn load_template(dir: &Path, candidates: &[&str]) -> Result<TemplateBody, TemplateError> {
    for name in candidates {
        for ext in EXTENSIONS {
            let path = dir.join(format!("{name}{ext}"));
            debug!("looking for template: {}", path.display());
            if !path.is_file() {
                continue;
            }

            let raw = fs::read_to_string(&path).map_err(|source| TemplateError::Read {
                path: path.clone(),
                source,
            })?;
            debug!("found template: {}", path.display());
            return load_body(&path, &raw);
        }
    }

    Err(TemplateError::NotFound(
        candidates.iter().map(|c| c.to_string()).collect(),
    ))
}

fn load_body(path: &Path, raw: &str) -> Result<TemplateBody, TemplateError> {
    let base = path.parent().unwrap_or(Path::new("."));
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

    let as_yaml = || -> Result<TemplateBody, TemplateError> {
        let body = apply_env_directive(raw, |k| std::env::var(k).ok());
        Ok(TemplateBody {
            path: path.to_path_buf(),
            format: TemplateFormat::Yaml,
            body: apply_file_lines_directive(&body, base)?,
        })
    };

    match ext {
        "yml" | "yaml" => as_yaml(),
        "json" => load_json(path, raw, base),
        // extensionless: JSON when it parses, YAML otherwise
        _ if serde_json::from_str::<Value>(raw).is_ok() => load_json(path, raw, base),
        _ => as_yaml(),
    }
}

fn load_json(path: &Path, raw: &str, base: &Path) -> Result<TemplateBody, TemplateError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| TemplateError::Json {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let value = include_file_lines_json(value, base)?;

    Ok(TemplateBody {
        path: path.to_path_buf(),
        format: TemplateFormat::Json,
        body: value.to_string(),
    })
}

fn literal_include_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{[ ]*Local::IncludeFile(?:Lines)?[ ]+([^}]+)\}").expect("valid regex")
    })
}

fn tag_include_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!Local::IncludeFile(?:Lines)?[ ]+(.+)").expect("valid regex"))
}

fn literal_env_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{[ ]*Local::IncludeEnv[ ]+([^}\s]+)[ ]*\}").expect("valid regex")
    })
}

fn tag_env_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!Local::IncludeEnv[ ]+(\S+)").expect("valid regex"))
}

/// Replaces env include directives with the variable's value (empty when unset)
pub fn apply_env_directive<F>(body: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(body.len());

    for line in body.split_inclusive('\n') {
        let re = if literal_env_re().is_match(line) {
            literal_env_re()
        } else {
            tag_env_re()
        };

        match re.captures(line) {
            Some(caps) => {
                let (Some(all), Some(name)) = (caps.get(0), caps.get(1)) else {
                    out.push_str(line);
                    continue;
                };
                debug!("loading include env: {}", name.as_str());
                out.push_str(&line[..all.start()]);
                out.push_str(&lookup(name.as_str()).unwrap_or_default());
                out.push_str(&line[all.end()..]);
            }
            None => out.push_str(line),
        }
    }

    out
}

/// Expands file include directives in a YAML body
///
/// A literal directive replaces its whole line; a tag directive keeps the text
/// before the tag and nests the file below it.
pub fn apply_file_lines_directive(body: &str, base: &Path) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(body.len());

    for line in body.split_inclusive('\n') {
        if let Some(caps) = literal_include_re().captures(line) {
            let (Some(all), Some(file)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let file = file.as_str().trim();
            debug!("loading include file: {}", file);
            out.push_str(&indented_lines(&base.join(file), all.start())?);
        } else if let Some(caps) = tag_include_re().captures(line) {
            let (Some(all), Some(file)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let file = file.as_str().trim();
            debug!("loading include file: {}", file);
            out.push_str(&line[..all.start()]);
            out.push_str("!Sub |\n");
            out.push_str(&indented_lines(&base.join(file), indentation(line) + 2)?);
        } else {
            out.push_str(line);
        }
    }

    Ok(out)
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn read_lines(path: &Path) -> Result<Vec<String>, TemplateError> {
    let content = fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content.lines().map(String::from).collect())
}

fn indented_lines(path: &Path, depth: usize) -> Result<String, TemplateError> {
    let pad = " ".repeat(depth);
    Ok(read_lines(path)?
        .into_iter()
        .map(|l| format!("{pad}{l}\n"))
        .collect())
}

/// Returns the file named by an include object, if `map` is one
fn include_target(map: &Map<String, Value>) -> Option<&str> {
    map.get(FN_INCLUDE_FILE_LINES).and_then(Value::as_str)
}

fn sub_lines(path: &Path) -> Result<Vec<Value>, TemplateError> {
    Ok(read_lines(path)?
        .into_iter()
        .map(|l| json!({ "Fn::Sub": format!("{l}\n") }))
        .collect())
}

/// Expands `Fn::Local::IncludeFileLines` objects in a JSON document
///
/// Inside an array the included lines are spliced in place of the object.
pub fn include_file_lines_json(value: Value, base: &Path) -> Result<Value, TemplateError> {
    match value {
        Value::Object(map) => match include_target(&map) {
            Some(file) => Ok(Value::Array(sub_lines(&base.join(file))?)),
            None => Ok(Value::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((k, include_file_lines_json(v, base)?)))
                    .collect::<Result<_, TemplateError>>()?,
            )),
        },
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item.as_object().and_then(include_target) {
                    Some(file) => out.extend(sub_lines(&base.join(file))?),
                    None => out.push(include_file_lines_json(item, base)?),
                }
            }
            Ok(Value::Array(out))
        }
        other => Ok(other),
    }
}
