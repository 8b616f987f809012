//! Configuration
//!
//! Two kinds of configuration are read here:
//!
//! - tool settings (`config.toml`): provider, polling bounds, artifact paths
//! - the stacks document (YAML): environments, their stacks, dependencies,
//!   parameters and tags, rendered through the template [`Renderer`]
//!
//! Template bodies and their include directives live in `directives`.

mod directives;
mod render;
mod settings;
mod stacks;

pub use directives::{
    apply_env_directive, apply_file_lines_directive, include_file_lines_json, load_template,
    TemplateBody, TemplateError, TemplateFormat, FN_INCLUDE_FILE_LINES,
};
pub use render::{
    escape_stack_name, HelperRegistry, OutputFinder, RenderError, Renderer, TemplateRenderer,
};
pub use settings::{ArtifactSettings, ProviderKind, Settings, SettingsError, StacksSettings};
pub use stacks::{
    parse_document, pointer, ConfigError, EnvironmentStacks, StackEntry, StacksConfig,
};
