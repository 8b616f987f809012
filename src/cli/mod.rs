//! # Command-Line Interface
//!
//! User-facing commands and output formatting.
//!
//! ## Command Groups
//!
//! | Group | Purpose | Examples |
//! |-------|---------|----------|
//! | Stacks | Stack lifecycle | `stacks deploy stacks.yml -s dev`, `stacks status`, `stacks order` |
//! | Artifacts | Build outputs | `artifacts upload app.tar.gz`, `artifacts promote app.tar.gz sandbox` |
//! | Versions | version.properties | `versions bump minor`, `versions print` |
//!
//! ## Output Formats
//!
//! All commands support the `--format` flag:
//! - `text` (default) - tables and plain lines
//! - `json` - one JSON object per line
//!
//! Logs go to stderr; `--debug` makes them verbose.
//!
//! ## Dry Mode
//!
//! With `--drymode` nothing is created, changed or deleted:
//! ```bash
//! sdt --drymode stacks deploy stacks.yml -s dev
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod artifacts;
mod output;
mod stacks;
mod versions;

pub use app::{run, Cli, Commands, Session};
pub use output::{Output, OutputFormat};
