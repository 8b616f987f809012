//! Output formatting for CLI commands

use serde::Serialize;

use crate::provision::{JsonReporter, StatusReporter, TableReporter};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Output helper for consistent formatting
pub struct Output {
    format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Prints a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Text => println!("{}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "success": true,
                        "message": message
                    })
                );
            }
        }
    }

    /// Prints structured data, as YAML in text mode
    pub fn data<T: Serialize>(&self, data: &T) {
        match self.format {
            OutputFormat::Text => {
                if let Ok(yaml) = serde_yaml::to_string(data) {
                    print!("{}", yaml);
                }
            }
            OutputFormat::Json => {
                if let Ok(json) = serde_json::to_string(data) {
                    println!("{}", json);
                }
            }
        }
    }

    /// Prints a key/value pair in text mode, a one-field object in JSON mode
    pub fn field(&self, label: &str, key: &str, value: &str) {
        match self.format {
            OutputFormat::Text => println!("{}: {}", label, value),
            OutputFormat::Json => println!("{}", serde_json::json!({ key: value })),
        }
    }

    /// Returns the progress reporter matching the format
    pub fn reporter(&self) -> Box<dyn StatusReporter> {
        match self.format {
            OutputFormat::Text => Box::new(TableReporter::stdout()),
            OutputFormat::Json => Box::new(JsonReporter::stdout()),
        }
    }

    /// Returns true if using JSON format
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}
