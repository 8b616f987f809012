//! Progress reporting for stack operations
//!
//! The orchestrator narrates what it does through a [`StatusReporter`]:
//! [`TableReporter`] draws boxed tables for people, [`JsonReporter`] writes
//! one JSON object per line for machines.

use std::io::{self, Write};

use serde_json::json;

use super::api::{ChangeSet, StackEvent};
use super::orchestrator::{Action, StackOutcome};
use crate::domain::StackStatus;

/// Receives progress of stack operations
pub trait StatusReporter {
    /// An operation on a stack begins
    fn stack_started(&mut self, action: Action, stack: &str);

    /// Event streaming for a stack begins
    fn events_started(&mut self, _stack: &str) {}

    /// A previously unseen stack event
    fn event(&mut self, stack: &str, event: &StackEvent);

    /// Event streaming for a stack ends
    fn events_finished(&mut self, _stack: &str) {}

    /// A computed change set
    fn change_set(&mut self, stack: &str, change_set: &ChangeSet);

    /// Current remote status (`None` when the stack does not exist)
    fn stack_status(&mut self, stack: &str, status: Option<&StackStatus>);

    /// An operation on a stack ended
    fn stack_finished(&mut self, outcome: &StackOutcome);

    /// All stacks were processed
    fn finish(&mut self) {}
}

impl<R: StatusReporter + ?Sized> StatusReporter for Box<R> {
    fn stack_started(&mut self, action: Action, stack: &str) {
        (**self).stack_started(action, stack)
    }

    fn events_started(&mut self, stack: &str) {
        (**self).events_started(stack)
    }

    fn event(&mut self, stack: &str, event: &StackEvent) {
        (**self).event(stack, event)
    }

    fn events_finished(&mut self, stack: &str) {
        (**self).events_finished(stack)
    }

    fn change_set(&mut self, stack: &str, change_set: &ChangeSet) {
        (**self).change_set(stack, change_set)
    }

    fn stack_status(&mut self, stack: &str, status: Option<&StackStatus>) {
        (**self).stack_status(stack, status)
    }

    fn stack_finished(&mut self, outcome: &StackOutcome) {
        (**self).stack_finished(outcome)
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}

const TRIM: &str = "...";

/// Fixed-width table with right-aligned cells
///
/// Cells longer than their column are cut and end in `...`.
pub struct TableWriter {
    widths: Vec<usize>,
}

impl TableWriter {
    pub fn new(widths: &[usize]) -> Self {
        Self {
            widths: widths.to_vec(),
        }
    }

    pub fn line(&self) -> String {
        if self.widths.is_empty() {
            return String::new();
        }
        let mut out: String = self
            .widths
            .iter()
            .map(|w| format!("+{}", "-".repeat(w + 2)))
            .collect();
        out.push_str("+\n");
        out
    }

    pub fn row(&self, columns: &[&str]) -> String {
        let mut out: String = self
            .widths
            .iter()
            .zip(columns)
            .map(|(width, value)| format!("| {} ", cell(value, *width)))
            .collect();
        out.push_str("|\n");
        out
    }

    pub fn header(&self, columns: &[&str]) -> String {
        format!("{}{}{}", self.line(), self.row(columns), self.line())
    }
}

fn cell(value: &str, width: usize) -> String {
    let count = value.chars().count();
    if count > width {
        if width <= TRIM.len() {
            return value.chars().take(width).collect();
        }
        let kept: String = value.chars().take(width - TRIM.len()).collect();
        return format!("{kept}{TRIM}");
    }
    format!("{}{}", " ".repeat(width - count), value)
}

/// Human-readable reporter
pub struct TableReporter<W: Write> {
    out: W,
    events: TableWriter,
    changes: TableWriter,
    status: TableWriter,
    status_open: bool,
}

impl TableReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TableReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            events: TableWriter::new(&[40, 45, 30]),
            changes: TableWriter::new(&[10, 40, 40, 11]),
            status: TableWriter::new(&[40, 50]),
            status_open: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, text: &str) {
        // reporting must never abort an operation
        let _ = self.out.write_all(text.as_bytes());
    }
}

impl<W: Write> StatusReporter for TableReporter<W> {
    fn stack_started(&mut self, action: Action, stack: &str) {
        let text = format!("{} {}\n", action.progressive(), stack);
        self.write(&text);
    }

    fn events_started(&mut self, _stack: &str) {
        let header = self.events.header(&["Status", "Type", "LogicalID"]);
        self.write(&header);
    }

    fn event(&mut self, _stack: &str, event: &StackEvent) {
        let row = self.events.row(&[
            &event.resource_status,
            &event.resource_type,
            &event.logical_resource_id,
        ]);
        self.write(&row);
    }

    fn events_finished(&mut self, _stack: &str) {
        let line = self.events.line();
        self.write(&line);
    }

    fn change_set(&mut self, _stack: &str, change_set: &ChangeSet) {
        let mut text = format!("ChangeSet: {} ({})\n", change_set.name, change_set.status);
        if change_set.changes.is_empty() {
            text.push_str("No changes\n");
        } else {
            text.push_str(&self.changes.header(&["Action", "LogicalID", "Type", "Replacement"]));
            for change in &change_set.changes {
                text.push_str(&self.changes.row(&[
                    &change.action,
                    &change.logical_resource_id,
                    &change.resource_type,
                    change.replacement.as_deref().unwrap_or("-"),
                ]));
            }
            text.push_str(&self.changes.line());
        }
        self.write(&text);
    }

    fn stack_status(&mut self, stack: &str, status: Option<&StackStatus>) {
        let mut text = String::new();
        if !self.status_open {
            text.push_str(&self.status.header(&["Stack", "Status"]));
            self.status_open = true;
        }
        text.push_str(&self.status.row(&[stack, status.map_or("Not Found", StackStatus::as_str)]));
        self.write(&text);
    }

    fn stack_finished(&mut self, outcome: &StackOutcome) {
        if outcome.action == Action::Status {
            return;
        }
        let text = format!("{}: {}\n", outcome.stack, outcome.result);
        self.write(&text);
    }

    fn finish(&mut self) {
        if self.status_open {
            let line = self.status.line();
            self.write(&line);
            self.write("\n");
            self.status_open = false;
        }
        let _ = self.out.flush();
    }
}

/// Machine-readable reporter: one JSON object per line
pub struct JsonReporter<W: Write> {
    out: W,
}

impl JsonReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, value: serde_json::Value) {
        let _ = writeln!(self.out, "{value}");
    }
}

impl<W: Write> StatusReporter for JsonReporter<W> {
    fn stack_started(&mut self, action: Action, stack: &str) {
        self.emit(json!({"type": "started", "action": action, "stack": stack}));
    }

    fn event(&mut self, stack: &str, event: &StackEvent) {
        self.emit(json!({"type": "event", "stack": stack, "event": event}));
    }

    fn change_set(&mut self, stack: &str, change_set: &ChangeSet) {
        self.emit(json!({"type": "change_set", "stack": stack, "change_set": change_set}));
    }

    fn stack_status(&mut self, stack: &str, status: Option<&StackStatus>) {
        self.emit(json!({"type": "status", "stack": stack, "status": status}));
    }

    fn stack_finished(&mut self, outcome: &StackOutcome) {
        self.emit(json!({"type": "finished", "outcome": outcome}));
    }

    fn finish(&mut self) {
        let _ = self.out.flush();
    }
}
