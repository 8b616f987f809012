//! The provisioning API boundary
//!
//! Everything the orchestrator knows about remote stacks goes through
//! [`ProvisioningApi`]. Implementations: [`super::CloudFormationApi`] and
//! [`super::MemoryApi`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OutputFinder;
use crate::domain::StackStatus;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{call} failed: {message}")]
    Api { call: &'static str, message: String },

    #[error("Stack {0} does not exist")]
    NotFound(String),

    #[error("Stack operation failed for {stack}: {status}")]
    OperationFailed { stack: String, status: StackStatus },

    #[error("Change set {name} failed: {reason}")]
    ChangeSetFailed { name: String, reason: String },

    #[error("Timed out after {}s waiting for {target}", .waited.as_secs())]
    Timeout { target: String, waited: Duration },

    #[error("Interrupted while waiting for {0}")]
    Cancelled(String),

    #[error("Stack ({stack}) output key ({key}) not found")]
    OutputNotFound { stack: String, key: String },
}

impl ProvisionError {
    pub fn api(call: &'static str, message: impl Into<String>) -> Self {
        ProvisionError::Api {
            call,
            message: message.into(),
        }
    }

    /// True for "the stack is gone" outcomes, which deletion treats as success
    pub fn is_not_found(&self) -> bool {
        match self {
            ProvisionError::NotFound(_) => true,
            ProvisionError::Api { message, .. } => message.contains("does not exist"),
            _ => false,
        }
    }
}

/// A stack as reported by the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteStack {
    pub name: String,
    pub status: StackStatus,
    pub outputs: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
    pub notification_arns: Vec<String>,
}

/// Template, parameters and tags for a create or change-set call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

/// What a change set is computed for
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSetRequest {
    pub change_set_name: String,
    pub stack: StackRequest,
    pub capabilities: Vec<String>,
    pub notification_arns: Vec<String>,
}

/// One resource affected by a change set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub action: String,
    pub logical_resource_id: String,
    pub resource_type: String,
    pub replacement: Option<String>,
}

/// A computed change set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet {
    pub id: String,
    pub name: String,
    pub status: StackStatus,
    pub status_reason: Option<String>,
    pub changes: Vec<ResourceChange>,
}

impl ChangeSet {
    /// Change sets fail with a bare `FAILED`
    pub fn is_failed(&self) -> bool {
        self.status.as_str() == "FAILED" || self.status.is_failed()
    }

    /// The provider refused the change set because nothing differs
    pub fn is_empty_diff(&self) -> bool {
        self.is_failed()
            && self.status_reason.as_deref().is_some_and(|r| {
                r.contains("didn't contain changes") || r.contains("No updates are to be performed")
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSetSummary {
    pub id: String,
    pub status: StackStatus,
}

/// One row of a stack's event history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEvent {
    pub event_id: String,
    pub resource_status: String,
    pub resource_type: String,
    pub logical_resource_id: String,
}

/// A page of events, newest first
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventPage {
    pub events: Vec<StackEvent>,
    pub next_token: Option<String>,
}

/// Remote stack operations
pub trait ProvisioningApi: Send + Sync {
    /// Returns the stack, or `None` when it does not exist
    fn find_stack(&self, name: &str) -> Result<Option<RemoteStack>, ProvisionError>;

    /// Starts stack creation (rolling back on failure); returns the stack id
    fn create_stack(&self, request: &StackRequest) -> Result<String, ProvisionError>;

    /// Starts computing a change set; returns its id
    fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String, ProvisionError>;

    fn describe_change_set(&self, id: &str) -> Result<ChangeSet, ProvisionError>;

    fn execute_change_set(&self, id: &str) -> Result<(), ProvisionError>;

    fn delete_change_set(&self, id: &str) -> Result<(), ProvisionError>;

    fn list_change_sets(&self, stack: &str) -> Result<Vec<ChangeSetSummary>, ProvisionError>;

    fn delete_stack(&self, name: &str) -> Result<(), ProvisionError>;

    fn describe_stack_events(
        &self,
        name: &str,
        next_token: Option<&str>,
    ) -> Result<EventPage, ProvisionError>;

    /// Looks up one output value of a deployed stack
    fn find_deployment_output(&self, stack: &str, key: &str) -> Result<String, ProvisionError> {
        let remote = self
            .find_stack(stack)?
            .ok_or_else(|| ProvisionError::NotFound(stack.to_string()))?;

        remote
            .outputs
            .get(key)
            .cloned()
            .ok_or_else(|| ProvisionError::OutputNotFound {
                stack: stack.to_string(),
                key: key.to_string(),
            })
    }
}

/// Exposes stack outputs to the `output` template helper
pub struct ApiOutputs(pub Arc<dyn ProvisioningApi>);

impl OutputFinder for ApiOutputs {
    fn find_output(&self, stack: &str, key: &str) -> Result<String, String> {
        self.0
            .find_deployment_output(stack, key)
            .map_err(|e| e.to_string())
    }
}
