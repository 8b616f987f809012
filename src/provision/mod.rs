//! # Provisioning
//!
//! Drives a CloudFormation-style provider: the [`ProvisioningApi`] boundary,
//! its backends, bounded polling and the stack [`Orchestrator`].
//!
//! | Module | Role |
//! |--------|------|
//! | `api` | provider trait and wire-neutral types |
//! | `cloudformation` | backend on the CloudFormation SDK client |
//! | `memory` | simulated in-process backend |
//! | `wait` | polling of stacks and change sets |
//! | `orchestrator` | per-stack lifecycle in dependency order |
//! | `report` | progress output |
//! | `cancel` | Ctrl+C handling |

mod api;
mod cancel;
mod cloudformation;
mod memory;
mod orchestrator;
mod report;
mod wait;

pub use api::{
    ApiOutputs, ChangeSet, ChangeSetRequest, ChangeSetSummary, EventPage, ProvisionError,
    ProvisioningApi, RemoteStack, ResourceChange, StackEvent, StackRequest,
};
pub use cancel::CancelToken;
pub use cloudformation::CloudFormationApi;
pub use memory::MemoryApi;
pub use orchestrator::{
    change_set_name, Action, DeploymentReport, OperationResult, Orchestrator, PreparedStack,
    StackError, StackOutcome, StackSource,
};
pub use report::{JsonReporter, StatusReporter, TableReporter, TableWriter};
pub use wait::{Poller, WaitPolicy};
