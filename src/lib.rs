//! Stack Deploy - ordered deployment of CloudFormation stacks
//!
//! A YAML document describes environments, each a set of stacks with
//! parameters, tags and dependencies. Stacks are resolved into a dependency
//! order, rendered, and created, updated (through change sets) or deleted
//! one at a time, waiting for each to settle. Artifacts and project
//! versions are managed alongside.

pub mod aws;
pub mod domain;
pub mod config;
pub mod provision;
pub mod artifacts;
pub mod versioning;
pub mod cli;

pub use domain::{resolve, ExecutionPlan, StackDefinition, StackRef, StackStatus};
pub use provision::{Orchestrator, ProvisioningApi};
