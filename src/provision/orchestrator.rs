//! Stack orchestration
//!
//! Drives the provisioning API through each stack's lifecycle, one stack at
//! a time, in dependency order (reverse order for deletion):
//!
//! ```text
//! absent ──create──▶ creating ──poll──▶ complete | failed
//! active ──change set──▶ diffing ──execute──▶ updating ──poll──▶ complete | failed
//!                                 └─no changes─▶ unchanged
//! active ──delete──▶ deleting ──poll──▶ gone | failed
//! ```
//!
//! A failing stack is recorded and the run moves on to the next one; only a
//! user interrupt stops the loop early.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::api::{ChangeSetRequest, ProvisionError, ProvisioningApi, StackRequest};
use super::cancel::CancelToken;
use super::report::StatusReporter;
use super::wait::{Poller, WaitPolicy};
use crate::config::{ConfigError, EnvironmentStacks};
use crate::domain::{StackDefinition, StackStatus};

/// What was done to a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
    Status,
    Changes,
}

impl Action {
    pub fn progressive(self) -> &'static str {
        match self {
            Action::Create => "Creating",
            Action::Update => "Updating",
            Action::Delete => "Deleting",
            Action::Status => "Checking",
            Action::Changes => "Previewing",
        }
    }
}

/// Result of one stack operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationResult {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Previewed,
    /// Dry run
    Skipped,
    /// Not attempted because the run was interrupted
    Aborted,
    Found { stack_status: StackStatus },
    Missing,
    Failed { reason: String },
}

impl OperationResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, OperationResult::Failed { .. } | OperationResult::Aborted)
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationResult::Created => write!(f, "created"),
            OperationResult::Updated => write!(f, "updated"),
            OperationResult::Unchanged => write!(f, "no changes"),
            OperationResult::Deleted => write!(f, "deleted"),
            OperationResult::Previewed => write!(f, "previewed"),
            OperationResult::Skipped => write!(f, "skipped (dry run)"),
            OperationResult::Aborted => write!(f, "not attempted (interrupted)"),
            OperationResult::Found { stack_status } => write!(f, "{stack_status}"),
            OperationResult::Missing => write!(f, "Not Found"),
            OperationResult::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackOutcome {
    pub label: String,
    pub stack: String,
    pub action: Action,
    pub result: OperationResult,
}

/// Per-stack outcomes of one command, in processing order
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploymentReport {
    pub outcomes: Vec<StackOutcome>,
    pub cancelled: bool,
}

impl DeploymentReport {
    pub fn failures(&self) -> impl Iterator<Item = &StackOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_failure())
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failures().next().is_none()
    }

    /// Stacks in the order they were processed
    pub fn stacks(&self) -> Vec<&str> {
        self.outcomes.iter().map(|o| o.stack.as_str()).collect()
    }
}

#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

impl StackError {
    fn is_cancelled(&self) -> bool {
        matches!(self, StackError::Provision(ProvisionError::Cancelled(_)))
    }
}

/// A rendered stack ready to be sent to the provider
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStack {
    pub definition: StackDefinition,
    pub template_body: String,
}

impl PreparedStack {
    fn request(&self) -> StackRequest {
        StackRequest {
            stack_name: self.definition.name.clone(),
            template_body: self.template_body.clone(),
            parameters: self.definition.parameters.clone(),
            tags: self.definition.tags.clone(),
        }
    }
}

/// Ordered stacks the orchestrator works through
///
/// Preparation is per stack and happens right before the stack is
/// processed, so values referring to outputs of stacks created earlier in
/// the same run resolve.
pub trait StackSource {
    /// Labels in creation order
    fn labels(&self) -> &[String];

    /// Remote name of a stack
    fn stack_name(&self, label: &str) -> Option<&str>;

    /// Renders a stack's definition and loads its template
    fn prepare(&self, label: &str) -> Result<PreparedStack, ConfigError>;
}

impl StackSource for EnvironmentStacks<'_> {
    fn labels(&self) -> &[String] {
        self.order()
    }

    fn stack_name(&self, label: &str) -> Option<&str> {
        EnvironmentStacks::stack_name(self, label)
    }

    fn prepare(&self, label: &str) -> Result<PreparedStack, ConfigError> {
        let definition = self.definition(label)?;
        let template = self.template(&definition)?;
        debug!("Using template {}", template.path.display());

        Ok(PreparedStack {
            definition,
            template_body: template.body,
        })
    }
}

/// Change-set names are `<stack>-<unix seconds>`
pub fn change_set_name(stack: &str) -> String {
    format!("{stack}-{}", chrono::Utc::now().timestamp())
}

/// Runs stack operations against a provider
pub struct Orchestrator<R: StatusReporter> {
    api: Arc<dyn ProvisioningApi>,
    reporter: R,
    policy: WaitPolicy,
    cancel: CancelToken,
    dry_run: bool,
}

impl<R: StatusReporter> Orchestrator<R> {
    pub fn new(api: Arc<dyn ProvisioningApi>, reporter: R) -> Self {
        Self {
            api,
            reporter,
            policy: WaitPolicy::default(),
            cancel: CancelToken::new(),
            dry_run: false,
        }
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// In dry-run mode nothing is created, changed or deleted
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Creates missing stacks and updates existing ones through change sets
    pub fn create_or_update_stacks(&mut self, source: &dyn StackSource) -> DeploymentReport {
        debug!("Creating stacks: {:?}", source.labels());
        let labels = source.labels().to_vec();
        let report = self.run(source, &labels, Action::Create, Self::deploy_stack);
        info!("Stacks create complete");
        report
    }

    /// Deletes stacks, dependents first
    pub fn delete_stacks(&mut self, source: &dyn StackSource) -> DeploymentReport {
        let labels: Vec<String> = source.labels().iter().rev().cloned().collect();
        debug!("Deleting stacks: {labels:?}");
        let report = self.run(source, &labels, Action::Delete, Self::delete_stack);
        info!("Stacks delete complete");
        report
    }

    /// Reports the remote status of every stack
    pub fn stacks_status(&mut self, source: &dyn StackSource) -> DeploymentReport {
        let labels = source.labels().to_vec();
        self.run(source, &labels, Action::Status, Self::stack_status)
    }

    /// Computes and prints a change set per stack without executing it
    pub fn print_changes(&mut self, source: &dyn StackSource) -> DeploymentReport {
        let labels = source.labels().to_vec();
        self.run(source, &labels, Action::Changes, Self::preview_stack)
    }

    fn run<F>(
        &mut self,
        source: &dyn StackSource,
        labels: &[String],
        action: Action,
        mut step: F,
    ) -> DeploymentReport
    where
        F: FnMut(
            &mut Self,
            &dyn StackSource,
            &str,
            &mut Action,
        ) -> Result<OperationResult, StackError>,
    {
        let mut report = DeploymentReport::default();

        for label in labels {
            let stack = source.stack_name(label).unwrap_or(label).to_string();

            if report.cancelled || self.cancel.is_cancelled() {
                report.cancelled = true;
                report.outcomes.push(StackOutcome {
                    label: label.clone(),
                    stack,
                    action,
                    result: OperationResult::Aborted,
                });
                continue;
            }

            let mut performed = action;
            let result = match step(self, source, label, &mut performed) {
                Ok(result) => result,
                Err(e) => {
                    error!("{} {stack} failed: {e}", performed.progressive());
                    if e.is_cancelled() {
                        report.cancelled = true;
                    }
                    OperationResult::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            let outcome = StackOutcome {
                label: label.clone(),
                stack,
                action: performed,
                result,
            };
            self.reporter.stack_finished(&outcome);
            report.outcomes.push(outcome);
        }

        self.reporter.finish();
        report
    }

    fn deploy_stack(
        &mut self,
        source: &dyn StackSource,
        label: &str,
        action: &mut Action,
    ) -> Result<OperationResult, StackError> {
        let prepared = source.prepare(label)?;
        let request = prepared.request();
        let name = request.stack_name.clone();

        let existing = self.api.find_stack(&name)?;
        if existing.is_some() {
            *action = Action::Update;
        }
        self.reporter.stack_started(*action, &name);
        info!("Parameters for {name}: {:?}", request.parameters);
        info!("Tags for {name}: {:?}", request.tags);

        if self.dry_run {
            return Ok(OperationResult::Skipped);
        }

        let poller = Poller::new(self.api.as_ref(), self.policy, &self.cancel);

        let Some(remote) = existing else {
            let id = self.api.create_stack(&request)?;
            info!("Create started: {id}");
            poller.wait_for_stack(&name, &mut self.reporter)?;
            return Ok(OperationResult::Created);
        };

        let id = self.api.create_change_set(&ChangeSetRequest {
            change_set_name: change_set_name(&name),
            stack: request,
            capabilities: remote.capabilities,
            notification_arns: remote.notification_arns,
        })?;
        let change_set = match poller.wait_for_change_set(&id) {
            Ok(change_set) => change_set,
            Err(e) => {
                self.discard_change_set(&id);
                return Err(e.into());
            }
        };
        self.reporter.change_set(&name, &change_set);

        if change_set.is_empty_diff() {
            info!("No changes to {name}");
            self.discard_change_set(&id);
            return Ok(OperationResult::Unchanged);
        }
        if change_set.is_failed() {
            self.discard_change_set(&id);
            return Err(ProvisionError::ChangeSetFailed {
                name: change_set.name,
                reason: change_set.status_reason.unwrap_or_default(),
            }
            .into());
        }

        if let Err(e) = self.api.execute_change_set(&id) {
            self.discard_change_set(&id);
            return Err(e.into());
        }
        poller.wait_for_stack(&name, &mut self.reporter)?;
        Ok(OperationResult::Updated)
    }

    /// Removes a change set that will not be executed
    fn discard_change_set(&self, id: &str) {
        if let Err(e) = self.api.delete_change_set(id) {
            warn!("Could not delete change set {id}: {e}");
        }
    }

    fn delete_stack(
        &mut self,
        source: &dyn StackSource,
        label: &str,
        _action: &mut Action,
    ) -> Result<OperationResult, StackError> {
        let name = source.stack_name(label).unwrap_or(label).to_string();
        self.reporter.stack_started(Action::Delete, &name);

        if self.dry_run {
            return Ok(OperationResult::Skipped);
        }

        match self.api.delete_stack(&name) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("{name} is already gone");
                return Ok(OperationResult::Deleted);
            }
            Err(e) => return Err(e.into()),
        }

        let poller = Poller::new(self.api.as_ref(), self.policy, &self.cancel);
        match poller.wait_for_stack(&name, &mut self.reporter) {
            Ok(_) => Ok(OperationResult::Deleted),
            Err(e) if e.is_not_found() => Ok(OperationResult::Deleted),
            Err(e) => Err(e.into()),
        }
    }

    fn stack_status(
        &mut self,
        source: &dyn StackSource,
        label: &str,
        _action: &mut Action,
    ) -> Result<OperationResult, StackError> {
        let name = source.stack_name(label).unwrap_or(label);
        let remote = self.api.find_stack(name)?;
        self.reporter
            .stack_status(name, remote.as_ref().map(|r| &r.status));

        Ok(match remote {
            Some(r) => OperationResult::Found {
                stack_status: r.status,
            },
            None => OperationResult::Missing,
        })
    }

    fn preview_stack(
        &mut self,
        source: &dyn StackSource,
        label: &str,
        _action: &mut Action,
    ) -> Result<OperationResult, StackError> {
        let prepared = source.prepare(label)?;
        let request = prepared.request();
        let name = request.stack_name.clone();
        self.reporter.stack_started(Action::Changes, &name);

        let Some(remote) = self.api.find_stack(&name)? else {
            info!("{name} does not exist; deploying would create it");
            return Ok(OperationResult::Missing);
        };
        if self.dry_run {
            return Ok(OperationResult::Skipped);
        }

        let id = self.api.create_change_set(&ChangeSetRequest {
            change_set_name: change_set_name(&name),
            stack: request,
            capabilities: remote.capabilities,
            notification_arns: remote.notification_arns,
        })?;

        let poller = Poller::new(self.api.as_ref(), self.policy, &self.cancel);
        let waited = poller.wait_for_change_set(&id);
        if let Ok(change_set) = &waited {
            self.reporter.change_set(&name, change_set);
        }
        self.discard_change_set(&id);

        let change_set = waited?;
        if change_set.is_empty_diff() {
            Ok(OperationResult::Unchanged)
        } else if change_set.is_failed() {
            Err(ProvisionError::ChangeSetFailed {
                name: change_set.name,
                reason: change_set.status_reason.unwrap_or_default(),
            }
            .into())
        } else {
            Ok(OperationResult::Previewed)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::provision::api::{ChangeSet, ChangeSetSummary, EventPage, RemoteStack, StackEvent};
    use crate::provision::memory::MemoryApi;

    /// Stacks with fixed bodies, in the given order
    struct FixedSource {
        labels: Vec<String>,
        stacks: BTreeMap<String, PreparedStack>,
    }

    impl FixedSource {
        fn new(stacks: &[(&str, &str)]) -> Self {
            Self {
                labels: stacks.iter().map(|(l, _)| l.to_string()).collect(),
                stacks: stacks
                    .iter()
                    .map(|(label, body)| {
                        let mut definition = StackDefinition::new(*label);
                        definition.name = format!("{label}-dev");
                        (
                            label.to_string(),
                            PreparedStack {
                                definition,
                                template_body: body.to_string(),
                            },
                        )
                    })
                    .collect(),
            }
        }
    }

    impl StackSource for FixedSource {
        fn labels(&self) -> &[String] {
            &self.labels
        }

        fn stack_name(&self, label: &str) -> Option<&str> {
            self.stacks.get(label).map(|s| s.definition.name.as_str())
        }

        fn prepare(&self, label: &str) -> Result<PreparedStack, ConfigError> {
            self.stacks
                .get(label)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownStack {
                    environment: "dev".into(),
                    label: label.into(),
                })
        }
    }

    #[derive(Default)]
    struct Recorder {
        started: Vec<(Action, String)>,
        events: Vec<String>,
        change_sets: Vec<String>,
        statuses: Vec<(String, Option<String>)>,
        finished: Vec<StackOutcome>,
        finishes: usize,
    }

    impl StatusReporter for Recorder {
        fn stack_started(&mut self, action: Action, stack: &str) {
            self.started.push((action, stack.to_string()));
        }
        fn event(&mut self, _stack: &str, event: &StackEvent) {
            self.events.push(event.event_id.clone());
        }
        fn change_set(&mut self, stack: &str, _change_set: &ChangeSet) {
            self.change_sets.push(stack.to_string());
        }
        fn stack_status(&mut self, stack: &str, status: Option<&StackStatus>) {
            self.statuses
                .push((stack.to_string(), status.map(|s| s.to_string())));
        }
        fn stack_finished(&mut self, outcome: &StackOutcome) {
            self.finished.push(outcome.clone());
        }
        fn finish(&mut self) {
            self.finishes += 1;
        }
    }

    fn orchestrator(api: &Arc<MemoryApi>) -> Orchestrator<Recorder> {
        let api: Arc<dyn ProvisioningApi> = api.clone();
        Orchestrator::new(api, Recorder::default()).with_policy(WaitPolicy {
            max_wait: Duration::from_secs(5),
            interval: Duration::from_millis(1),
        })
    }

    #[derive(Clone, Copy)]
    enum Fault {
        RejectChangeSets,
        RefuseExecution,
        NeverSettle,
    }

    /// A memory account whose change sets misbehave
    struct Faulty {
        inner: Arc<MemoryApi>,
        fault: Fault,
    }

    impl ProvisioningApi for Faulty {
        fn find_stack(&self, name: &str) -> Result<Option<RemoteStack>, ProvisionError> {
            self.inner.find_stack(name)
        }
        fn create_stack(&self, request: &StackRequest) -> Result<String, ProvisionError> {
            self.inner.create_stack(request)
        }
        fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String, ProvisionError> {
            self.inner.create_change_set(request)
        }
        fn describe_change_set(&self, id: &str) -> Result<ChangeSet, ProvisionError> {
            let mut change_set = self.inner.describe_change_set(id)?;
            match self.fault {
                Fault::RejectChangeSets => {
                    change_set.status = StackStatus::from("FAILED");
                    change_set.status_reason = Some("Template format error".into());
                }
                Fault::NeverSettle => change_set.status = StackStatus::from("CREATE_PENDING"),
                Fault::RefuseExecution => {}
            }
            Ok(change_set)
        }
        fn execute_change_set(&self, id: &str) -> Result<(), ProvisionError> {
            match self.fault {
                Fault::RefuseExecution => Err(ProvisionError::api(
                    "ExecuteChangeSet",
                    "InsufficientCapabilities: Requires capabilities : [CAPABILITY_IAM]",
                )),
                _ => self.inner.execute_change_set(id),
            }
        }
        fn delete_change_set(&self, id: &str) -> Result<(), ProvisionError> {
            self.inner.delete_change_set(id)
        }
        fn list_change_sets(&self, stack: &str) -> Result<Vec<ChangeSetSummary>, ProvisionError> {
            self.inner.list_change_sets(stack)
        }
        fn delete_stack(&self, name: &str) -> Result<(), ProvisionError> {
            self.inner.delete_stack(name)
        }
        fn describe_stack_events(
            &self,
            name: &str,
            next_token: Option<&str>,
        ) -> Result<EventPage, ProvisionError> {
            self.inner.describe_stack_events(name, next_token)
        }
    }

    /// Deploys a changed `a` over an existing one through a faulty account
    fn update_with(fault: Fault) -> (Arc<MemoryApi>, DeploymentReport) {
        let api = Arc::new(MemoryApi::new());
        orchestrator(&api).create_or_update_stacks(&FixedSource::new(&[("a", "{}")]));

        let faulty: Arc<dyn ProvisioningApi> = Arc::new(Faulty {
            inner: api.clone(),
            fault,
        });
        let report = Orchestrator::new(faulty, Recorder::default())
            .with_policy(WaitPolicy {
                max_wait: Duration::from_millis(20),
                interval: Duration::from_millis(1),
            })
            .create_or_update_stacks(&FixedSource::new(&[("a", "Resources: {}")]));
        (api, report)
    }

    fn chain() -> FixedSource {
        FixedSource::new(&[("a", "{}"), ("b", "{}"), ("c", "{}")])
    }

    #[test]
    fn creates_in_order() {
        let api = Arc::new(MemoryApi::new());
        let mut orch = orchestrator(&api);

        let report = orch.create_or_update_stacks(&chain());

        assert!(report.is_success());
        assert_eq!(report.stacks(), vec!["a-dev", "b-dev", "c-dev"]);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.result == OperationResult::Created && o.action == Action::Create));
        assert_eq!(
            api.calls(),
            vec!["create_stack a-dev", "create_stack b-dev", "create_stack c-dev"]
        );
        assert_eq!(orch.reporter().finishes, 1);
        assert!(!orch.reporter().events.is_empty());
    }

    #[test]
    fn second_run_updates_or_leaves_unchanged() {
        let api = Arc::new(MemoryApi::new());
        orchestrator(&api).create_or_update_stacks(&FixedSource::new(&[("a", "{}"), ("b", "{}")]));

        let changed = FixedSource::new(&[("a", "{}"), ("b", "Resources: {}")]);
        let mut orch = orchestrator(&api);
        let report = orch.create_or_update_stacks(&changed);

        assert!(report.is_success());
        let results: Vec<_> = report.outcomes.iter().map(|o| o.result.clone()).collect();
        assert_eq!(
            results,
            vec![OperationResult::Unchanged, OperationResult::Updated]
        );
        assert_eq!(report.outcomes[1].action, Action::Update);
        assert_eq!(api.template_body("b-dev").unwrap(), "Resources: {}");
        assert_eq!(orch.reporter().change_sets, vec!["a-dev", "b-dev"]);

        let calls = api.calls();
        assert!(calls.contains(&"delete_change_set a-dev".to_string()));
        assert!(calls.contains(&"execute_change_set b-dev".to_string()));
    }

    #[test]
    fn deletes_in_reverse_order() {
        let api = Arc::new(MemoryApi::new());
        orchestrator(&api).create_or_update_stacks(&chain());

        let mut orch = orchestrator(&api);
        let report = orch.delete_stacks(&chain());

        assert!(report.is_success());
        assert_eq!(report.stacks(), vec!["c-dev", "b-dev", "a-dev"]);
        let deletes: Vec<String> = api
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("delete_stack"))
            .collect();
        assert_eq!(
            deletes,
            vec!["delete_stack c-dev", "delete_stack b-dev", "delete_stack a-dev"]
        );
        assert!(api.stack_names().is_empty());
    }

    #[test]
    fn deleting_missing_stacks_succeeds() {
        let api = Arc::new(MemoryApi::new());
        let report = orchestrator(&api).delete_stacks(&chain());

        assert!(report.is_success());
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.result == OperationResult::Deleted));
    }

    #[test]
    fn deletion_continues_after_a_failure() {
        let api = Arc::new(MemoryApi::new());
        orchestrator(&api).create_or_update_stacks(&chain());
        api.fail_next("b-dev", "DELETE_FAILED");

        let report = orchestrator(&api).delete_stacks(&chain());

        assert!(!report.is_success());
        let failed: Vec<&str> = report.failures().map(|o| o.stack.as_str()).collect();
        assert_eq!(failed, vec!["b-dev"]);
        assert_eq!(api.stack_names(), vec!["b-dev"]);
    }

    #[test]
    fn failed_create_does_not_stop_later_stacks() {
        let api = Arc::new(MemoryApi::new());
        api.fail_next("b-dev", "CREATE_FAILED");

        let report = orchestrator(&api).create_or_update_stacks(&chain());

        assert!(!report.is_success());
        assert_eq!(report.outcomes[0].result, OperationResult::Created);
        assert!(matches!(
            report.outcomes[1].result,
            OperationResult::Failed { ref reason } if reason.contains("CREATE_FAILED")
        ));
        assert_eq!(report.outcomes[2].result, OperationResult::Created);
    }

    #[test]
    fn unknown_label_is_a_per_stack_failure() {
        let api = Arc::new(MemoryApi::new());
        let mut source = chain();
        source.labels.insert(1, "ghost".into());

        let report = orchestrator(&api).create_or_update_stacks(&source);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.outcomes[1].stack, "ghost");
        assert_eq!(api.stack_names().len(), 3);
    }

    #[test]
    fn dry_run_has_no_side_effects() {
        let api = Arc::new(MemoryApi::new());
        orchestrator(&api).create_or_update_stacks(&FixedSource::new(&[("a", "{}")]));

        let source = FixedSource::new(&[("a", "Resources: {}"), ("b", "{}")]);
        let before = api.calls().len();

        let mut orch = orchestrator(&api).dry_run(true);
        let deployed = orch.create_or_update_stacks(&source);
        let deleted = orch.delete_stacks(&source);
        let previewed = orch.print_changes(&source);

        assert_eq!(api.calls().len(), before);
        assert!(deployed
            .outcomes
            .iter()
            .all(|o| o.result == OperationResult::Skipped));
        assert_eq!(deployed.outcomes[0].action, Action::Update);
        assert_eq!(deployed.outcomes[1].action, Action::Create);
        assert!(deleted.is_success());
        assert_eq!(previewed.outcomes[1].result, OperationResult::Missing);
    }

    #[test]
    fn status_reports_missing_stacks() {
        let api = Arc::new(MemoryApi::new());
        orchestrator(&api).create_or_update_stacks(&FixedSource::new(&[("a", "{}")]));

        let mut orch = orchestrator(&api);
        let report = orch.stacks_status(&FixedSource::new(&[("a", "{}"), ("b", "{}")]));

        assert!(report.is_success());
        assert_eq!(
            orch.reporter().statuses,
            vec![
                ("a-dev".to_string(), Some("CREATE_COMPLETE".to_string())),
                ("b-dev".to_string(), None),
            ]
        );
        assert_eq!(report.outcomes[1].result, OperationResult::Missing);
    }

    #[test]
    fn print_changes_never_executes() {
        let api = Arc::new(MemoryApi::new());
        orchestrator(&api).create_or_update_stacks(&FixedSource::new(&[("a", "{}")]));

        let report = orchestrator(&api)
            .print_changes(&FixedSource::new(&[("a", "Resources: {}")]));

        assert_eq!(report.outcomes[0].result, OperationResult::Previewed);
        assert_eq!(api.template_body("a-dev").unwrap(), "{}");
        let calls = api.calls();
        assert!(calls.contains(&"delete_change_set a-dev".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("execute_change_set")));
    }

    #[test]
    fn interrupt_aborts_remaining_stacks() {
        let api = Arc::new(MemoryApi::new());
        api.script_statuses("a-dev", &["CREATE_IN_PROGRESS"]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = orchestrator(&api)
            .with_cancel(cancel)
            .create_or_update_stacks(&chain());

        assert!(report.cancelled);
        assert!(!report.is_success());
        assert_eq!(report.outcomes[0].result, OperationResult::Aborted);
        assert!(api.calls().is_empty());
    }

    #[test]
    fn interrupt_during_wait_stops_the_run() {
        let api = Arc::new(MemoryApi::new());
        api.script_statuses("a-dev", &["CREATE_IN_PROGRESS"]);
        let cancel = CancelToken::new();
        let trip = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trip.cancel();
        });

        let report = orchestrator(&api)
            .with_cancel(cancel)
            .create_or_update_stacks(&chain());
        handle.join().unwrap();

        assert!(report.cancelled);
        assert!(matches!(report.outcomes[0].result, OperationResult::Failed { .. }));
        assert_eq!(report.outcomes[1].result, OperationResult::Aborted);
        assert_eq!(api.calls(), vec!["create_stack a-dev"]);
    }

    #[test]
    fn failed_change_set_is_deleted() {
        let (api, report) = update_with(Fault::RejectChangeSets);

        let OperationResult::Failed { reason } = &report.outcomes[0].result else {
            panic!("unexpected result: {:?}", report.outcomes[0].result);
        };
        assert!(reason.contains("Template format error"));
        assert!(api.list_change_sets("a-dev").unwrap().is_empty());
        assert!(api.calls().contains(&"delete_change_set a-dev".to_string()));
        assert_eq!(api.template_body("a-dev").unwrap(), "{}");
    }

    #[test]
    fn refused_execution_deletes_the_change_set() {
        let (api, report) = update_with(Fault::RefuseExecution);

        let OperationResult::Failed { reason } = &report.outcomes[0].result else {
            panic!("unexpected result: {:?}", report.outcomes[0].result);
        };
        assert!(reason.contains("InsufficientCapabilities"));
        assert!(api.list_change_sets("a-dev").unwrap().is_empty());
        assert_eq!(api.template_body("a-dev").unwrap(), "{}");
    }

    #[test]
    fn unsettled_change_set_times_out_and_is_deleted() {
        let (api, report) = update_with(Fault::NeverSettle);

        let OperationResult::Failed { reason } = &report.outcomes[0].result else {
            panic!("unexpected result: {:?}", report.outcomes[0].result);
        };
        assert!(reason.contains("Timed out"));
        assert!(reason.contains("change set a-dev-"));
        assert!(api.list_change_sets("a-dev").unwrap().is_empty());
        assert!(!api.calls().iter().any(|c| c.starts_with("execute_change_set")));
    }

    #[test]
    fn change_set_names_carry_the_stack() {
        let name = change_set_name("app-dev");
        let (stack, secs) = name.rsplit_once('-').unwrap();
        assert_eq!(stack, "app-dev");
        assert!(secs.parse::<i64>().unwrap() > 1_500_000_000);
    }
}
