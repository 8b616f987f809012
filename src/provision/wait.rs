//! Bounded polling of long-running stack operations

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::api::{ChangeSet, ProvisionError, ProvisioningApi};
use super::cancel::CancelToken;
use super::report::StatusReporter;
use crate::config::StacksSettings;
use crate::domain::StackStatus;

/// How long and how often to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub max_wait: Duration,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(900),
            interval: Duration::from_secs(15),
        }
    }
}

impl From<&StacksSettings> for WaitPolicy {
    fn from(settings: &StacksSettings) -> Self {
        Self {
            max_wait: settings.max_wait(),
            interval: settings.poll_interval(),
        }
    }
}

/// Waits for stacks and change sets to settle
pub struct Poller<'a> {
    api: &'a dyn ProvisioningApi,
    policy: WaitPolicy,
    cancel: &'a CancelToken,
}

impl<'a> Poller<'a> {
    pub fn new(api: &'a dyn ProvisioningApi, policy: WaitPolicy, cancel: &'a CancelToken) -> Self {
        Self {
            api,
            policy,
            cancel,
        }
    }

    /// Polls a stack until it reaches a terminal status with no change set
    /// pending, streaming unseen events to the reporter.
    ///
    /// Returns the final status on `_COMPLETE`; a `_FAILED` status becomes
    /// [`ProvisionError::OperationFailed`]. A stack that disappears yields
    /// [`ProvisionError::NotFound`], which callers deleting stacks treat as
    /// success.
    pub fn wait_for_stack(
        &self,
        stack: &str,
        reporter: &mut dyn StatusReporter,
    ) -> Result<StackStatus, ProvisionError> {
        info!("Waiting for stack operation on {stack} to complete");

        reporter.events_started(stack);
        let result = self.poll_stack(stack, reporter);
        reporter.events_finished(stack);
        result
    }

    fn poll_stack(
        &self,
        stack: &str,
        reporter: &mut dyn StatusReporter,
    ) -> Result<StackStatus, ProvisionError> {
        let start = Instant::now();
        let deadline = start + self.policy.max_wait;
        let mut seen: HashSet<String> = HashSet::new();
        let mut next_token: Option<String> = None;

        loop {
            let remote = self
                .api
                .find_stack(stack)?
                .ok_or_else(|| ProvisionError::NotFound(stack.to_string()))?;

            let settled = remote.status.is_terminal() && !self.change_set_pending(stack);
            if remote.status.is_terminal() && !settled {
                debug!("Changes pending on {stack}");
            }

            let page = self.api.describe_stack_events(stack, next_token.as_deref())?;
            next_token = page.next_token;
            for event in page.events.iter().rev() {
                if seen.insert(event.event_id.clone()) {
                    reporter.event(stack, event);
                }
            }

            if settled {
                if remote.status.is_failed() {
                    return Err(ProvisionError::OperationFailed {
                        stack: stack.to_string(),
                        status: remote.status,
                    });
                }
                return Ok(remote.status);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ProvisionError::Timeout {
                    target: format!("stack {stack}"),
                    waited: now - start,
                });
            }
            if !self.cancel.sleep(self.policy.interval.min(deadline - now)) {
                return Err(ProvisionError::Cancelled(format!("stack {stack}")));
            }
        }
    }

    /// Listing failures count as "nothing pending"
    fn change_set_pending(&self, stack: &str) -> bool {
        match self.api.list_change_sets(stack) {
            Ok(summaries) => summaries.iter().any(|s| {
                debug!("Change set {} is {}", s.id, s.status);
                s.status.is_pending()
            }),
            Err(e) => {
                debug!("Could not list change sets of {stack}: {e}");
                false
            }
        }
    }

    /// Polls a change set until it is no longer being computed
    pub fn wait_for_change_set(&self, id: &str) -> Result<ChangeSet, ProvisionError> {
        let start = Instant::now();
        let deadline = start + self.policy.max_wait;

        loop {
            let change_set = self.api.describe_change_set(id)?;
            if !change_set.status.is_pending() {
                return Ok(change_set);
            }
            info!(
                "Waiting for change set {} to be available: {}",
                change_set.name, change_set.status
            );

            let now = Instant::now();
            if now >= deadline {
                return Err(ProvisionError::Timeout {
                    target: format!("change set {}", change_set.name),
                    waited: now - start,
                });
            }
            if !self.cancel.sleep(self.policy.interval.min(deadline - now)) {
                return Err(ProvisionError::Cancelled(format!("change set {}", change_set.name)));
            }
        }
    }
}
