//! In-process provisioning provider
//!
//! Simulates stacks, change sets and event histories. Tests script status
//! sequences and failures; the CLI uses it with `provider = "memory"`,
//! optionally persisting the simulated account to a JSON file so separate
//! invocations see each other's stacks.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::api::{
    ChangeSet, ChangeSetRequest, ChangeSetSummary, EventPage, ProvisionError, ProvisioningApi,
    RemoteStack, ResourceChange, StackEvent, StackRequest,
};
use crate::domain::StackStatus;

const PAGE_SIZE: usize = 50;
const STACK_TYPE: &str = "AWS::CloudFormation::Stack";
const NO_CHANGES: &str = "The submitted information didn't contain changes. \
                          Submit different information to create a change set.";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredStack {
    id: String,
    status: StackStatus,
    template_body: String,
    parameters: BTreeMap<String, String>,
    tags: BTreeMap<String, String>,
    outputs: BTreeMap<String, String>,
    capabilities: Vec<String>,
    notification_arns: Vec<String>,
    /// Oldest first
    events: Vec<StackEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChangeSet {
    id: String,
    name: String,
    stack: String,
    request: StackRequest,
    status: StackStatus,
    status_reason: Option<String>,
    changes: Vec<ResourceChange>,
    described: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    stacks: BTreeMap<String, StoredStack>,
    change_sets: BTreeMap<String, StoredChangeSet>,
    sequence: u64,

    #[serde(skip)]
    scripts: HashMap<String, VecDeque<StackStatus>>,
    #[serde(skip)]
    failures: HashMap<String, StackStatus>,
    #[serde(skip)]
    find_calls: HashMap<String, usize>,
    #[serde(skip)]
    calls: Vec<String>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn push_event(&mut self, stack: &str, status: &str, resource_type: &str, logical_id: &str) {
        let id = self.next_id();
        if let Some(s) = self.stacks.get_mut(stack) {
            s.events.push(StackEvent {
                event_id: format!("{stack}-{id}"),
                resource_status: status.to_string(),
                resource_type: resource_type.to_string(),
                logical_resource_id: logical_id.to_string(),
            });
        }
    }

    /// Records the event trail of an operation and settles the stack
    fn run_operation(&mut self, stack: &str, verb: &str, template_body: &str) {
        let final_status = self
            .failures
            .remove(stack)
            .unwrap_or_else(|| StackStatus::new(format!("{verb}_COMPLETE")));
        let in_progress = format!("{verb}_IN_PROGRESS");

        self.push_event(stack, &in_progress, STACK_TYPE, stack);
        for (logical_id, resource_type) in template_resources(template_body) {
            self.push_event(stack, &in_progress, &resource_type, &logical_id);
            self.push_event(stack, &format!("{verb}_COMPLETE"), &resource_type, &logical_id);
        }
        self.push_event(stack, final_status.as_str(), STACK_TYPE, stack);

        if let Some(s) = self.stacks.get_mut(stack) {
            s.status = final_status;
        }
    }
}

/// Simulated provisioning account
#[derive(Debug, Default)]
pub struct MemoryApi {
    state: Mutex<State>,
    path: Option<PathBuf>,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an account persisted at `path`, starting empty if the file is absent
    pub fn open(path: &Path) -> Result<Self, ProvisionError> {
        let state = if path.exists() {
            let text = fs::read_to_string(path)
                .map_err(|e| ProvisionError::api("memory", format!("{}: {e}", path.display())))?;
            serde_json::from_str(&text)
                .map_err(|e| ProvisionError::api("memory", format!("{}: {e}", path.display())))?
        } else {
            State::default()
        };

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path.to_path_buf()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, state: &State) -> Result<(), ProvisionError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(state)
            .map_err(|e| ProvisionError::api("memory", e.to_string()))?;
        fs::write(path, text)
            .map_err(|e| ProvisionError::api("memory", format!("{}: {e}", path.display())))
    }

    /// Statuses returned by the next lookups of `stack`, one per lookup;
    /// the last one sticks
    pub fn script_statuses(&self, stack: &str, statuses: &[&str]) {
        self.lock()
            .scripts
            .insert(stack.to_string(), statuses.iter().map(|s| StackStatus::from(*s)).collect());
    }

    /// The next operation on `stack` ends in `status`
    pub fn fail_next(&self, stack: &str, status: &str) {
        self.lock()
            .failures
            .insert(stack.to_string(), StackStatus::from(status));
    }

    /// Mutating calls so far, e.g. `create_stack app`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn find_calls(&self, stack: &str) -> usize {
        self.lock().find_calls.get(stack).copied().unwrap_or(0)
    }

    /// Current template of a stack
    pub fn template_body(&self, stack: &str) -> Option<String> {
        self.lock().stacks.get(stack).map(|s| s.template_body.clone())
    }

    pub fn stack_names(&self) -> Vec<String> {
        self.lock().stacks.keys().cloned().collect()
    }
}

fn parse_template(body: &str) -> Option<serde_yaml::Value> {
    serde_yaml::from_str(body).ok()
}

/// `(logical id, type)` of every resource declared in a template
fn template_resources(body: &str) -> Vec<(String, String)> {
    let Some(doc) = parse_template(body) else {
        return Vec::new();
    };
    let Some(resources) = doc.get("Resources").and_then(|r| r.as_mapping()) else {
        return Vec::new();
    };
    resources
        .iter()
        .filter_map(|(k, v)| {
            let id = k.as_str()?;
            let ty = v.get("Type").and_then(|t| t.as_str()).unwrap_or("Unknown");
            Some((id.to_string(), ty.to_string()))
        })
        .collect()
}

/// Outputs whose `Value` is a literal string
fn template_outputs(body: &str) -> BTreeMap<String, String> {
    let Some(doc) = parse_template(body) else {
        return BTreeMap::new();
    };
    let Some(outputs) = doc.get("Outputs").and_then(|o| o.as_mapping()) else {
        return BTreeMap::new();
    };
    outputs
        .iter()
        .filter_map(|(k, v)| {
            let value = v.get("Value")?.as_str()?;
            Some((k.as_str()?.to_string(), value.to_string()))
        })
        .collect()
}

fn diff(stack: &StoredStack, request: &StackRequest) -> Vec<ResourceChange> {
    let mut changes = Vec::new();

    let before: BTreeMap<String, String> =
        template_resources(&stack.template_body).into_iter().collect();
    let after: BTreeMap<String, String> =
        template_resources(&request.template_body).into_iter().collect();
    let ids: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    for id in ids {
        let (action, resource_type, replacement) = match (before.get(id), after.get(id)) {
            (None, Some(t)) => ("Add", t, None),
            (Some(t), None) => ("Remove", t, None),
            (Some(a), Some(b)) if a != b => ("Modify", b, Some("True".to_string())),
            _ => continue,
        };
        changes.push(ResourceChange {
            action: action.into(),
            logical_resource_id: id.clone(),
            resource_type: resource_type.clone(),
            replacement,
        });
    }
    // same resources, other body (outputs, properties)
    if changes.is_empty() && stack.template_body != request.template_body {
        changes.push(ResourceChange {
            action: "Modify".into(),
            logical_resource_id: request.stack_name.clone(),
            resource_type: STACK_TYPE.into(),
            replacement: Some("Conditional".into()),
        });
    }

    let keys: BTreeSet<&String> =
        stack.parameters.keys().chain(request.parameters.keys()).collect();
    for key in keys {
        let action = match (stack.parameters.get(key), request.parameters.get(key)) {
            (None, Some(_)) => "Add",
            (Some(_), None) => "Remove",
            (Some(a), Some(b)) if a != b => "Modify",
            _ => continue,
        };
        changes.push(ResourceChange {
            action: action.into(),
            logical_resource_id: key.clone(),
            resource_type: "Parameter".into(),
            replacement: None,
        });
    }

    if stack.tags != request.tags {
        changes.push(ResourceChange {
            action: "Modify".into(),
            logical_resource_id: "Tags".into(),
            resource_type: "Tag".into(),
            replacement: None,
        });
    }
    changes
}

impl ProvisioningApi for MemoryApi {
    fn find_stack(&self, name: &str) -> Result<Option<RemoteStack>, ProvisionError> {
        let mut state = self.lock();
        *state.find_calls.entry(name.to_string()).or_default() += 1;

        let scripted = state.scripts.get_mut(name).and_then(|q| {
            let status = q.pop_front();
            if q.is_empty() {
                // keep the last scripted status for later lookups
                if let Some(s) = &status {
                    q.push_back(s.clone());
                }
            }
            status
        });

        let Some(stack) = state.stacks.get_mut(name) else {
            return Ok(None);
        };
        if let Some(status) = scripted {
            stack.status = status;
        }

        Ok(Some(RemoteStack {
            name: name.to_string(),
            status: stack.status.clone(),
            outputs: stack.outputs.clone(),
            capabilities: stack.capabilities.clone(),
            notification_arns: stack.notification_arns.clone(),
        }))
    }

    fn create_stack(&self, request: &StackRequest) -> Result<String, ProvisionError> {
        let mut state = self.lock();
        let name = request.stack_name.clone();
        state.calls.push(format!("create_stack {name}"));

        if state.stacks.contains_key(&name) {
            return Err(ProvisionError::api(
                "create-stack",
                format!("Stack [{name}] already exists"),
            ));
        }

        let id = format!("arn:memory:stack/{name}/{}", state.next_id());
        state.stacks.insert(
            name.clone(),
            StoredStack {
                id: id.clone(),
                status: StackStatus::from("CREATE_IN_PROGRESS"),
                template_body: request.template_body.clone(),
                parameters: request.parameters.clone(),
                tags: request.tags.clone(),
                outputs: template_outputs(&request.template_body),
                capabilities: Vec::new(),
                notification_arns: Vec::new(),
                events: Vec::new(),
            },
        );
        state.run_operation(&name, "CREATE", &request.template_body);
        debug!("memory: created {name}");

        self.save(&state)?;
        Ok(id)
    }

    fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String, ProvisionError> {
        let mut state = self.lock();
        let stack_name = request.stack.stack_name.clone();
        state.calls.push(format!("create_change_set {stack_name}"));

        let Some(stack) = state.stacks.get(&stack_name) else {
            return Err(ProvisionError::api(
                "create-change-set",
                format!("Stack [{stack_name}] does not exist"),
            ));
        };

        let changes = diff(stack, &request.stack);
        let (status, status_reason) = if changes.is_empty() {
            ("FAILED", Some(NO_CHANGES.to_string()))
        } else {
            ("CREATE_COMPLETE", None)
        };

        let id = format!(
            "arn:memory:changeSet/{}/{}",
            request.change_set_name,
            state.next_id()
        );
        state.change_sets.insert(
            id.clone(),
            StoredChangeSet {
                id: id.clone(),
                name: request.change_set_name.clone(),
                stack: stack_name,
                request: request.stack.clone(),
                status: StackStatus::from(status),
                status_reason,
                changes,
                described: false,
            },
        );

        self.save(&state)?;
        Ok(id)
    }

    fn describe_change_set(&self, id: &str) -> Result<ChangeSet, ProvisionError> {
        let mut state = self.lock();
        let Some(cs) = state.change_sets.get_mut(id) else {
            return Err(ProvisionError::api(
                "describe-change-set",
                format!("ChangeSet [{id}] does not exist"),
            ));
        };

        // the first look finds the change set still being computed
        let status = if cs.described {
            cs.status.clone()
        } else {
            cs.described = true;
            StackStatus::from("CREATE_IN_PROGRESS")
        };

        Ok(ChangeSet {
            id: cs.id.clone(),
            name: cs.name.clone(),
            status,
            status_reason: cs.status_reason.clone(),
            changes: cs.changes.clone(),
        })
    }

    fn execute_change_set(&self, id: &str) -> Result<(), ProvisionError> {
        let mut state = self.lock();
        let Some(cs) = state.change_sets.get(id).cloned() else {
            return Err(ProvisionError::api(
                "execute-change-set",
                format!("ChangeSet [{id}] does not exist"),
            ));
        };
        state.calls.push(format!("execute_change_set {}", cs.stack));

        if cs.status.as_str() != "CREATE_COMPLETE" {
            return Err(ProvisionError::api(
                "execute-change-set",
                format!("ChangeSet [{}] is in {} status", cs.name, cs.status),
            ));
        }

        if let Some(stack) = state.stacks.get_mut(&cs.stack) {
            stack.template_body = cs.request.template_body.clone();
            stack.parameters = cs.request.parameters.clone();
            stack.tags = cs.request.tags.clone();
            stack.outputs = template_outputs(&cs.request.template_body);
        }
        state.change_sets.retain(|_, other| other.stack != cs.stack);
        state.run_operation(&cs.stack, "UPDATE", &cs.request.template_body);

        self.save(&state)
    }

    fn delete_change_set(&self, id: &str) -> Result<(), ProvisionError> {
        let mut state = self.lock();
        let Some(cs) = state.change_sets.remove(id) else {
            return Err(ProvisionError::api(
                "delete-change-set",
                format!("ChangeSet [{id}] does not exist"),
            ));
        };
        state.calls.push(format!("delete_change_set {}", cs.stack));

        self.save(&state)
    }

    fn list_change_sets(&self, stack: &str) -> Result<Vec<ChangeSetSummary>, ProvisionError> {
        let state = self.lock();
        Ok(state
            .change_sets
            .values()
            .filter(|cs| cs.stack == stack)
            .map(|cs| ChangeSetSummary {
                id: cs.id.clone(),
                status: if cs.described {
                    cs.status.clone()
                } else {
                    StackStatus::from("CREATE_IN_PROGRESS")
                },
            })
            .collect())
    }

    fn delete_stack(&self, name: &str) -> Result<(), ProvisionError> {
        let mut state = self.lock();
        state.calls.push(format!("delete_stack {name}"));

        if !state.stacks.contains_key(name) {
            return Err(ProvisionError::api(
                "delete-stack",
                format!("Stack with id {name} does not exist"),
            ));
        }

        if let Some(failure) = state.failures.remove(name) {
            state.push_event(name, "DELETE_IN_PROGRESS", STACK_TYPE, name);
            state.push_event(name, failure.as_str(), STACK_TYPE, name);
            if let Some(stack) = state.stacks.get_mut(name) {
                stack.status = failure;
            }
        } else {
            state.stacks.remove(name);
            state.change_sets.retain(|_, cs| cs.stack != name);
        }

        self.save(&state)
    }

    fn describe_stack_events(
        &self,
        name: &str,
        next_token: Option<&str>,
    ) -> Result<EventPage, ProvisionError> {
        let state = self.lock();
        let Some(stack) = state.stacks.get(name) else {
            return Err(ProvisionError::api(
                "describe-stack-events",
                format!("Stack [{name}] does not exist"),
            ));
        };

        let offset: usize = match next_token {
            Some(token) => token.parse().map_err(|_| {
                ProvisionError::api("describe-stack-events", format!("Invalid token {token}"))
            })?,
            None => 0,
        };

        let newest_first: Vec<StackEvent> = stack.events.iter().rev().cloned().collect();
        let end = (offset + PAGE_SIZE).min(newest_first.len());
        let events = newest_first.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_token = (end < newest_first.len()).then(|| end.to_string());

        Ok(EventPage { events, next_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEMPLATE: &str = r#"
Resources:
  Queue:
    Type: AWS::SQS::Queue
Outputs:
  QueueName:
    Value: jobs
"#;

    fn request(name: &str, body: &str) -> StackRequest {
        StackRequest {
            stack_name: name.into(),
            template_body: body.into(),
            ..Default::default()
        }
    }

    fn change_set(name: &str, body: &str) -> ChangeSetRequest {
        ChangeSetRequest {
            change_set_name: format!("{name}-1"),
            stack: request(name, body),
            capabilities: vec![],
            notification_arns: vec![],
        }
    }

    #[test]
    fn create_records_events_and_outputs() {
        let api = MemoryApi::new();
        api.create_stack(&request("app", TEMPLATE)).unwrap();

        let stack = api.find_stack("app").unwrap().unwrap();
        assert_eq!(stack.status.as_str(), "CREATE_COMPLETE");
        assert_eq!(stack.outputs["QueueName"], "jobs");
        assert_eq!(api.find_deployment_output("app", "QueueName").unwrap(), "jobs");

        let page = api.describe_stack_events("app", None).unwrap();
        let ids: Vec<&str> = page
            .events
            .iter()
            .map(|e| e.logical_resource_id.as_str())
            .collect();
        assert_eq!(ids, vec!["app", "Queue", "Queue", "app"]);
        assert_eq!(page.events[0].resource_status, "CREATE_COMPLETE");
    }

    #[test]
    fn duplicate_create_fails() {
        let api = MemoryApi::new();
        api.create_stack(&request("app", "{}")).unwrap();
        assert!(api.create_stack(&request("app", "{}")).is_err());
    }

    #[test]
    fn identical_change_set_is_an_empty_diff() {
        let api = MemoryApi::new();
        api.create_stack(&request("app", TEMPLATE)).unwrap();

        let id = api.create_change_set(&change_set("app", TEMPLATE)).unwrap();
        let first = api.describe_change_set(&id).unwrap();
        assert!(first.status.is_pending());

        let settled = api.describe_change_set(&id).unwrap();
        assert!(settled.is_empty_diff());
    }

    #[test]
    fn executed_change_set_updates_the_stack() {
        let api = MemoryApi::new();
        api.create_stack(&request("app", "{}")).unwrap();

        let id = api.create_change_set(&change_set("app", TEMPLATE)).unwrap();
        api.describe_change_set(&id).unwrap();
        let cs = api.describe_change_set(&id).unwrap();
        assert_eq!(cs.changes.len(), 1);

        api.execute_change_set(&id).unwrap();
        let stack = api.find_stack("app").unwrap().unwrap();
        assert_eq!(stack.status.as_str(), "UPDATE_COMPLETE");
        assert_eq!(api.template_body("app").unwrap(), TEMPLATE);
        assert!(api.list_change_sets("app").unwrap().is_empty());
    }

    #[test]
    fn scripted_statuses_are_sticky() {
        let api = MemoryApi::new();
        api.script_statuses("app", &["CREATE_IN_PROGRESS", "CREATE_COMPLETE"]);
        api.create_stack(&request("app", "{}")).unwrap();

        let statuses: Vec<String> = (0..3)
            .map(|_| api.find_stack("app").unwrap().unwrap().status.0)
            .collect();
        assert_eq!(
            statuses,
            vec!["CREATE_IN_PROGRESS", "CREATE_COMPLETE", "CREATE_COMPLETE"]
        );
    }

    #[test]
    fn delete_removes_stack_unless_failing() {
        let api = MemoryApi::new();
        api.create_stack(&request("a", "{}")).unwrap();
        api.create_stack(&request("b", "{}")).unwrap();
        api.fail_next("b", "DELETE_FAILED");

        api.delete_stack("a").unwrap();
        api.delete_stack("b").unwrap();

        assert!(api.find_stack("a").unwrap().is_none());
        assert_eq!(
            api.find_stack("b").unwrap().unwrap().status.as_str(),
            "DELETE_FAILED"
        );
        assert!(api.delete_stack("a").unwrap_err().is_not_found());
    }

    #[test]
    fn events_are_paginated() {
        let api = MemoryApi::new();
        let mut body = String::from("Resources:\n");
        for i in 0..30 {
            body.push_str(&format!("  R{i}:\n    Type: AWS::SNS::Topic\n"));
        }
        api.create_stack(&request("big", &body)).unwrap();

        let first = api.describe_stack_events("big", None).unwrap();
        assert_eq!(first.events.len(), PAGE_SIZE);
        let token = first.next_token.unwrap();
        let second = api.describe_stack_events("big", Some(&token)).unwrap();
        assert_eq!(second.events.len(), 62 - PAGE_SIZE);
        assert!(second.next_token.is_none());
    }

    #[test]
    fn persisted_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("account.json");

        let api = MemoryApi::open(&path).unwrap();
        api.create_stack(&request("app", TEMPLATE)).unwrap();
        drop(api);

        let reopened = MemoryApi::open(&path).unwrap();
        assert_eq!(reopened.stack_names(), vec!["app"]);
        assert!(reopened.calls().is_empty());
    }
}
