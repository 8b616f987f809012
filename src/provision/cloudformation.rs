//! CloudFormation through the AWS SDK

use std::collections::BTreeMap;
use std::error::Error as StdError;

use aws_sdk_cloudformation::error::DisplayErrorContext;
use aws_sdk_cloudformation::types as cfn;
use aws_sdk_cloudformation::Client;
use tracing::debug;

use super::api::{
    ChangeSet, ChangeSetRequest, ChangeSetSummary, EventPage, ProvisionError, ProvisioningApi,
    RemoteStack, ResourceChange, StackEvent, StackRequest,
};
use crate::aws::AwsSession;
use crate::domain::StackStatus;

/// Provider backed by the CloudFormation API
#[derive(Debug)]
pub struct CloudFormationApi {
    session: AwsSession,
    client: Client,
}

impl CloudFormationApi {
    pub fn new(session: AwsSession) -> Self {
        let client = Client::new(session.config());
        Self { session, client }
    }

    /// Loads the default AWS configuration, overriding the region when given
    pub fn connect(region: Option<&str>) -> Result<Self, ProvisionError> {
        let session = AwsSession::load(region)
            .map_err(|e| ProvisionError::api("LoadConfig", e.to_string()))?;
        Ok(Self::new(session))
    }
}

fn api_error<E: StdError>(call: &'static str, err: E) -> ProvisionError {
    ProvisionError::api(call, DisplayErrorContext(&err).to_string())
}

/// Reads a string member whether the model marks it required or not
fn text<'a>(value: impl Into<Option<&'a str>>) -> String {
    value.into().unwrap_or_default().to_string()
}

fn stack_status<'a>(value: impl Into<Option<&'a cfn::StackStatus>>) -> StackStatus {
    StackStatus::new(value.into().map(|s| s.as_str()).unwrap_or_default())
}

fn parameters(values: &BTreeMap<String, String>) -> Vec<cfn::Parameter> {
    values
        .iter()
        .map(|(k, v)| {
            cfn::Parameter::builder()
                .parameter_key(k)
                .parameter_value(v)
                .build()
        })
        .collect()
}

fn tags(values: &BTreeMap<String, String>) -> Result<Vec<cfn::Tag>, ProvisionError> {
    values
        .iter()
        .map(|(k, v)| {
            Ok(cfn::Tag::builder().key(k).value(v).build())
        })
        .collect()
}

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    (!values.is_empty()).then_some(values)
}

fn remote_stack(stack: &cfn::Stack) -> RemoteStack {
    RemoteStack {
        name: text(stack.stack_name()),
        status: stack_status(stack.stack_status()),
        outputs: stack
            .outputs()
            .iter()
            .map(|o| (text(o.output_key()), text(o.output_value())))
            .collect(),
        capabilities: stack
            .capabilities()
            .iter()
            .map(|c| c.as_str().to_string())
            .collect(),
        notification_arns: stack.notification_arns().to_vec(),
    }
}

fn resource_changes(changes: &[cfn::Change]) -> Vec<ResourceChange> {
    changes
        .iter()
        .filter_map(|c| c.resource_change())
        .map(|rc| ResourceChange {
            action: rc.action().map(|a| a.as_str()).unwrap_or_default().to_string(),
            logical_resource_id: text(rc.logical_resource_id()),
            resource_type: text(rc.resource_type()),
            replacement: rc.replacement().map(|r| r.as_str().to_string()),
        })
        .collect()
}

fn stack_event(event: &cfn::StackEvent) -> StackEvent {
    StackEvent {
        event_id: text(event.event_id()),
        resource_status: event
            .resource_status()
            .map(|s| s.as_str())
            .unwrap_or_default()
            .to_string(),
        resource_type: text(event.resource_type()),
        logical_resource_id: text(event.logical_resource_id()),
    }
}

impl ProvisioningApi for CloudFormationApi {
    fn find_stack(&self, name: &str) -> Result<Option<RemoteStack>, ProvisionError> {
        let call = self.client.describe_stacks().stack_name(name);
        match self.session.block_on(call.send()) {
            Ok(out) => Ok(out.stacks().first().map(remote_stack)),
            Err(e) => {
                let err = api_error("DescribeStacks", e);
                if err.is_not_found() {
                    debug!("Stack {name} not found");
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    fn create_stack(&self, request: &StackRequest) -> Result<String, ProvisionError> {
        let call = self
            .client
            .create_stack()
            .stack_name(&request.stack_name)
            .template_body(&request.template_body)
            .set_parameters(non_empty(parameters(&request.parameters)))
            .set_tags(non_empty(tags(&request.tags)?))
            .on_failure(cfn::OnFailure::Rollback);

        let out = self
            .session
            .block_on(call.send())
            .map_err(|e| api_error("CreateStack", e))?;
        Ok(text(out.stack_id()))
    }

    fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String, ProvisionError> {
        let capabilities = request
            .capabilities
            .iter()
            .map(|c| cfn::Capability::from(c.as_str()))
            .collect();

        let call = self
            .client
            .create_change_set()
            .change_set_name(&request.change_set_name)
            .stack_name(&request.stack.stack_name)
            .template_body(&request.stack.template_body)
            .set_parameters(non_empty(parameters(&request.stack.parameters)))
            .set_tags(non_empty(tags(&request.stack.tags)?))
            .set_capabilities(non_empty(capabilities))
            .set_notification_arns(non_empty(request.notification_arns.clone()));

        let out = self
            .session
            .block_on(call.send())
            .map_err(|e| api_error("CreateChangeSet", e))?;
        Ok(text(out.id()))
    }

    fn describe_change_set(&self, id: &str) -> Result<ChangeSet, ProvisionError> {
        self.session.block_on(async {
            let mut next_token: Option<String> = None;
            let mut change_set: Option<ChangeSet> = None;
            loop {
                let out = self
                    .client
                    .describe_change_set()
                    .change_set_name(id)
                    .set_next_token(next_token.take())
                    .send()
                    .await
                    .map_err(|e| api_error("DescribeChangeSet", e))?;

                let changes = resource_changes(out.changes());
                match change_set.as_mut() {
                    Some(cs) => cs.changes.extend(changes),
                    None => {
                        change_set = Some(ChangeSet {
                            id: text(out.change_set_id()),
                            name: text(out.change_set_name()),
                            status: StackStatus::new(
                                out.status().map(|s| s.as_str()).unwrap_or_default(),
                            ),
                            status_reason: out.status_reason().map(String::from),
                            changes,
                        })
                    }
                }

                match out.next_token() {
                    Some(token) => next_token = Some(token.to_string()),
                    None => break,
                }
            }
            change_set.ok_or_else(|| ProvisionError::api("DescribeChangeSet", "empty response"))
        })
    }

    fn execute_change_set(&self, id: &str) -> Result<(), ProvisionError> {
        self.session
            .block_on(self.client.execute_change_set().change_set_name(id).send())
            .map(drop)
            .map_err(|e| api_error("ExecuteChangeSet", e))
    }

    fn delete_change_set(&self, id: &str) -> Result<(), ProvisionError> {
        self.session
            .block_on(self.client.delete_change_set().change_set_name(id).send())
            .map(drop)
            .map_err(|e| api_error("DeleteChangeSet", e))
    }

    fn list_change_sets(&self, stack: &str) -> Result<Vec<ChangeSetSummary>, ProvisionError> {
        let out = self
            .session
            .block_on(self.client.list_change_sets().stack_name(stack).send())
            .map_err(|e| api_error("ListChangeSets", e))?;

        Ok(out
            .summaries()
            .iter()
            .map(|s| ChangeSetSummary {
                id: text(s.change_set_id()),
                status: StackStatus::new(s.status().map(|st| st.as_str()).unwrap_or_default()),
            })
            .collect())
    }

    fn delete_stack(&self, name: &str) -> Result<(), ProvisionError> {
        self.session
            .block_on(self.client.delete_stack().stack_name(name).send())
            .map(drop)
            .map_err(|e| api_error("DeleteStack", e))
    }

    fn describe_stack_events(
        &self,
        name: &str,
        next_token: Option<&str>,
    ) -> Result<EventPage, ProvisionError> {
        let call = self
            .client
            .describe_stack_events()
            .stack_name(name)
            .set_next_token(next_token.map(String::from));

        let out = self
            .session
            .block_on(call.send())
            .map_err(|e| api_error("DescribeStackEvents", e))?;
        Ok(EventPage {
            events: out.stack_events().iter().map(stack_event).collect(),
            next_token: out.next_token().map(String::from),
        })
    }
}
