//! Stack CLI commands

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::{debug, warn};

use super::app::Session;
use crate::config::{
    EnvironmentStacks, HelperRegistry, ProviderKind, StacksConfig, StacksSettings,
};
use crate::provision::{
    ApiOutputs, CancelToken, CloudFormationApi, DeploymentReport, MemoryApi, Orchestrator,
    ProvisioningApi, StatusReporter, WaitPolicy,
};
use crate::versioning::default_render_vars;

const STACK_REF_HELP: &str =
    "<environment>, <environment>.<stack name> or <environment>[<stack name>, ...]";

#[derive(Subcommand)]
pub enum StacksCommands {
    /// Print the stacks configuration, optionally rendered
    Template {
        /// Stacks configuration file
        conf: PathBuf,

        /// Only this selection, rendered
        #[arg(long = "stacks", short = 's', value_name = "REF", help = STACK_REF_HELP)]
        stacks: Option<String>,

        /// Render the whole document
        #[arg(long, short = 'p')]
        process: bool,
    },

    /// Create missing stacks and update existing ones
    #[command(alias = "create")]
    Deploy(Target),

    /// Delete stacks, dependents first
    #[command(aliases = ["teardown", "destroy"])]
    Delete(Target),

    /// Show the remote status of stacks
    Status(Target),

    /// Show the changes a deploy would make to existing stacks
    Changes(Target),

    /// Print the resolved execution order
    Order(Target),
}

/// A configuration file and a selection of its stacks
#[derive(Args)]
pub struct Target {
    /// Stacks configuration file
    pub conf: PathBuf,

    #[arg(long = "stacks", short = 's', value_name = "REF", help = STACK_REF_HELP)]
    pub stacks: String,
}

pub fn run(cmd: StacksCommands, session: &Session) -> Result<()> {
    match cmd {
        StacksCommands::Template {
            conf,
            stacks,
            process,
        } => template(session, &conf, stacks.as_deref(), process),
        StacksCommands::Deploy(target) => {
            operate(session, &target, |o, env| o.create_or_update_stacks(env))
        }
        StacksCommands::Delete(target) => operate(session, &target, |o, env| o.delete_stacks(env)),
        StacksCommands::Status(target) => operate(session, &target, |o, env| o.stacks_status(env)),
        StacksCommands::Changes(target) => operate(session, &target, |o, env| o.print_changes(env)),
        StacksCommands::Order(target) => order(session, &target),
    }
}

/// Builds the backend selected in the settings
pub fn provisioning_api(settings: &StacksSettings) -> Result<Arc<dyn ProvisioningApi>> {
    Ok(match settings.provider {
        ProviderKind::Aws => Arc::new(
            CloudFormationApi::connect(settings.region.as_deref())
                .context("Failed to load the AWS configuration")?,
        ),
        ProviderKind::Memory => match &settings.memory_state {
            Some(path) => Arc::new(
                MemoryApi::open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            ),
            None => {
                warn!("Memory provider without memory_state: nothing is kept after this run");
                Arc::new(MemoryApi::new())
            }
        },
    })
}

fn load_config(conf: &Path, api: Arc<dyn ProvisioningApi>) -> Result<StacksConfig> {
    let helpers = HelperRegistry::with_builtins(Some(Box::new(ApiOutputs(api))));
    let vars = default_render_vars(Path::new("."));
    debug!("Template variables: {:?}", vars);

    StacksConfig::load(conf, helpers, vars)
        .with_context(|| format!("Failed to load stacks configuration {}", conf.display()))
}

fn template(session: &Session, conf: &Path, stacks: Option<&str>, process: bool) -> Result<()> {
    let api = provisioning_api(&session.settings.stacks)?;
    let config = load_config(conf, api)?;

    let document = match stacks {
        Some(reference) => config.environment_by_ref(reference)?.fetch_all()?,
        None if process => config.fetch_all()?,
        None => config.raw().clone(),
    };
    session.output.data(&document);
    Ok(())
}

fn operate<F>(session: &Session, target: &Target, action: F) -> Result<()>
where
    F: FnOnce(
        &mut Orchestrator<Box<dyn StatusReporter>>,
        &EnvironmentStacks<'_>,
    ) -> DeploymentReport,
{
    let api = provisioning_api(&session.settings.stacks)?;
    let config = load_config(&target.conf, api.clone())?;
    let environment = config.environment_by_ref(&target.stacks)?;

    let cancel = CancelToken::with_ctrlc().context("Failed to install Ctrl+C handler")?;
    let mut orchestrator = Orchestrator::new(api, session.output.reporter())
        .with_policy(WaitPolicy::from(&session.settings.stacks))
        .with_cancel(cancel)
        .dry_run(session.dry_run);

    let report = action(&mut orchestrator, &environment);
    summarize(&report)
}

fn summarize(report: &DeploymentReport) -> Result<()> {
    if report.cancelled {
        bail!("Interrupted; remaining stacks were not processed");
    }
    let failed: Vec<&str> = report.failures().map(|o| o.stack.as_str()).collect();
    if !failed.is_empty() {
        bail!("{} stack(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

#[derive(Serialize)]
struct OrderEntry<'a> {
    label: &'a str,
    stack: &'a str,
    depends_on: Vec<String>,
}

fn order(session: &Session, target: &Target) -> Result<()> {
    let api = provisioning_api(&session.settings.stacks)?;
    let config = load_config(&target.conf, api)?;
    let environment = config.environment_by_ref(&target.stacks)?;

    let entries: Vec<OrderEntry<'_>> = environment
        .order()
        .iter()
        .map(|label| OrderEntry {
            label,
            stack: environment.stack_name(label).unwrap_or(label),
            depends_on: environment.plan().dependencies_of(label),
        })
        .collect();

    if session.output.is_json() {
        session.output.data(&entries);
    } else {
        for (idx, entry) in entries.iter().enumerate() {
            if entry.depends_on.is_empty() {
                println!("{}. {} ({})", idx + 1, entry.label, entry.stack);
            } else {
                println!(
                    "{}. {} ({}) after {}",
                    idx + 1,
                    entry.label,
                    entry.stack,
                    entry.depends_on.join(", ")
                );
            }
        }
    }
    Ok(())
}
