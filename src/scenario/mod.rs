//! YAML test scenarios
//!
//! A scenario file describes one test case as data. Loading turns it into
//! the step sequence, context and run options the orchestrator consumes.

mod config;
mod runner;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::hooks::{HookRegistry, LogDumpHook};
use crate::naming;
use crate::orchestrator::{Precondition, RunOptions};
use crate::step::{
    create_namespace, delete_namespace, sleep_for, validate_sequence, Command, Step, StepContext,
};

pub use config::{
    DiagnosticsOverride, OutputExpectation, Requirements, ScenarioFile, ScenarioStep,
};
pub use runner::{run_scenarios, RunSettings};

/// Variable the scenario namespace is exported as
pub const NAMESPACE_VAR: &str = "NAMESPACE";

/// Load and parse a scenario file
pub fn load_scenario(path: &Path) -> Result<ScenarioFile> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    serde_yaml::from_str(&content).map_err(|e| Error::ScenarioParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// A scenario resolved against the configuration, ready to run
#[derive(Debug)]
pub struct PreparedScenario {
    pub name: String,
    pub description: Option<String>,
    pub path: PathBuf,
    pub parallel: bool,
    /// Generated namespace, when the scenario asked for one
    pub namespace: Option<String>,
    pub steps: Vec<Step>,
    pub context: StepContext,
    pub preconditions: Vec<Precondition>,
    pub hooks: HookRegistry,
}

impl PreparedScenario {
    /// Load `path` and resolve it against `config`
    ///
    /// `component` overrides the configured component under test.
    pub fn load(path: &Path, config: &Config, component: Option<&str>) -> Result<Self> {
        let file = load_scenario(path)?;
        Self::from_file(file, path, config, component)
    }

    pub fn from_file(
        file: ScenarioFile,
        path: &Path,
        config: &Config,
        component: Option<&str>,
    ) -> Result<Self> {
        let invalid = |message: String| Error::ScenarioParse {
            path: path.display().to_string(),
            message,
        };

        let namespace = file.namespace.as_deref().map(naming::generate);

        let mut context = config.step_context();
        if let Some(ns) = &namespace {
            context.env.insert(NAMESPACE_VAR.to_string(), ns.clone());
        }
        for (name, value) in &file.env {
            let value = context.expand(value);
            context.env.insert(name.clone(), value);
        }

        let scenario_namespace = |explicit: Option<String>, action: &str| {
            explicit
                .map(|ns| context.expand(&ns))
                .or_else(|| namespace.clone())
                .ok_or_else(|| {
                    invalid(format!(
                        "'{}' needs a namespace but the scenario has none",
                        action
                    ))
                })
        };

        let mut steps = Vec::with_capacity(file.steps.len());
        for step in file.steps {
            let step = match step {
                ScenarioStep::Command {
                    name,
                    run,
                    expect,
                    cleanup,
                    background,
                    timeout,
                } => {
                    let mut command = Command::new(name, run);
                    if let Some(expect) = expect {
                        command = match (expect.matches, expect.equals) {
                            (Some(_), Some(_)) => {
                                return Err(invalid(format!(
                                    "step '{}' sets both 'matches' and 'equals'",
                                    command.name
                                )))
                            }
                            (Some(pattern), None) => command.expect_regex(&pattern)?,
                            (None, Some(exact)) => command.expect_exact(exact),
                            (None, None) => command,
                        };
                        if let Some(stream) = expect.stream {
                            command = command.match_on(stream);
                        }
                    }
                    if cleanup {
                        command = command.cleanup();
                    }
                    if background {
                        command = command.background();
                    }
                    if let Some(secs) = timeout {
                        command = command.with_timeout(Duration::from_secs(secs));
                    }
                    Step::from(command)
                }
                ScenarioStep::CreateNamespace { namespace } => {
                    create_namespace(scenario_namespace(namespace, "create_namespace")?)
                }
                ScenarioStep::DeleteNamespace { namespace } => {
                    delete_namespace(scenario_namespace(namespace, "delete_namespace")?)
                }
                ScenarioStep::Sleep { seconds, name } => {
                    let mut command = sleep_for(seconds);
                    if let Some(name) = name {
                        command.name = name;
                    }
                    Step::from(command)
                }
            };
            steps.push(step);
        }
        validate_sequence(&steps).map_err(|e| invalid(e.to_string()))?;

        let mut preconditions: Vec<Precondition> = file
            .requires
            .tools
            .into_iter()
            .map(Precondition::Tool)
            .chain(file.requires.env.into_iter().map(Precondition::EnvVar))
            .collect();
        // Without a configured component every scenario runs
        let actual = component
            .map(str::to_string)
            .or_else(|| config.run.component.clone());
        if let (Some(required), Some(actual)) = (file.requires.component, actual) {
            preconditions.push(Precondition::Component {
                required,
                actual: Some(actual),
            });
        }

        let hooks = diagnostics_hooks(config, file.diagnostics.as_ref());

        Ok(Self {
            name: file.name,
            description: file.description,
            path: path.to_path_buf(),
            parallel: file.parallel,
            namespace,
            steps,
            context,
            preconditions,
            hooks,
        })
    }

    /// Options for one run of this scenario
    pub fn run_options(&self, cancel: CancellationToken) -> RunOptions {
        RunOptions {
            hooks: self.hooks.clone(),
            preconditions: self.preconditions.clone(),
            cancel,
            namespaces: self.namespace.iter().cloned().collect(),
        }
    }
}

fn diagnostics_hooks(config: &Config, over: Option<&DiagnosticsOverride>) -> HookRegistry {
    let mut hooks = HookRegistry::new();
    if over.is_some_and(|o| !o.enabled) {
        return hooks;
    }

    let commands = over
        .and_then(|o| o.commands.clone())
        .unwrap_or_else(|| config.diagnostics.commands.clone());
    if commands.is_empty() {
        return hooks;
    }
    let only_on_failure = over
        .and_then(|o| o.only_on_failure)
        .unwrap_or(config.diagnostics.only_on_failure);

    hooks.register(Arc::new(
        LogDumpHook::new(commands).only_on_failure(only_on_failure),
    ));
    hooks
}
