//! Steps: the units of work a test case is made of
//!
//! A step is a flat sum type with one `execute` operation. Namespace
//! lifecycle variants are commands with a fixed invocation template, so
//! they resolve to a [`Command`] before running.

mod command;
pub mod expand;
mod namespace;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::common::{Error, Result};
use crate::process::ProcessRunner;

pub use command::{sleep_for, BackgroundCommand, Command, Expectation, MatchOn};
pub use namespace::{
    create_namespace, delete_namespace, NamespaceStep, NamespaceTemplates, NAMESPACE_PLACEHOLDER,
};

/// One unit of orchestrated work
#[derive(Debug, Clone)]
pub enum Step {
    Command(Command),
    NamespaceCreate(NamespaceStep),
    NamespaceDelete(NamespaceStep),
}

impl Step {
    pub fn name(&self) -> String {
        match self {
            Step::Command(cmd) => cmd.name.clone(),
            Step::NamespaceCreate(ns) => ns.create_name(),
            Step::NamespaceDelete(ns) => ns.delete_name(),
        }
    }

    pub fn is_cleanup(&self) -> bool {
        match self {
            Step::Command(cmd) => cmd.cleanup,
            Step::NamespaceCreate(_) => false,
            Step::NamespaceDelete(_) => true,
        }
    }

    /// Namespace created by this step, if any
    pub fn created_namespace(&self) -> Option<&str> {
        match self {
            Step::NamespaceCreate(ns) => Some(&ns.namespace),
            _ => None,
        }
    }

    /// The command this step runs in the given context
    pub fn resolve(&self, ctx: &StepContext) -> Command {
        match self {
            Step::Command(cmd) => cmd.clone(),
            Step::NamespaceCreate(ns) => ns.create_command(&ctx.namespace),
            Step::NamespaceDelete(ns) => ns.delete_command(&ctx.namespace),
        }
    }

    /// Run the step to completion
    pub async fn execute(
        &self,
        ctx: &StepContext,
        runner: &dyn ProcessRunner,
    ) -> Result<ExecutionResult> {
        self.resolve(ctx).execute(ctx, runner).await
    }
}

impl From<Command> for Step {
    fn from(cmd: Command) -> Self {
        Step::Command(cmd)
    }
}

/// Check that every step has a non-empty name unique within the sequence
///
/// Cleanup steps must run in the foreground.
pub fn validate_sequence(steps: &[Step]) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, step) in steps.iter().enumerate() {
        let name = step.name();
        if name.trim().is_empty() {
            return Err(Error::InvalidSequence(format!(
                "step {} has an empty name",
                i + 1
            )));
        }
        if !seen.insert(name.clone()) {
            return Err(Error::InvalidSequence(format!(
                "step name '{}' is used more than once",
                name
            )));
        }
        if let Step::Command(command) = step {
            if command.cleanup && command.background {
                return Err(Error::InvalidSequence(format!(
                    "cleanup step '{}' cannot run in the background",
                    name
                )));
            }
        }
    }
    Ok(())
}

/// Settings every step of a run resolves against
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Shell used as `<shell> -c <text>`
    pub shell: String,
    /// Variables overlaid on the ambient environment
    pub env: BTreeMap<String, String>,
    pub default_timeout: Option<Duration>,
    pub match_on: MatchOn,
    pub namespace: NamespaceTemplates,
}

impl Default for StepContext {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            env: BTreeMap::new(),
            default_timeout: Some(Duration::from_secs(300)),
            match_on: MatchOn::default(),
            namespace: NamespaceTemplates::default(),
        }
    }
}

impl StepContext {
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Context overlay first, then the ambient process environment
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.env
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }

    pub fn expand(&self, text: &str) -> String {
        expand::expand(text, |name| self.lookup(name))
    }
}

/// Phase a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Main,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Main => write!(f, "main"),
            Phase::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Why a step that ran did not pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// `None` when the process died from a signal
    NonZeroExit { code: Option<i32> },
    PatternMismatch { pattern: String },
    ExactMismatch { expected: String },
    TimedOut { after_ms: u64 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NonZeroExit { code: Some(code) } => {
                write!(f, "exited with code {}", code)
            }
            FailureReason::NonZeroExit { code: None } => write!(f, "terminated by a signal"),
            FailureReason::PatternMismatch { pattern } => {
                write!(f, "output does not match /{}/", pattern)
            }
            FailureReason::ExactMismatch { expected } => {
                write!(f, "output is not exactly {:?}", expected)
            }
            FailureReason::TimedOut { after_ms } => {
                write!(f, "timed out after {:.1}s", *after_ms as f64 / 1000.0)
            }
        }
    }
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    /// The command ran and did not meet its expectation
    Failed(FailureReason),
    /// The command could not be run
    Errored(String),
    /// Interrupted by run cancellation
    Cancelled,
}

/// Per-step record kept until the sequence is reported
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub step: String,
    pub phase: Phase,
    /// Shell text as executed, placeholders expanded
    pub command: String,
    pub expectation: Option<String>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub status: StepStatus,
}

impl ExecutionResult {
    pub fn passed(&self) -> bool {
        self.status == StepStatus::Passed
    }

    /// Result for a step that never produced output
    pub fn without_output(command: &Command, script: String, status: StepStatus) -> Self {
        Self {
            step: command.name.clone(),
            phase: command.phase(),
            command: script,
            expectation: command.expectation.as_ref().map(ToString::to_string),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
            status,
        }
    }
}

pub(crate) fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
