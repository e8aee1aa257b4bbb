//! Diagnostic hooks
//!
//! Hooks run once per sequence, after the main phase and before cleanup
//! tears the namespace down. That is the last moment the state that made a
//! test fail can still be looked at. A failing hook is only a warning.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::common::{Error, Result};
use crate::process::ProcessRunner;
use crate::report::Verdict;
use crate::step::{Command, StepContext, NAMESPACE_PLACEHOLDER};

/// What a hook gets to work with
pub struct HookContext<'a> {
    /// Name of the sequence being run
    pub sequence: &'a str,
    /// Isolation namespaces owned by the sequence
    pub namespaces: &'a [String],
    /// Verdict of the main phase
    pub verdict: &'a Verdict,
    pub runner: &'a dyn ProcessRunner,
    pub step_context: &'a StepContext,
}

/// A callback invoked between the main phase and cleanup
#[async_trait]
pub trait DiagnosticHook: Send + Sync {
    fn name(&self) -> &str;

    /// Gather post-mortem artifacts; returned text goes to the report
    async fn before_cleanup(&self, ctx: &HookContext<'_>) -> Result<String>;
}

/// Result of one hook invocation
#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub hook: String,
    pub result: std::result::Result<String, String>,
}

/// Ordered set of hooks for one sequence
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn DiagnosticHook>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.name().to_string()))
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn DiagnosticHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Invoke every hook once, in registration order
    ///
    /// A hook that returns an error or panics yields an `Err` outcome.
    pub async fn run_all(&self, ctx: &HookContext<'_>) -> Vec<HookOutcome> {
        let mut outcomes = Vec::with_capacity(self.hooks.len());
        for hook in &self.hooks {
            let result = match AssertUnwindSafe(hook.before_cleanup(ctx)).catch_unwind().await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => {
                    tracing::warn!(hook = hook.name(), "diagnostic hook failed: {}", e);
                    Err(e.to_string())
                }
                Err(payload) => {
                    let message = format!("panicked: {}", panic_message(payload.as_ref()));
                    tracing::warn!(hook = hook.name(), "diagnostic hook {}", message);
                    Err(message)
                }
            };
            outcomes.push(HookOutcome {
                hook: hook.name().to_string(),
                result,
            });
        }
        outcomes
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Hook backed by a plain closure
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&HookContext<'_>) -> Result<String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> DiagnosticHook for FnHook<F>
where
    F: Fn(&HookContext<'_>) -> Result<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_cleanup(&self, ctx: &HookContext<'_>) -> Result<String> {
        (self.f)(ctx)
    }
}

/// Dumps cluster state for each namespace of the sequence
///
/// Each command template is run once per namespace with `{namespace}`
/// substituted; templates without the placeholder run once.
#[derive(Debug, Clone)]
pub struct LogDumpHook {
    commands: Vec<String>,
    only_on_failure: bool,
}

impl LogDumpHook {
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            commands,
            only_on_failure: true,
        }
    }

    pub fn only_on_failure(mut self, only_on_failure: bool) -> Self {
        self.only_on_failure = only_on_failure;
        self
    }

    fn rendered(&self, namespaces: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        for template in &self.commands {
            if template.contains(NAMESPACE_PLACEHOLDER) {
                for ns in namespaces {
                    out.push(template.replace(NAMESPACE_PLACEHOLDER, ns));
                }
            } else {
                out.push(template.clone());
            }
        }
        out
    }
}

#[async_trait]
impl DiagnosticHook for LogDumpHook {
    fn name(&self) -> &str {
        "log-dump"
    }

    async fn before_cleanup(&self, ctx: &HookContext<'_>) -> Result<String> {
        if self.only_on_failure && ctx.verdict.is_passed() {
            return Ok(String::new());
        }

        let mut dump = String::new();
        let mut errors = Vec::new();
        for (i, text) in self.rendered(ctx.namespaces).into_iter().enumerate() {
            let command = Command::new(format!("diagnostics-{}", i + 1), text);
            match command.execute(ctx.step_context, ctx.runner).await {
                Ok(result) => {
                    dump.push_str(&format!("$ {}\n", result.command));
                    dump.push_str(&result.stdout);
                    dump.push_str(&result.stderr);
                    if !dump.ends_with('\n') {
                        dump.push('\n');
                    }
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        if dump.is_empty() && !errors.is_empty() {
            return Err(Error::hook(self.name(), errors.join("; ")));
        }
        for error in errors {
            dump.push_str(&format!("! {}\n", error));
        }
        Ok(dump)
    }
}
