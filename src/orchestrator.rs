//! Orchestrator
//!
//! Runs one sequence in two phases. Main steps run in order and the phase
//! stops at the first step that fails or cannot be run. Diagnostic hooks
//! run next, exactly once. Cleanup steps then all run in order no matter
//! what happened before; their failures are warnings and never change the
//! verdict.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::common::config::Config;
use crate::common::Result;
use crate::hooks::{DiagnosticHook, HookContext, HookRegistry};
use crate::process::{ProcessRunner, ShellRunner};
use crate::report::{Diagnostic, Reporter, SequenceReport, TextReporter, Verdict};
use crate::step::{
    validate_sequence, BackgroundCommand, ExecutionResult, Step, StepContext, StepStatus,
};

/// Condition checked before anything runs; unmet means the test is skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Executable must be found on PATH (or exist, when given as a path)
    Tool(String),
    /// Variable must be set in the step context or the ambient environment
    EnvVar(String),
    /// The component under test must be `required`
    Component {
        required: String,
        actual: Option<String>,
    },
    /// Arbitrary check evaluated by the caller
    Check { description: String, satisfied: bool },
}

impl Precondition {
    /// Reason to skip, `None` when the precondition holds
    pub fn unmet_reason(&self, ctx: &StepContext) -> Option<String> {
        match self {
            Precondition::Tool(tool) => {
                let tool = ctx.expand(tool);
                which::which(&tool)
                    .is_err()
                    .then(|| format!("required tool '{}' not found", tool))
            }
            Precondition::EnvVar(name) => ctx
                .lookup(name)
                .filter(|v| !v.is_empty())
                .is_none()
                .then(|| format!("required variable ${} is not set", name)),
            Precondition::Component { required, actual } => {
                (actual.as_deref() != Some(required.as_str())).then(|| {
                    format!(
                        "test component is '{}', this test requires '{}'",
                        actual.as_deref().unwrap_or("unset"),
                        required
                    )
                })
            }
            Precondition::Check {
                description,
                satisfied,
            } => (!satisfied).then(|| description.clone()),
        }
    }
}

/// Per-sequence configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub hooks: HookRegistry,
    pub preconditions: Vec<Precondition>,
    /// Cancels the main phase; cleanup still runs
    pub cancel: CancellationToken,
    /// Namespaces handed to hooks besides the ones created by the steps
    pub namespaces: Vec<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook invoked after the main phase, before cleanup
    pub fn with_hook_before_cleanup(mut self, hook: impl DiagnosticHook + 'static) -> Self {
        self.hooks.register(Arc::new(hook));
        self
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.push(namespace.into());
        self
    }
}

/// Executes step sequences against one process runner and context
#[derive(Clone)]
pub struct Orchestrator {
    runner: Arc<dyn ProcessRunner>,
    context: StepContext,
}

impl Orchestrator {
    /// Orchestrator running commands through the real shell
    pub fn new(context: StepContext) -> Self {
        Self::with_runner(Arc::new(ShellRunner::new()), context)
    }

    pub fn with_runner(runner: Arc<dyn ProcessRunner>, context: StepContext) -> Self {
        Self { runner, context }
    }

    pub fn context(&self) -> &StepContext {
        &self.context
    }

    /// Run `steps` as the sequence `name`
    ///
    /// `Err` is returned only for a malformed sequence, before anything
    /// runs. Every failure during execution ends up in the report.
    pub async fn run(
        &self,
        name: &str,
        steps: &[Step],
        options: RunOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<SequenceReport> {
        validate_sequence(steps)?;
        let started = Instant::now();

        let mut namespaces: Vec<String> = steps
            .iter()
            .filter_map(Step::created_namespace)
            .map(str::to_string)
            .collect();
        for ns in &options.namespaces {
            if !namespaces.contains(ns) {
                namespaces.push(ns.clone());
            }
        }

        reporter.start(name);

        for precondition in &options.preconditions {
            if let Some(reason) = precondition.unmet_reason(&self.context) {
                tracing::info!(sequence = name, "skipping: {}", reason);
                let report = SequenceReport::skipped(name, reason, namespaces);
                reporter.finish(&report);
                return Ok(report);
            }
        }

        let (main, cleanup): (Vec<&Step>, Vec<&Step>) =
            steps.iter().partition(|step| !step.is_cleanup());

        let (main_results, verdict) = self
            .run_main_phase(name, &main, &options.cancel, reporter)
            .await;

        if main_results.is_empty() && verdict == (Verdict::Cancelled { step: None }) {
            // Nothing ran, so there is nothing to inspect or tear down
            let report = SequenceReport {
                name: name.to_string(),
                verdict,
                namespaces,
                main: Vec::new(),
                cleanup: Vec::new(),
                diagnostics: Vec::new(),
                warnings: Vec::new(),
                elapsed: started.elapsed(),
            };
            tracing::info!(sequence = name, "cancelled before the first step");
            reporter.finish(&report);
            return Ok(report);
        }

        let mut warnings = Vec::new();
        let mut diagnostics = Vec::new();
        let hook_ctx = HookContext {
            sequence: name,
            namespaces: &namespaces,
            verdict: &verdict,
            runner: self.runner.as_ref(),
            step_context: &self.context,
        };
        for outcome in options.hooks.run_all(&hook_ctx).await {
            match outcome.result {
                Ok(output) if output.trim().is_empty() => {}
                Ok(output) => {
                    reporter.log(&format!("diagnostics from '{}':\n{}", outcome.hook, output));
                    diagnostics.push(Diagnostic {
                        hook: outcome.hook,
                        output,
                    });
                }
                Err(message) => {
                    warnings.push(format!("diagnostic hook '{}' failed: {}", outcome.hook, message))
                }
            }
        }

        let cleanup_results = self.run_cleanup_phase(name, &cleanup, &mut warnings, reporter).await;

        let report = SequenceReport {
            name: name.to_string(),
            verdict,
            namespaces,
            main: main_results,
            cleanup: cleanup_results,
            diagnostics,
            warnings,
            elapsed: started.elapsed(),
        };

        tracing::info!(
            sequence = name,
            verdict = report.verdict.label(),
            elapsed = ?report.elapsed,
            "sequence finished"
        );
        reporter.finish(&report);
        Ok(report)
    }

    async fn run_main_phase(
        &self,
        name: &str,
        steps: &[&Step],
        cancel: &CancellationToken,
        reporter: &mut dyn Reporter,
    ) -> (Vec<ExecutionResult>, Verdict) {
        let ctx = &self.context;
        let mut results = Vec::new();
        let mut verdict = None;
        let mut background: Vec<BackgroundCommand> = Vec::new();

        for step in steps {
            if cancel.is_cancelled() {
                verdict = Some(Verdict::Cancelled { step: None });
                break;
            }

            let command = step.resolve(ctx);

            if command.background {
                match command.start(ctx, self.runner.as_ref()).await {
                    Ok(running) => {
                        tracing::debug!(sequence = name, step = %command.name, "started in background");
                        reporter.log(&format!("started '{}' in background", command.name));
                        background.push(running);
                        continue;
                    }
                    Err(e) => {
                        let script = command.invocation(ctx).script;
                        let result = ExecutionResult::without_output(
                            &command,
                            script,
                            StepStatus::Errored(e.to_string()),
                        );
                        verdict = Verdict::from_result(&result);
                        reporter.step_finished(&result);
                        results.push(result);
                        break;
                    }
                }
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = command.execute(ctx, self.runner.as_ref()) => Some(outcome),
            };

            let result = match outcome {
                Some(Ok(result)) => result,
                Some(Err(e)) => {
                    tracing::error!(sequence = name, step = %command.name, "could not run step: {}", e);
                    ExecutionResult::without_output(
                        &command,
                        command.invocation(ctx).script,
                        StepStatus::Errored(e.to_string()),
                    )
                }
                None => {
                    tracing::warn!(sequence = name, step = %command.name, "cancelled");
                    ExecutionResult::without_output(
                        &command,
                        command.invocation(ctx).script,
                        StepStatus::Cancelled,
                    )
                }
            };

            tracing::info!(
                sequence = name,
                step = %result.step,
                passed = result.passed(),
                "main step finished"
            );
            reporter.step_finished(&result);
            verdict = Verdict::from_result(&result);
            results.push(result);
            if verdict.is_some() {
                break;
            }
        }

        // Background commands are stopped in start order; the first failure
        // only counts when the main phase had not failed already
        for running in background {
            let command = running.command().clone();
            let script = running.script().to_string();
            let result = match running.stop(ctx).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(sequence = name, step = %command.name, "could not stop background step: {}", e);
                    ExecutionResult::without_output(&command, script, StepStatus::Errored(e.to_string()))
                }
            };
            reporter.step_finished(&result);
            if verdict.is_none() {
                verdict = Verdict::from_result(&result);
            }
            results.push(result);
        }

        (results, verdict.unwrap_or(Verdict::Passed))
    }

    async fn run_cleanup_phase(
        &self,
        name: &str,
        steps: &[&Step],
        warnings: &mut Vec<String>,
        reporter: &mut dyn Reporter,
    ) -> Vec<ExecutionResult> {
        let ctx = &self.context;
        let mut results = Vec::with_capacity(steps.len());

        for step in steps {
            let command = step.resolve(ctx);
            let result = match command.execute(ctx, self.runner.as_ref()).await {
                Ok(result) => result,
                Err(e) => ExecutionResult::without_output(
                    &command,
                    command.invocation(ctx).script,
                    StepStatus::Errored(e.to_string()),
                ),
            };

            match &result.status {
                StepStatus::Passed => {}
                StepStatus::Failed(reason) => {
                    tracing::warn!(sequence = name, step = %result.step, "cleanup step failed: {}", reason);
                    warnings.push(format!("cleanup step '{}' {}", result.step, reason));
                }
                StepStatus::Errored(message) => {
                    tracing::warn!(sequence = name, step = %result.step, "cleanup step could not run: {}", message);
                    warnings.push(format!("cleanup step '{}' could not run: {}", result.step, message));
                }
                StepStatus::Cancelled => {}
            }

            reporter.step_finished(&result);
            results.push(result);
        }

        results
    }
}

/// Run a sequence with the user's configuration, printing to stdout
///
/// Shorthand for test functions: `run_test_steps(..).await?.assert_passed()`.
/// When `options` has no hooks the configured log dump is registered.
pub async fn run_test_steps(
    name: &str,
    steps: &[Step],
    mut options: RunOptions,
) -> Result<SequenceReport> {
    let config = Config::load()?;
    if options.hooks.is_empty() && !config.diagnostics.commands.is_empty() {
        options.hooks.register(Arc::new(config.log_dump_hook()));
    }
    let orchestrator = Orchestrator::new(config.step_context());
    let mut reporter = TextReporter::stdout(false);
    orchestrator.run(name, steps, options, &mut reporter).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::common::Error;
    use crate::hooks::{FnHook, LogDumpHook};
    use crate::process::scripted::{Scripted, ScriptedRunner};
    use crate::step::{create_namespace, delete_namespace, Command, FailureReason, NamespaceTemplates};

    fn context() -> StepContext {
        let mut ctx = StepContext::default();
        ctx.namespace = NamespaceTemplates {
            create: "create {namespace}".to_string(),
            delete: "delete {namespace}".to_string(),
        };
        ctx
    }

    fn orchestrator(runner: &ScriptedRunner) -> Orchestrator {
        Orchestrator::with_runner(Arc::new(runner.clone()), context())
    }

    async fn run(runner: &ScriptedRunner, steps: &[Step], options: RunOptions) -> SequenceReport {
        let mut reporter = TextReporter::buffered(false);
        orchestrator(runner)
            .run("test", steps, options, &mut reporter)
            .await
            .unwrap()
    }

    fn cmd(name: &str, text: &str) -> Step {
        Step::from(Command::new(name, text))
    }

    fn clean(name: &str, text: &str) -> Step {
        Step::from(Command::new(name, text).cleanup())
    }

    #[tokio::test]
    async fn test_scenario_a_all_steps_pass_in_order() {
        let runner = ScriptedRunner::new();
        let steps = vec![
            create_namespace("ns-a"),
            cmd("SayHi", "echo hi"),
            delete_namespace("ns-a"),
        ];

        let report = run(&runner, &steps, RunOptions::new()).await;

        assert!(report.passed());
        assert_eq!(
            runner.calls(),
            vec!["CreateTestNamespace/ns-a", "SayHi", "DeleteTestNamespace/ns-a"]
        );
        assert_eq!(report.main.len(), 2);
        assert_eq!(report.cleanup.len(), 1);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_b_failure_stops_main_but_runs_cleanup() {
        let runner = ScriptedRunner::new();
        let steps = vec![
            create_namespace("ns-b"),
            cmd("Fail", "exit 1"),
            cmd("Unreachable", "echo unreachable"),
            delete_namespace("ns-b"),
        ];

        let report = run(&runner, &steps, RunOptions::new()).await;

        assert_eq!(
            report.verdict,
            Verdict::Failed {
                step: "Fail".to_string(),
                reason: FailureReason::NonZeroExit { code: Some(1) },
            }
        );
        assert_eq!(
            runner.calls(),
            vec!["CreateTestNamespace/ns-b", "Fail", "DeleteTestNamespace/ns-b"]
        );
    }

    #[tokio::test]
    async fn test_scenario_c_pattern_mismatch_with_zero_exit() {
        let runner = ScriptedRunner::new();
        let steps = vec![Step::from(
            Command::new("CheckFoo", "echo bar").expect_regex("foo").unwrap(),
        )];

        let report = run(&runner, &steps, RunOptions::new()).await;

        assert!(matches!(
            &report.verdict,
            Verdict::Failed { step, reason: FailureReason::PatternMismatch { .. } } if step == "CheckFoo"
        ));
        assert_eq!(report.main[0].exit_code, Some(0));
        assert!(report.render_failure().contains("bar"));
    }

    #[tokio::test]
    async fn test_scenario_d_hook_runs_once_between_phases_and_cannot_flip_verdict() {
        let runner = ScriptedRunner::new();
        let calls_at_hook = Arc::new(Mutex::new(Vec::new()));
        let invocations = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&calls_at_hook);
        let count = Arc::clone(&invocations);
        let probe = runner.clone();
        let hook = FnHook::new("post-mortem", move |ctx: &HookContext<'_>| {
            count.fetch_add(1, Ordering::SeqCst);
            *seen.lock().unwrap() = probe.calls();
            assert_eq!(ctx.namespaces, ["ns-d".to_string()]);
            assert!(!ctx.verdict.is_passed());
            Err(Error::hook("post-mortem", "kubectl unreachable"))
        });

        let steps = vec![
            create_namespace("ns-d"),
            cmd("Fail", "exit 2"),
            clean("Cleanup1", "echo c1"),
            delete_namespace("ns-d"),
        ];
        let report = run(
            &runner,
            &steps,
            RunOptions::new().with_hook_before_cleanup(hook),
        )
        .await;

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(
            *calls_at_hook.lock().unwrap(),
            vec!["CreateTestNamespace/ns-d", "Fail"]
        );
        assert_eq!(report.verdict.step(), Some("Fail"));
        assert!(report.warnings.iter().any(|w| w.contains("post-mortem")));
        assert_eq!(report.cleanup.len(), 2);
    }

    #[tokio::test]
    async fn test_hook_failure_does_not_fail_passing_run() {
        let runner = ScriptedRunner::new();
        let hook = FnHook::new("broken", |_ctx: &HookContext<'_>| {
            Err(Error::hook("broken", "boom"))
        });
        let report = run(
            &runner,
            &[cmd("Ok", "echo ok")],
            RunOptions::new().with_hook_before_cleanup(hook),
        )
        .await;
        assert!(report.passed());
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_hook_output_is_kept_as_diagnostic() {
        let runner = ScriptedRunner::new();
        let hook = FnHook::new("dump", |ctx: &HookContext<'_>| {
            Ok(format!("{} namespaces", ctx.namespaces.len()))
        });
        let report = run(
            &runner,
            &[create_namespace("ns-x"), delete_namespace("ns-x")],
            RunOptions::new()
                .with_namespace("shared-extra")
                .with_hook_before_cleanup(hook),
        )
        .await;
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].output, "2 namespaces");
    }

    #[tokio::test]
    async fn test_failing_cleanup_is_warning_and_does_not_stop_cleanup() {
        // Deleting a namespace that is already gone fails; the rest still runs
        let runner = ScriptedRunner::new().respond(
            "delete ns-gone",
            Scripted::Output {
                code: 1,
                stdout: String::new(),
                stderr: "Error from server (NotFound): namespaces \"ns-gone\" not found\n"
                    .to_string(),
            },
        );
        let steps = vec![
            cmd("Work", "echo work"),
            delete_namespace("ns-gone"),
            clean("AfterDelete", "echo still running"),
        ];

        let report = run(&runner, &steps, RunOptions::new()).await;

        assert!(report.passed());
        assert_eq!(
            runner.calls(),
            vec!["Work", "DeleteTestNamespace/ns-gone", "AfterDelete"]
        );
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("DeleteTestNamespace/ns-gone"));
    }

    #[tokio::test]
    async fn test_cleanup_steps_keep_authored_order_when_interleaved() {
        let runner = ScriptedRunner::new();
        let steps = vec![
            clean("C1", "echo c1"),
            cmd("M1", "echo m1"),
            clean("C2", "echo c2"),
            cmd("M2", "echo m2"),
        ];
        run(&runner, &steps, RunOptions::new()).await;
        assert_eq!(runner.calls(), vec!["M1", "M2", "C1", "C2"]);
    }

    #[tokio::test]
    async fn test_failure_at_every_position_keeps_the_contract() {
        for k in 0..4 {
            let mut runner = ScriptedRunner::new();
            let mut steps = Vec::new();
            for i in 0..4 {
                let script = format!("main {}", i);
                if i == k {
                    runner = runner.respond(&script, Scripted::exit(1));
                }
                steps.push(cmd(&format!("M{}", i), &script));
            }
            steps.push(clean("C0", "clean 0"));
            steps.push(clean("C1", "clean 1"));

            let report = run(&runner, &steps, RunOptions::new()).await;

            let mut expected: Vec<String> = (0..=k).map(|i| format!("M{}", i)).collect();
            expected.push("C0".to_string());
            expected.push("C1".to_string());
            assert_eq!(runner.calls(), expected, "failure at main step {}", k);
            assert_eq!(report.verdict.step(), Some(format!("M{}", k).as_str()));
        }
    }

    #[tokio::test]
    async fn test_spawn_error_is_errored_not_failed() {
        let runner = ScriptedRunner::new().respond("kubectl-gadget version", Scripted::SpawnError);
        let steps = vec![
            cmd("Version", "kubectl-gadget version"),
            cmd("Next", "echo next"),
            clean("Cleanup", "echo cleanup"),
        ];

        let report = run(&runner, &steps, RunOptions::new()).await;

        assert!(matches!(&report.verdict, Verdict::Errored { step, .. } if step == "Version"));
        assert_eq!(runner.calls(), vec!["Version", "Cleanup"]);
    }

    #[tokio::test]
    async fn test_unmet_precondition_skips_everything() {
        let runner = ScriptedRunner::new();
        let hook_ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hook_ran);
        let hook = FnHook::new("never", move |_ctx: &HookContext<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(String::new())
        });
        let steps = vec![
            create_namespace("ns-s"),
            cmd("Work", "echo work"),
            delete_namespace("ns-s"),
        ];
        let options = RunOptions::new()
            .with_precondition(Precondition::Component {
                required: "kubectl-gadget".to_string(),
                actual: Some("ig".to_string()),
            })
            .with_hook_before_cleanup(hook);

        let report = run(&runner, &steps, options).await;

        assert!(report.verdict.is_skipped());
        assert!(runner.calls().is_empty());
        assert_eq!(hook_ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_precondition_reasons() {
        let ctx = StepContext::default().with_var("PRESENT", "yes");
        assert!(Precondition::EnvVar("PRESENT".into()).unmet_reason(&ctx).is_none());
        assert!(Precondition::EnvVar("STEPWISE_ABSENT_VAR".into())
            .unmet_reason(&ctx)
            .is_some());
        assert!(Precondition::Tool("stepwise-no-such-tool-xyz".into())
            .unmet_reason(&ctx)
            .is_some());
        assert!(Precondition::Component {
            required: "ig".into(),
            actual: Some("ig".into())
        }
        .unmet_reason(&ctx)
        .is_none());
        assert!(Precondition::Check {
            description: "needs arm64".into(),
            satisfied: false
        }
        .unmet_reason(&ctx)
        .is_some());
    }

    #[tokio::test]
    async fn test_invalid_sequence_runs_nothing() {
        let runner = ScriptedRunner::new();
        let steps = vec![cmd("Same", "echo 1"), cmd("Same", "echo 2")];
        let mut reporter = TextReporter::buffered(false);
        let err = orchestrator(&runner)
            .run("dup", &steps, RunOptions::new(), &mut reporter)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSequence(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_main_and_still_cleans_up() {
        let runner = ScriptedRunner::new().respond("watch forever", Scripted::Hang);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let steps = vec![
            create_namespace("ns-c"),
            cmd("Watch", "watch forever"),
            cmd("Never", "echo never"),
            delete_namespace("ns-c"),
        ];
        let report = run(&runner, &steps, RunOptions::new().with_cancellation(cancel)).await;

        assert_eq!(
            report.verdict,
            Verdict::Cancelled {
                step: Some("Watch".to_string())
            }
        );
        assert_eq!(
            runner.calls(),
            vec!["CreateTestNamespace/ns-c", "Watch", "DeleteTestNamespace/ns-c"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let runner = ScriptedRunner::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let counter = hook_calls.clone();
        let hook = FnHook::new("count", move |_ctx: &HookContext<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("looked".to_string())
        });
        let steps = vec![
            create_namespace("ns-x"),
            cmd("Main", "echo main"),
            delete_namespace("ns-x"),
        ];

        let options = RunOptions::new()
            .with_cancellation(cancel)
            .with_hook_before_cleanup(hook)
            .with_hook_before_cleanup(LogDumpHook::new(vec!["dump {namespace}".to_string()]));
        let report = run(&runner, &steps, options).await;

        assert_eq!(report.verdict, Verdict::Cancelled { step: None });
        assert!(runner.calls().is_empty(), "{:?}", runner.calls());
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
        assert!(report.cleanup.is_empty());
        assert!(report.diagnostics.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_test_steps_registers_configured_log_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"[namespace]
create_template = "echo create {namespace}"
delete_template = "echo delete {namespace}"

[diagnostics]
commands = ["echo dump {namespace}"]
"#,
        )
        .unwrap();
        std::env::set_var(crate::common::paths::CONFIG_ENV, &path);

        let steps = vec![
            create_namespace("ns-cfg"),
            cmd("Fail", "exit 3"),
            delete_namespace("ns-cfg"),
        ];
        let report = run_test_steps("configured", &steps, RunOptions::new()).await;
        std::env::remove_var(crate::common::paths::CONFIG_ENV);
        let report = report.unwrap();

        assert!(matches!(&report.verdict, Verdict::Failed { step, .. } if step == "Fail"));
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].hook, "log-dump");
        assert!(report.diagnostics[0].output.contains("dump ns-cfg"));
        assert_eq!(report.cleanup.len(), 1);
        assert!(report.cleanup[0].stdout.contains("delete ns-cfg"));
    }

    #[tokio::test]
    async fn test_panicking_hook_does_not_prevent_cleanup() {
        let runner = ScriptedRunner::new().respond("exit 1", Scripted::exit(1));
        let hook = FnHook::new("buggy", |_ctx: &HookContext<'_>| -> Result<String> {
            panic!("hook blew up")
        });
        let steps = vec![
            create_namespace("ns-p"),
            cmd("Fail", "exit 1"),
            delete_namespace("ns-p"),
        ];

        let report = run(&runner, &steps, RunOptions::new().with_hook_before_cleanup(hook)).await;

        assert!(matches!(&report.verdict, Verdict::Failed { step, .. } if step == "Fail"));
        assert_eq!(
            runner.calls(),
            vec!["CreateTestNamespace/ns-p", "Fail", "DeleteTestNamespace/ns-p"]
        );
        assert!(
            report.warnings.iter().any(|w| w.contains("'buggy'") && w.contains("panicked: hook blew up")),
            "{:?}",
            report.warnings
        );
    }

    #[tokio::test]
    async fn test_background_command_is_validated_at_end_of_main_phase() {
        let runner = ScriptedRunner::new().respond(
            "trace exec",
            Scripted::stdout(0, "PID COMM\n101 sleep-target\n"),
        );
        let steps = vec![
            Step::from(
                Command::new("TraceExec", "trace exec")
                    .background()
                    .expect_regex("sleep-target")
                    .unwrap(),
            ),
            cmd("RunTarget", "echo run"),
            clean("Clean", "echo clean"),
        ];

        let report = run(&runner, &steps, RunOptions::new()).await;

        assert!(report.passed(), "{}", report.render_failure());
        assert_eq!(runner.calls(), vec!["TraceExec", "RunTarget", "Clean"]);
        let names: Vec<&str> = report.main.iter().map(|r| r.step.as_str()).collect();
        assert_eq!(names, vec!["RunTarget", "TraceExec"]);
    }

    #[tokio::test]
    async fn test_background_mismatch_fails_the_run() {
        let runner = ScriptedRunner::new().respond("trace exec", Scripted::stdout(0, "nothing\n"));
        let steps = vec![
            Step::from(
                Command::new("TraceExec", "trace exec")
                    .background()
                    .expect_regex("sleep-target")
                    .unwrap(),
            ),
            cmd("RunTarget", "echo run"),
        ];

        let report = run(&runner, &steps, RunOptions::new()).await;
        assert_eq!(report.verdict.step(), Some("TraceExec"));
    }

    #[tokio::test]
    async fn test_background_is_stopped_when_a_later_step_fails() {
        let runner = ScriptedRunner::new().respond("trace exec", Scripted::stdout(0, "nothing\n"));
        let steps = vec![
            Step::from(
                Command::new("TraceExec", "trace exec")
                    .background()
                    .expect_regex("sleep-target")
                    .unwrap(),
            ),
            cmd("Boom", "exit 3"),
        ];

        let report = run(&runner, &steps, RunOptions::new()).await;
        // First failure wins attribution
        assert_eq!(report.verdict.step(), Some("Boom"));
        assert_eq!(report.main.len(), 2);
    }

    #[tokio::test]
    async fn test_placeholders_resolve_from_context() {
        let runner = ScriptedRunner::new();
        let mut ctx = context();
        ctx.env.insert("KUBECTL_GADGET".into(), "/opt/kubectl-gadget".into());
        let orchestrator = Orchestrator::with_runner(Arc::new(runner.clone()), ctx);
        let mut reporter = TextReporter::buffered(false);

        orchestrator
            .run(
                "env",
                &[cmd("Start", "$KUBECTL_GADGET traceloop start")],
                RunOptions::new(),
                &mut reporter,
            )
            .await
            .unwrap();

        assert_eq!(runner.scripts(), vec!["/opt/kubectl-gadget traceloop start"]);
    }
}
