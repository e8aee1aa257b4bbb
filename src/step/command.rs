//! Command steps
//!
//! A command is one shell invocation plus an optional expectation on its
//! output. Output shape is a pass criterion of its own: a command whose
//! expectation does not match fails even when it exits with 0.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ExecutionResult, FailureReason, Phase, StepContext, StepStatus};
use crate::common::{Error, Result};
use crate::process::{Invocation, ProcessOutput, ProcessRunner, RunningProcess};

/// Which captured stream expectations are checked against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOn {
    /// stdout immediately followed by stderr
    #[default]
    Combined,
    Stdout,
    Stderr,
}

impl MatchOn {
    pub fn select<'a>(&self, stdout: &'a str, stderr: &'a str) -> Cow<'a, str> {
        match self {
            MatchOn::Combined if stderr.is_empty() => Cow::Borrowed(stdout),
            MatchOn::Combined if stdout.is_empty() => Cow::Borrowed(stderr),
            MatchOn::Combined => Cow::Owned(format!("{}{}", stdout, stderr)),
            MatchOn::Stdout => Cow::Borrowed(stdout),
            MatchOn::Stderr => Cow::Borrowed(stderr),
        }
    }
}

/// What the captured output must look like
#[derive(Debug, Clone)]
pub enum Expectation {
    /// Regular expression that must match somewhere in the output
    Pattern(Regex),
    /// Output must be exactly this string
    Exact(String),
}

impl Expectation {
    pub fn matches(&self, output: &str) -> bool {
        match self {
            Expectation::Pattern(re) => re.is_match(output),
            Expectation::Exact(expected) => output == expected,
        }
    }

    fn failure(&self) -> FailureReason {
        match self {
            Expectation::Pattern(re) => FailureReason::PatternMismatch {
                pattern: re.as_str().to_string(),
            },
            Expectation::Exact(expected) => FailureReason::ExactMismatch {
                expected: expected.clone(),
            },
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Pattern(re) => write!(f, "output matching /{}/", re.as_str()),
            Expectation::Exact(expected) => write!(f, "output equal to {:?}", expected),
        }
    }
}

/// A single external command-line invocation
#[derive(Debug, Clone)]
pub struct Command {
    /// Unique name within the sequence, used in logs and failure reports
    pub name: String,
    /// Shell text; `$VAR` placeholders are expanded before spawning
    pub shell_text: String,
    pub expectation: Option<Expectation>,
    /// Overrides the context's stream selection
    pub match_on: Option<MatchOn>,
    /// Runs in the cleanup phase
    pub cleanup: bool,
    /// Started and left running; stopped and validated at the end of the
    /// main phase
    pub background: bool,
    /// Overrides the context's default timeout
    pub timeout: Option<Duration>,
}

impl Command {
    pub fn new(name: impl Into<String>, shell_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shell_text: shell_text.into(),
            expectation: None,
            match_on: None,
            cleanup: false,
            background: false,
            timeout: None,
        }
    }

    /// Require the output to match a regular expression
    pub fn expect_regex(mut self, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| Error::invalid_pattern(&self.name, pattern, e))?;
        self.expectation = Some(Expectation::Pattern(re));
        Ok(self)
    }

    /// Require the output to be exactly `expected`
    pub fn expect_exact(mut self, expected: impl Into<String>) -> Self {
        self.expectation = Some(Expectation::Exact(expected.into()));
        self
    }

    pub fn match_on(mut self, match_on: MatchOn) -> Self {
        self.match_on = Some(match_on);
        self
    }

    pub fn cleanup(mut self) -> Self {
        self.cleanup = true;
        self
    }

    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn phase(&self) -> Phase {
        if self.cleanup {
            Phase::Cleanup
        } else {
            Phase::Main
        }
    }

    /// Resolve placeholders and settings against the context
    pub fn invocation(&self, ctx: &StepContext) -> Invocation {
        Invocation {
            step: self.name.clone(),
            shell: ctx.shell.clone(),
            script: ctx.expand(&self.shell_text),
            env: ctx.env.clone(),
            timeout: self.timeout.or(ctx.default_timeout),
        }
    }

    /// Run to completion and judge the output
    ///
    /// `Err` only when the process could not be run at all.
    pub async fn execute(
        &self,
        ctx: &StepContext,
        runner: &dyn ProcessRunner,
    ) -> Result<ExecutionResult> {
        let invocation = self.invocation(ctx);
        let output = runner.run(&invocation).await?;
        Ok(self.judge(ctx, invocation.script, output))
    }

    /// Start in the background
    pub async fn start(
        &self,
        ctx: &StepContext,
        runner: &dyn ProcessRunner,
    ) -> Result<BackgroundCommand> {
        let invocation = self.invocation(ctx);
        let process = runner.start(&invocation).await?;
        Ok(BackgroundCommand {
            command: self.clone(),
            script: invocation.script,
            process,
        })
    }

    /// Turn captured output into a verdict for this step
    pub fn judge(&self, ctx: &StepContext, script: String, output: ProcessOutput) -> ExecutionResult {
        let status = self.status_for(ctx, &output);
        ExecutionResult {
            step: self.name.clone(),
            phase: self.phase(),
            command: script,
            expectation: self.expectation.as_ref().map(ToString::to_string),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed: output.elapsed,
            status,
        }
    }

    fn status_for(&self, ctx: &StepContext, output: &ProcessOutput) -> StepStatus {
        if output.timed_out {
            let after = self.timeout.or(ctx.default_timeout).unwrap_or(output.elapsed);
            return StepStatus::Failed(FailureReason::TimedOut {
                after_ms: after.as_millis() as u64,
            });
        }

        // A background command we stopped ourselves has no exit code to judge
        if !output.stopped && output.exit_code != Some(0) {
            return StepStatus::Failed(FailureReason::NonZeroExit {
                code: output.exit_code,
            });
        }

        if let Some(expectation) = &self.expectation {
            let selected = self
                .match_on
                .unwrap_or(ctx.match_on)
                .select(&output.stdout, &output.stderr);
            if !expectation.matches(&selected) {
                return StepStatus::Failed(expectation.failure());
            }
        }

        StepStatus::Passed
    }
}

/// A command that is still running
pub struct BackgroundCommand {
    command: Command,
    script: String,
    process: Box<dyn RunningProcess>,
}

impl BackgroundCommand {
    pub fn name(&self) -> &str {
        &self.command.name
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    /// Stop the process and judge everything it printed
    pub async fn stop(self, ctx: &StepContext) -> Result<ExecutionResult> {
        let output = self.process.stop().await?;
        Ok(self.command.judge(ctx, self.script, output))
    }
}

/// Sleep as a step, for commands whose effects take a while to show up
pub fn sleep_for(seconds: u64) -> Command {
    Command::new(format!("SleepFor{}Seconds", seconds), format!("sleep {}", seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::scripted::{Scripted, ScriptedRunner};

    fn output(code: Option<i32>, stdout: &str, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_expectation_uses_exit_code() {
        let ctx = StepContext::default();
        let cmd = Command::new("Plain", "true");

        let ok = cmd.judge(&ctx, "true".into(), output(Some(0), "", ""));
        assert!(ok.passed());

        let failed = cmd.judge(&ctx, "false".into(), output(Some(1), "", ""));
        assert!(matches!(
            failed.status,
            StepStatus::Failed(FailureReason::NonZeroExit { code: Some(1) })
        ));
    }

    #[test]
    fn test_pattern_mismatch_fails_despite_zero_exit() {
        let ctx = StepContext::default();
        let cmd = Command::new("CheckFoo", "echo bar").expect_regex("foo").unwrap();

        let result = cmd.judge(&ctx, "echo bar".into(), output(Some(0), "bar\n", ""));
        match &result.status {
            StepStatus::Failed(FailureReason::PatternMismatch { pattern }) => {
                assert_eq!(pattern, "foo")
            }
            other => panic!("expected pattern mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_pattern_searches_combined_output() {
        let ctx = StepContext::default();
        let cmd = Command::new("CheckTraceloopShow", "x")
            .expect_regex(r#"bc\s+write\s+fd=\d+,\s+buf="42"#)
            .unwrap();

        let result = cmd.judge(
            &ctx,
            "x".into(),
            output(Some(0), "header\n", "bc   write fd=3, buf=\"42\\n\"\n"),
        );
        assert!(result.passed());
    }

    #[test]
    fn test_match_on_stdout_ignores_stderr() {
        let ctx = StepContext::default();
        let cmd = Command::new("Quiet", "x")
            .expect_regex("warning")
            .unwrap()
            .match_on(MatchOn::Stdout);

        let result = cmd.judge(&ctx, "x".into(), output(Some(0), "ok\n", "warning\n"));
        assert!(!result.passed());
    }

    #[test]
    fn test_exact_expectation() {
        let ctx = StepContext::default();
        let cmd = Command::new("Exact", "echo hi").expect_exact("hi\n");
        assert!(cmd.judge(&ctx, "".into(), output(Some(0), "hi\n", "")).passed());
        assert!(!cmd.judge(&ctx, "".into(), output(Some(0), "hi there\n", "")).passed());
    }

    #[test]
    fn test_invalid_regex_is_rejected_up_front() {
        let err = Command::new("Broken", "true").expect_regex("(unclosed").unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn test_timeout_is_a_failure() {
        let ctx = StepContext::default();
        let cmd = Command::new("Slow", "sleep 10").with_timeout(Duration::from_secs(1));
        let mut out = output(None, "", "");
        out.timed_out = true;

        let result = cmd.judge(&ctx, "sleep 10".into(), out);
        assert!(matches!(
            result.status,
            StepStatus::Failed(FailureReason::TimedOut { after_ms: 1000 })
        ));
    }

    #[test]
    fn test_stopped_background_output_is_judged_without_exit_code() {
        let ctx = StepContext::default();
        let cmd = Command::new("Trace", "trace exec")
            .background()
            .expect_regex("sleep")
            .unwrap();
        let mut out = output(None, "PID COMM\n42 sleep\n", "");
        out.stopped = true;
        assert!(cmd.judge(&ctx, "".into(), out).passed());
    }

    #[test]
    fn test_invocation_expands_context_variables() {
        let ctx = StepContext::default().with_var("NAMESPACE", "demo-1");
        let cmd = Command::new("Run", "kubectl get pods -n $NAMESPACE");
        let inv = cmd.invocation(&ctx);
        assert_eq!(inv.script, "kubectl get pods -n demo-1");
        assert_eq!(inv.timeout, ctx.default_timeout);
    }

    #[test]
    fn test_sleep_helper() {
        let cmd = sleep_for(15);
        assert_eq!(cmd.name, "SleepFor15Seconds");
        assert_eq!(cmd.shell_text, "sleep 15");
    }

    #[tokio::test]
    async fn test_execute_propagates_spawn_errors() {
        let runner = ScriptedRunner::new().respond("kubectl version", Scripted::SpawnError);
        let ctx = StepContext::default();
        let err = Command::new("Version", "kubectl version")
            .execute(&ctx, &runner)
            .await
            .unwrap_err();
        assert!(err.is_spawn());
    }
}
