//! Reporting surface
//!
//! A sequence ends in one [`Verdict`] plus the ordered per-step log. The
//! [`Reporter`] trait is how that reaches whatever shows test results;
//! [`TextReporter`] prints it for humans, either straight to stdout or into
//! a buffer so parallel test cases do not interleave.

use std::fmt;
use std::time::Duration;

use colored::Colorize;
use serde::Serialize;

use crate::common::truncate_for_log;
use crate::step::{serialize_millis, ExecutionResult, FailureReason, StepStatus};

/// Aggregate outcome of a sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    /// A main step ran and did not meet its expectation
    Failed { step: String, reason: FailureReason },
    /// A main step could not be run at all
    Errored { step: String, message: String },
    /// The run was cancelled during the main phase
    Cancelled { step: Option<String> },
    /// A precondition was not met; nothing was executed
    Skipped { reason: String },
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Verdict::Skipped { .. })
    }

    /// Step the verdict is attributed to
    pub fn step(&self) -> Option<&str> {
        match self {
            Verdict::Failed { step, .. } | Verdict::Errored { step, .. } => Some(step),
            Verdict::Cancelled { step } => step.as_deref(),
            Verdict::Passed | Verdict::Skipped { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Failed { .. } => "failed",
            Verdict::Errored { .. } => "errored",
            Verdict::Cancelled { .. } => "cancelled",
            Verdict::Skipped { .. } => "skipped",
        }
    }

    /// Verdict implied by a main-phase step result, `None` when it passed
    pub fn from_result(result: &ExecutionResult) -> Option<Self> {
        match &result.status {
            StepStatus::Passed => None,
            StepStatus::Failed(reason) => Some(Verdict::Failed {
                step: result.step.clone(),
                reason: reason.clone(),
            }),
            StepStatus::Errored(message) => Some(Verdict::Errored {
                step: result.step.clone(),
                message: message.clone(),
            }),
            StepStatus::Cancelled => Some(Verdict::Cancelled {
                step: Some(result.step.clone()),
            }),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => write!(f, "passed"),
            Verdict::Failed { step, reason } => write!(f, "step '{}' failed: {}", step, reason),
            Verdict::Errored { step, message } => {
                write!(f, "step '{}' could not be run: {}", step, message)
            }
            Verdict::Cancelled { step: Some(step) } => {
                write!(f, "cancelled while running '{}'", step)
            }
            Verdict::Cancelled { step: None } => write!(f, "cancelled"),
            Verdict::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// Text captured by a diagnostic hook
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub hook: String,
    pub output: String,
}

/// Everything known about one executed sequence
#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
    pub name: String,
    #[serde(flatten)]
    pub verdict: Verdict,
    pub namespaces: Vec<String>,
    /// Main-phase results in execution order
    pub main: Vec<ExecutionResult>,
    /// Cleanup-phase results in execution order
    pub cleanup: Vec<ExecutionResult>,
    pub diagnostics: Vec<Diagnostic>,
    /// Cleanup and hook failures; they never change the verdict
    pub warnings: Vec<String>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl SequenceReport {
    /// Report for a sequence whose precondition was not met
    pub fn skipped(name: &str, reason: String, namespaces: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            verdict: Verdict::Skipped { reason },
            namespaces,
            main: Vec::new(),
            cleanup: Vec::new(),
            diagnostics: Vec::new(),
            warnings: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict.is_passed()
    }

    /// Names of every executed step, main phase first
    pub fn executed_steps(&self) -> Vec<&str> {
        self.main
            .iter()
            .chain(self.cleanup.iter())
            .map(|r| r.step.as_str())
            .collect()
    }

    /// Result of the step the verdict is attributed to
    pub fn failed_result(&self) -> Option<&ExecutionResult> {
        let step = self.verdict.step()?;
        self.main.iter().rev().find(|r| r.step == step)
    }

    /// Human-readable explanation of a non-passing verdict
    ///
    /// Shows the step, what it expected and what it actually printed, so a
    /// textual assertion can be debugged without re-running it by hand.
    pub fn render_failure(&self) -> String {
        let mut out = format!("{}: {}\n", self.name, self.verdict);

        if let Some(result) = self.failed_result() {
            out.push_str(&format!("  command:   {}\n", result.command));
            if let Some(expectation) = &result.expectation {
                out.push_str(&format!("  expected:  {}\n", expectation));
            }
            match result.exit_code {
                Some(code) => out.push_str(&format!("  exit code: {}\n", code)),
                None => out.push_str("  exit code: none\n"),
            }
            out.push_str(&format!("  stdout:\n{}", indent_block(&result.stdout)));
            out.push_str(&format!("  stderr:\n{}", indent_block(&result.stderr)));
        }

        for warning in &self.warnings {
            out.push_str(&format!("  warning: {}\n", warning));
        }
        out
    }

    /// Panic with the rendered failure unless the sequence passed or was
    /// skipped; meant for use inside `#[test]` functions
    pub fn assert_passed(&self) {
        if !self.passed() && !self.verdict.is_skipped() {
            panic!("{}", self.render_failure());
        }
    }
}

fn indent_block(text: &str) -> String {
    if text.trim().is_empty() {
        return "    (empty)\n".to_string();
    }
    let mut out = String::new();
    for line in text.lines() {
        out.push_str("    ");
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Receives progress and the final report of a sequence
pub trait Reporter: Send {
    /// A sequence is about to run
    fn start(&mut self, _name: &str) {}

    /// A step finished, in either phase
    fn step_finished(&mut self, result: &ExecutionResult);

    /// Free-form log text (diagnostics, background starts)
    fn log(&mut self, line: &str);

    /// The sequence is done
    fn finish(&mut self, report: &SequenceReport);
}

enum Sink {
    Stdout,
    Buffer(Vec<String>),
}

/// Coloured line-oriented reporter
pub struct TextReporter {
    verbose: bool,
    sink: Sink,
}

impl TextReporter {
    /// Print lines as they happen
    pub fn stdout(verbose: bool) -> Self {
        Self {
            verbose,
            sink: Sink::Stdout,
        }
    }

    /// Keep lines until [`TextReporter::into_lines`]
    pub fn buffered(verbose: bool) -> Self {
        Self {
            verbose,
            sink: Sink::Buffer(Vec::new()),
        }
    }

    pub fn into_lines(self) -> Vec<String> {
        match self.sink {
            Sink::Stdout => Vec::new(),
            Sink::Buffer(lines) => lines,
        }
    }

    fn emit(&mut self, line: String) {
        match &mut self.sink {
            Sink::Stdout => println!("{}", line),
            Sink::Buffer(lines) => lines.push(line),
        }
    }
}

impl Reporter for TextReporter {
    fn start(&mut self, name: &str) {
        self.emit(format!(
            "\n{} {}",
            "Running Test:".blue().bold(),
            name.white().bold()
        ));
    }

    fn step_finished(&mut self, result: &ExecutionResult) {
        let elapsed = format!("({:.1}s)", result.elapsed.as_secs_f64());
        let line = match &result.status {
            StepStatus::Passed => format!(
                "  {} [{}] {} {}",
                "✓".green(),
                result.phase,
                result.step,
                elapsed.dimmed()
            ),
            StepStatus::Failed(reason) => format!(
                "  {} [{}] {}: {}",
                "✗".red(),
                result.phase,
                result.step,
                reason
            ),
            StepStatus::Errored(message) => format!(
                "  {} [{}] {}: {}",
                "!".red().bold(),
                result.phase,
                result.step,
                message
            ),
            StepStatus::Cancelled => format!(
                "  {} [{}] {}: cancelled",
                "-".yellow(),
                result.phase,
                result.step
            ),
        };
        self.emit(line);

        if self.verbose {
            self.emit(format!("      $ {}", result.command.dimmed()));
            if !result.stdout.trim().is_empty() {
                self.emit(format!("      stdout: {}", truncate_for_log(&result.stdout, 400)));
            }
            if !result.stderr.trim().is_empty() {
                self.emit(format!("      stderr: {}", truncate_for_log(&result.stderr, 400)));
            }
        }
    }

    fn log(&mut self, line: &str) {
        for l in line.lines() {
            self.emit(format!("  {}", l.dimmed()));
        }
    }

    fn finish(&mut self, report: &SequenceReport) {
        match &report.verdict {
            Verdict::Passed => {
                for warning in &report.warnings {
                    self.emit(format!("  {} {}", "warning:".yellow(), warning));
                }
                self.emit(format!(
                    "{} {}",
                    "✓".green().bold(),
                    "Test Passed".green().bold()
                ));
            }
            Verdict::Skipped { reason } => {
                self.emit(format!(
                    "{} {} ({})",
                    "-".yellow().bold(),
                    "Test Skipped".yellow().bold(),
                    reason
                ));
            }
            _ => {
                for line in report.render_failure().lines() {
                    self.emit(format!("  {}", line));
                }
                self.emit(format!("{} {}", "✗".red().bold(), "Test Failed".red().bold()));
            }
        }
    }
}
