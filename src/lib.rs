//! stepwise - declarative end-to-end test orchestrator
//!
//! Test cases are ordered lists of steps: shell commands with expectations
//! on their output, and namespace lifecycle helpers. The orchestrator runs
//! the main steps until one fails, gives diagnostic hooks a look at the
//! environment, then runs every cleanup step.

pub mod cli;
pub mod commands;
pub mod common;
pub mod hooks;
pub mod naming;
pub mod orchestrator;
pub mod process;
pub mod report;
pub mod scenario;
pub mod step;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use hooks::{DiagnosticHook, FnHook, HookContext, HookRegistry, LogDumpHook};
pub use orchestrator::{run_test_steps, Orchestrator, Precondition, RunOptions};
pub use report::{Reporter, SequenceReport, TextReporter, Verdict};
pub use step::{create_namespace, delete_namespace, sleep_for, Command, Step, StepContext};
