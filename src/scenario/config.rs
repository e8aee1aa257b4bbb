//! Scenario file types
//!
//! Defines the data structures for deserializing YAML test scenarios.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::step::MatchOn;

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct ScenarioFile {
    /// Name of the test case
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Whether the scenario may run concurrently with other parallel ones
    #[serde(default)]
    pub parallel: bool,
    /// Label of the namespace generated for this scenario, exported to
    /// every command as `$NAMESPACE`
    pub namespace: Option<String>,
    /// Extra variables; values may reference `$NAMESPACE`
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Preconditions; the scenario is skipped when one is unmet
    #[serde(default)]
    pub requires: Requirements,
    /// Overrides the configured diagnostics
    pub diagnostics: Option<DiagnosticsOverride>,
    /// The ordered steps of the test case
    pub steps: Vec<ScenarioStep>,
}

/// Preconditions of a scenario
#[derive(Deserialize, Debug, Default)]
pub struct Requirements {
    /// Executables that must be on PATH
    #[serde(default)]
    pub tools: Vec<String>,
    /// Variables that must be set
    #[serde(default)]
    pub env: Vec<String>,
    /// Component under test the scenario is written for
    pub component: Option<String>,
}

/// Per-scenario diagnostics settings
#[derive(Deserialize, Debug)]
pub struct DiagnosticsOverride {
    /// Set to false to disable diagnostics for this scenario
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Replaces the configured command templates
    pub commands: Option<Vec<String>>,
    pub only_on_failure: Option<bool>,
}

fn default_enabled() -> bool {
    true
}

/// A single step of a scenario
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Run shell text
    Command {
        /// Unique step name
        name: String,
        /// Shell text, `$VAR` placeholders are expanded
        run: String,
        /// Optional expectation on the captured output
        expect: Option<OutputExpectation>,
        /// Run in the cleanup phase
        #[serde(default)]
        cleanup: bool,
        /// Keep running while later steps run (trace-style commands)
        #[serde(default)]
        background: bool,
        /// Timeout in seconds
        timeout: Option<u64>,
    },
    /// Create a namespace, the scenario's one by default
    CreateNamespace { namespace: Option<String> },
    /// Delete a namespace in the cleanup phase, the scenario's one by default
    DeleteNamespace { namespace: Option<String> },
    /// Wait before the next step
    Sleep {
        seconds: u64,
        /// Needed when the same duration is slept more than once
        name: Option<String>,
    },
}

/// Expectations for a command's output
#[derive(Deserialize, Debug)]
pub struct OutputExpectation {
    /// Regular expression that must match
    pub matches: Option<String>,
    /// Exact expected output
    pub equals: Option<String>,
    /// Stream the expectation is checked against
    pub stream: Option<MatchOn>,
}
