//! Configuration file handling

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;
use crate::hooks::LogDumpHook;
use crate::step::{MatchOn, NamespaceTemplates, StepContext};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Default settings for every step
    #[serde(default)]
    pub defaults: Defaults,

    /// Variables made available to every command, e.g. the path of the
    /// CLI under test
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Namespace lifecycle templates
    #[serde(default)]
    pub namespace: NamespaceConfig,

    /// Post-mortem diagnostics
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Scheduling of multiple scenarios
    #[serde(default)]
    pub run: RunConfig,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Shell used to run command text (`<shell> -c <text>`)
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Per-step timeout in seconds, 0 disables it
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Which captured stream expectations are matched against
    #[serde(default)]
    pub match_on: MatchOn,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            step_timeout_secs: default_step_timeout(),
            match_on: MatchOn::default(),
        }
    }
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}
fn default_step_timeout() -> u64 {
    300
}

/// Namespace lifecycle templates, `{namespace}` is substituted
#[derive(Debug, Deserialize)]
pub struct NamespaceConfig {
    #[serde(default = "default_create_template")]
    pub create_template: String,

    #[serde(default = "default_delete_template")]
    pub delete_template: String,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            create_template: default_create_template(),
            delete_template: default_delete_template(),
        }
    }
}

fn default_create_template() -> String {
    NamespaceTemplates::default().create
}
fn default_delete_template() -> String {
    NamespaceTemplates::default().delete
}

/// Diagnostics dumped before cleanup
#[derive(Debug, Deserialize)]
pub struct DiagnosticsConfig {
    /// Command templates run once per namespace, `{namespace}` is substituted
    ///
    /// Templates without the placeholder run once per sequence. The defaults
    /// dump the test namespace and the logs of the gadget pods in the
    /// `gadget` namespace; override the list when the component under test
    /// lives elsewhere.
    #[serde(default = "default_diagnostic_commands")]
    pub commands: Vec<String>,

    /// Only dump when the main phase did not pass
    #[serde(default = "default_only_on_failure")]
    pub only_on_failure: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            commands: default_diagnostic_commands(),
            only_on_failure: default_only_on_failure(),
        }
    }
}

fn default_diagnostic_commands() -> Vec<String> {
    vec![
        "kubectl get events -n {namespace} --sort-by=.lastTimestamp".to_string(),
        "kubectl get pods -n {namespace} -o wide".to_string(),
        "kubectl logs -n {namespace} --all-containers --prefix --tail=100 -l run".to_string(),
        "kubectl logs -n gadget --all-containers --prefix --tail=100 -l k8s-app=gadget".to_string(),
    ]
}
fn default_only_on_failure() -> bool {
    true
}

/// Scheduling configuration
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Maximum number of parallel scenarios running at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Component under test; scenarios requiring another one are skipped
    #[serde(default)]
    pub component: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            component: None,
        }
    }
}

fn default_max_parallel() -> usize {
    4
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Step timeout, `None` when disabled
    pub fn step_timeout(&self) -> Option<Duration> {
        match self.defaults.step_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Build the execution context shared by every step of a run
    pub fn step_context(&self) -> StepContext {
        StepContext {
            shell: self.defaults.shell.clone(),
            env: self.environment.clone(),
            default_timeout: self.step_timeout(),
            match_on: self.defaults.match_on,
            namespace: NamespaceTemplates {
                create: self.namespace.create_template.clone(),
                delete: self.namespace.delete_template.clone(),
            },
        }
    }

    /// Diagnostic hook dumping the configured commands per namespace
    pub fn log_dump_hook(&self) -> LogDumpHook {
        LogDumpHook::new(self.diagnostics.commands.clone())
            .only_on_failure(self.diagnostics.only_on_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.defaults.shell, "/bin/sh");
        assert_eq!(config.step_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.run.max_parallel, 4);
        assert!(config.diagnostics.only_on_failure);
        assert!(config.namespace.create_template.contains("{namespace}"));
    }

    #[test]
    fn test_default_diagnostics_include_component_logs() {
        let config = Config::default();
        let component: Vec<&String> = config
            .diagnostics
            .commands
            .iter()
            .filter(|c| !c.contains("{namespace}"))
            .collect();
        assert_eq!(component.len(), 1);
        assert!(component[0].starts_with("kubectl logs -n gadget"));
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
[defaults]
shell = "/bin/bash"
step_timeout_secs = 0
match_on = "stdout"

[environment]
KUBECTL_GADGET = "/usr/local/bin/kubectl-gadget"

[namespace]
create_template = "mkdir /tmp/{namespace}"
delete_template = "rmdir /tmp/{namespace}"

[diagnostics]
commands = ["ls /tmp/{namespace}"]
only_on_failure = false

[run]
max_parallel = 8
component = "kubectl-gadget"
"#,
        )
        .unwrap();

        assert_eq!(config.step_timeout(), None);
        assert_eq!(config.defaults.match_on, MatchOn::Stdout);
        assert_eq!(config.run.component.as_deref(), Some("kubectl-gadget"));

        let ctx = config.step_context();
        assert_eq!(ctx.shell, "/bin/bash");
        assert_eq!(
            ctx.env.get("KUBECTL_GADGET").map(String::as_str),
            Some("/usr/local/bin/kubectl-gadget")
        );
        assert_eq!(ctx.namespace.create, "mkdir /tmp/{namespace}");
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[run]\nmax_parallel = \"many\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, super::super::Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = Config::load_from(Path::new("/nonexistent/stepwise.toml")).unwrap_err();
        assert!(matches!(err, super::super::Error::FileRead { .. }));
    }
}
