//! Namespace lifecycle helpers
//!
//! Creating and deleting a test namespace are ordinary commands built from
//! a fixed template. Creation belongs to the main phase; deletion is always
//! a cleanup step.

use serde::Serialize;

use super::{Command, Step};

/// Placeholder substituted with the namespace name in templates
pub const NAMESPACE_PLACEHOLDER: &str = "{namespace}";

/// Invocation templates for the isolation-scope boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTemplates {
    pub create: String,
    pub delete: String,
}

impl Default for NamespaceTemplates {
    fn default() -> Self {
        Self {
            // The default service account shows up shortly after the namespace;
            // pods cannot be created before it exists
            create: "kubectl create ns {namespace} && \
                     while ! kubectl get serviceaccount default -n {namespace} >/dev/null 2>&1; \
                     do sleep 1; done"
                .to_string(),
            delete: "kubectl delete ns {namespace}".to_string(),
        }
    }
}

impl NamespaceTemplates {
    pub fn render_create(&self, namespace: &str) -> String {
        self.create.replace(NAMESPACE_PLACEHOLDER, namespace)
    }

    pub fn render_delete(&self, namespace: &str) -> String {
        self.delete.replace(NAMESPACE_PLACEHOLDER, namespace)
    }
}

/// A namespace create or delete step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceStep {
    pub namespace: String,
}

impl NamespaceStep {
    pub fn create_name(&self) -> String {
        format!("CreateTestNamespace/{}", self.namespace)
    }

    pub fn delete_name(&self) -> String {
        format!("DeleteTestNamespace/{}", self.namespace)
    }

    pub fn create_command(&self, templates: &NamespaceTemplates) -> Command {
        Command::new(self.create_name(), templates.render_create(&self.namespace))
    }

    pub fn delete_command(&self, templates: &NamespaceTemplates) -> Command {
        Command::new(self.delete_name(), templates.render_delete(&self.namespace)).cleanup()
    }
}

/// Step creating `namespace` at the start of a test case
pub fn create_namespace(namespace: impl Into<String>) -> Step {
    Step::NamespaceCreate(NamespaceStep {
        namespace: namespace.into(),
    })
}

/// Cleanup step deleting `namespace`
pub fn delete_namespace(namespace: impl Into<String>) -> Step {
    Step::NamespaceDelete(NamespaceStep {
        namespace: namespace.into(),
    })
}
