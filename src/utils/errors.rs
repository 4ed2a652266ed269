//! User-facing errors with actionable suggestions

use colored::Colorize;
use thiserror::Error;

/// Error with suggestions, printed by the CLI before exiting
#[derive(Error, Debug)]
#[error("{message}")]
pub struct KubeformError {
    pub message: String,
    pub suggestions: Vec<String>,
}

impl KubeformError {
    /// Create a new error with suggestions
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    /// Add a suggestion to the error
    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Display the error with suggestions
    pub fn display(&self) {
        eprint!("{}", self.render());
    }

    /// Message and suggestions as printed to stderr
    pub fn render(&self) -> String {
        let mut out = format!("{} {}\n", "Error:".red().bold(), self.message);
        if !self.suggestions.is_empty() {
            out.push('\n');
            out.push_str(&format!("{}\n", "Suggestions:".yellow().bold()));
            for suggestion in &self.suggestions {
                out.push_str(&format!("  {} {}\n", "→".blue(), suggestion));
            }
        }
        out
    }

    // Common error patterns

    /// Kubeconfig could not be loaded
    pub fn cluster_unreachable(reason: &str) -> Self {
        Self::new(format!("Cannot connect to the cluster: {}", reason))
            .suggest("Check the kubeconfig path with --kubeconfig or KUBE_CONFIG_PATH")
            .suggest("Select a context with --context or KUBE_CTX")
            .suggest("Verify the cluster is running: kubectl cluster-info")
    }

    /// Configuration block failed validation
    pub fn invalid_config(details: &str) -> Self {
        Self::new(format!("Invalid configuration:\n{}", details))
            .suggest("Run 'kubeform validate' to list every problem")
            .suggest("Run 'kubeform schema <type>' to see the accepted attributes")
    }

    /// Resource type is not registered
    pub fn unknown_resource_type(name: &str) -> Self {
        Self::new(format!("Unknown resource type: {}", name))
            .suggest("Run 'kubeform schema' to list supported resource types")
    }

    /// Timed out waiting for a cluster-side condition
    pub fn wait_timeout(details: &str) -> Self {
        Self::new(details.to_string())
            .suggest("Increase the timeouts in the [timeouts] section of the settings file")
            .suggest("Check events: kubectl get events --sort-by=.lastTimestamp")
    }

    /// Create hit an object that exists but is not in state
    pub fn already_exists(details: &str) -> Self {
        Self::new(details.to_string())
            .suggest("Adopt it with 'kubeform import <address> <id>'")
            .suggest("Or rename the object in the configuration")
    }

    /// API rejected the request for lack of permissions
    pub fn permission_denied(details: &str) -> Self {
        Self::new(format!("Permission denied: {}", details))
            .suggest("Verify the RBAC permissions of the configured user")
            .suggest("Check the active context: kubectl config current-context")
    }

    /// The state file could not be read or written
    pub fn state_error(details: &str) -> Self {
        Self::new(format!("State file error: {}", details))
            .suggest("Check the --state path and file permissions")
            .suggest("Inspect the state with 'kubeform show'")
    }
}

/// Helper to display error and exit
pub fn display_error_and_exit(error: KubeformError) -> ! {
    error.display();
    std::process::exit(1);
}

/// Convert an error into a [`KubeformError`] with suggestions when possible
pub fn enhance_error(err: anyhow::Error) -> KubeformError {
    if let Some(lib) = err.downcast_ref::<crate::Error>() {
        return match lib {
            crate::Error::Validation(diags) => KubeformError::invalid_config(&diags.to_string()),
            crate::Error::UnknownResourceType(name) => KubeformError::unknown_resource_type(name),
            crate::Error::Timeout { .. } => KubeformError::wait_timeout(&lib.to_string()),
            crate::Error::Config(reason) => KubeformError::cluster_unreachable(reason),
            crate::Error::AlreadyExists { .. } => KubeformError::already_exists(&lib.to_string()),
            crate::Error::State(reason) => KubeformError::state_error(reason),
            _ => generic(format!("{:#}", err)),
        };
    }

    let err_str = format!("{:#}", err);
    if err_str.contains("forbidden") || err_str.contains("Unauthorized") {
        return KubeformError::permission_denied(&err_str);
    }
    if err_str.contains("connection refused") || err_str.contains("dns error") {
        return KubeformError::cluster_unreachable(&err_str);
    }

    generic(err_str)
}

fn generic(message: String) -> KubeformError {
    KubeformError::new(message).suggest("Run with -vv for more details")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;

    #[test]
    fn test_error_suggestions() {
        let err = KubeformError::new("test")
            .suggest("suggestion 1")
            .suggest("suggestion 2");
        assert_eq!(err.suggestions.len(), 2);
    }

    #[test]
    fn test_render_prints_message_once() {
        let err = KubeformError::new("ConfigMap app already exists").suggest("Import it");
        let text = err.render();
        assert_eq!(text.matches("ConfigMap app already exists").count(), 1);
        assert!(text.contains("Import it"));
    }

    #[test]
    fn test_enhance_validation_error() {
        let mut diags = Diagnostics::new();
        diags.error("Missing required argument", "", Some("metadata"));
        let err = enhance_error(anyhow::Error::new(crate::Error::Validation(diags)));
        assert!(err.message.contains("metadata"));
        assert!(err.suggestions.iter().any(|s| s.contains("kubeform validate")));
    }

    #[test]
    fn test_enhance_already_exists() {
        let err = enhance_error(anyhow::Error::new(crate::Error::AlreadyExists {
            kind: "ConfigMap".to_string(),
            name: "app".to_string(),
        }));
        assert_eq!(err.message, "ConfigMap app already exists");
        assert!(err.suggestions[0].contains("kubeform import"));
    }

    #[test]
    fn test_enhance_forbidden_message() {
        let err = enhance_error(anyhow::anyhow!(
            "configmaps is forbidden: User cannot create resource"
        ));
        assert!(err.message.starts_with("Permission denied"));
    }

    #[test]
    fn test_enhance_wrapped_error() {
        let err = anyhow::Error::new(crate::Error::UnknownResourceType(
            "kubernetes_pod".to_string(),
        ))
        .context("planning kubernetes_pod.web");
        // context wrapping still exposes the library error
        let enhanced = enhance_error(err);
        assert!(enhanced.message.contains("kubernetes_pod"));
    }
}
