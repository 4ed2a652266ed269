//! Configuration file support for kubeform

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub behavior: Behavior,

    #[serde(default)]
    pub paths: Paths,
}

/// Cluster connection and provider-wide behavior
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ProviderSettings {
    /// Path to the kubeconfig file. Defaults to in-cluster or ~/.kube/config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_context_cluster: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_context_auth_info: Option<String>,

    /// Skip TLS verification of the API server certificate
    #[serde(default)]
    pub insecure: bool,

    /// Annotation keys (regular expressions) never written to state
    #[serde(default)]
    pub ignore_annotations: Vec<String>,

    /// Label keys (regular expressions) never written to state
    #[serde(default)]
    pub ignore_labels: Vec<String>,
}

/// Operation timeouts, in seconds
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Timeouts {
    #[serde(default = "default_operation_timeout")]
    pub create: u64,

    #[serde(default = "default_operation_timeout")]
    pub update: u64,

    #[serde(default = "default_operation_timeout")]
    pub delete: u64,

    /// Interval between checks while waiting for rollouts and load balancers
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

/// Behavior settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Behavior {
    #[serde(default = "default_true")]
    pub confirm_destructive: bool,

    #[serde(default = "default_true")]
    pub refresh_before_plan: bool,

    #[serde(default = "default_true")]
    pub color: bool,
}

/// Default file locations
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Paths {
    #[serde(default = "default_config_file")]
    pub config_file: String,

    #[serde(default = "default_state_file")]
    pub state_file: String,
}

// Default value functions
fn default_operation_timeout() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_config_file() -> String {
    "kubeform.yaml".to_string()
}

fn default_state_file() -> String {
    "kubeform.state.json".to_string()
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: default_operation_timeout(),
            update: default_operation_timeout(),
            delete: default_operation_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Timeouts {
    pub fn create(&self) -> Duration {
        Duration::from_secs(self.create)
    }

    pub fn update(&self) -> Duration {
        Duration::from_secs(self.update)
    }

    pub fn delete(&self) -> Duration {
        Duration::from_secs(self.delete)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.max(1))
    }
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            confirm_destructive: default_true(),
            refresh_before_plan: default_true(),
            color: default_true(),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            config_file: default_config_file(),
            state_file: default_state_file(),
        }
    }
}

impl ProviderSettings {
    /// Overlay values read from the `KUBE_*` environment variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("KUBE_CONFIG_PATH") {
            self.config_path = Some(path);
        }
        if let Some(ctx) = lookup("KUBE_CTX") {
            self.config_context = Some(ctx);
        }
        if let Some(cluster) = lookup("KUBE_CTX_CLUSTER") {
            self.config_context_cluster = Some(cluster);
        }
        if let Some(user) = lookup("KUBE_CTX_AUTH_INFO") {
            self.config_context_auth_info = Some(user);
        }
        if let Some(insecure) = lookup("KUBE_INSECURE") {
            self.insecure = matches!(insecure.as_str(), "1" | "true" | "TRUE" | "yes");
        }
    }

    /// Overlay non-empty values from another settings block
    pub fn merge(&mut self, other: &ProviderSettings) {
        if other.config_path.is_some() {
            self.config_path = other.config_path.clone();
        }
        if other.config_context.is_some() {
            self.config_context = other.config_context.clone();
        }
        if other.config_context_cluster.is_some() {
            self.config_context_cluster = other.config_context_cluster.clone();
        }
        if other.config_context_auth_info.is_some() {
            self.config_context_auth_info = other.config_context_auth_info.clone();
        }
        self.insecure |= other.insecure;
        self.ignore_annotations
            .extend(other.ignore_annotations.iter().cloned());
        self.ignore_labels.extend(other.ignore_labels.iter().cloned());
    }

    /// Compile the ignore patterns
    pub fn ignore_patterns(&self) -> Result<(Vec<Regex>, Vec<Regex>)> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| Regex::new(p).with_context(|| format!("Invalid ignore pattern: {}", p)))
                .collect()
        };
        Ok((
            compile(&self.ignore_annotations)?,
            compile(&self.ignore_labels)?,
        ))
    }
}

impl Settings {
    /// Load settings from file or return defaults, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut settings = match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        settings.provider.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

        Ok(settings)
    }

    /// Find settings file in standard locations
    /// Priority:
    /// 1. .kubeform.toml in current directory
    /// 2. ~/.config/kubeform/config.toml (XDG config directory)
    fn find_config_file() -> Option<PathBuf> {
        let local_config = PathBuf::from(".kubeform.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("kubeform").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Save settings to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize settings")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;

        Ok(())
    }

    /// Generate example settings file content
    pub fn example_config() -> Result<String> {
        let header = "# kubeform settings file\n\
                      # Place this file at ~/.config/kubeform/config.toml or .kubeform.toml in your project\n\n";
        let body =
            toml::to_string_pretty(&Settings::default()).context("Failed to serialize settings")?;
        Ok(format!("{}{}", header, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.timeouts.create, 300);
        assert_eq!(settings.paths.state_file, "kubeform.state.json");
        assert!(settings.behavior.confirm_destructive);
        assert!(settings.provider.config_path.is_none());
    }

    #[test]
    fn test_settings_deserialization() {
        let toml_str = r#"
[provider]
config_path = "~/.kube/staging"
config_context = "staging"
ignore_annotations = ["^autopilot\\.gke\\.io/.*"]

[timeouts]
create = 600

[behavior]
confirm_destructive = false
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.provider.config_context.as_deref(), Some("staging"));
        assert_eq!(settings.timeouts.create, 600);
        assert_eq!(settings.timeouts.delete, 300);
        assert!(!settings.behavior.confirm_destructive);

        let (annotations, labels) = settings.provider.ignore_patterns().unwrap();
        assert!(annotations[0].is_match("autopilot.gke.io/resource-adjustment"));
        assert!(labels.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("KUBE_CTX", "kind-dev"), ("KUBE_INSECURE", "true")]
            .into_iter()
            .collect();
        let mut provider = ProviderSettings::default();
        provider.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(provider.config_context.as_deref(), Some("kind-dev"));
        assert!(provider.insecure);
        assert!(provider.config_path.is_none());
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut base = ProviderSettings {
            config_path: Some("/etc/kubeconfig".to_string()),
            ..Default::default()
        };
        base.merge(&ProviderSettings {
            config_context: Some("prod".to_string()),
            ..Default::default()
        });
        assert_eq!(base.config_path.as_deref(), Some("/etc/kubeconfig"));
        assert_eq!(base.config_context.as_deref(), Some("prod"));
    }

    #[test]
    fn test_invalid_ignore_pattern() {
        let provider = ProviderSettings {
            ignore_labels: vec!["(".to_string()],
            ..Default::default()
        };
        assert!(provider.ignore_patterns().is_err());
    }

    #[test]
    fn test_example_config() {
        let example = Settings::example_config().unwrap();
        assert!(example.contains("kubeform settings file"));
        assert!(example.contains("[timeouts]"));
        assert!(example.contains("[behavior]"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut settings = Settings::default();
        settings.timeouts.poll_interval = 1;
        settings.save(&path).unwrap();
        let loaded = Settings::load_from_file(&path).unwrap();
        assert_eq!(loaded.timeouts.poll_interval, 1);
    }
}
