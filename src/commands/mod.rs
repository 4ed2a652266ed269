//! Command implementations for the kubeform CLI

pub mod apply;
pub mod config;
pub mod import;
pub mod plan;
pub mod show;
pub mod validate;

use crate::config::{ConfigFile, ProviderSettings, Settings};
use crate::k8s::create_client;
use crate::resources::{Provider, ProviderContext};
use crate::state::State;
use crate::structure::MetadataFilter;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Flags shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Settings file, instead of the standard locations
    pub settings: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub state: Option<PathBuf>,
    pub kubeconfig: Option<String>,
    pub context: Option<String>,
}

/// Everything a command needs: settings, file locations and the provider
pub struct Workspace {
    pub settings: Settings,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub provider: Provider,
    cli_overrides: ProviderSettings,
}

impl Workspace {
    pub fn load(options: &GlobalOptions) -> Result<Self> {
        let mut settings = match &options.settings {
            Some(path) => Settings::load_from_file(path)?,
            None => Settings::load()?,
        };
        if options.settings.is_some() {
            settings.provider.apply_env(|key| std::env::var(key).ok());
        }
        if !settings.behavior.color {
            colored::control::set_override(false);
        }

        let config_path = options
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(&settings.paths.config_file));
        let state_path = options
            .state
            .clone()
            .unwrap_or_else(|| PathBuf::from(&settings.paths.state_file));
        debug!(
            "Configuration {}, state {}",
            config_path.display(),
            state_path.display()
        );

        Ok(Self {
            settings,
            config_path,
            state_path,
            provider: Provider::new(),
            cli_overrides: ProviderSettings {
                config_path: options.kubeconfig.clone(),
                config_context: options.context.clone(),
                ..Default::default()
            },
        })
    }

    pub fn config(&self) -> Result<ConfigFile> {
        ConfigFile::load(&self.config_path)
    }

    pub fn state(&self) -> Result<State> {
        State::load(&self.state_path).context("Failed to load state")
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Provider settings in precedence order: settings file and environment,
    /// then the configuration file's `provider` block, then CLI flags
    pub fn provider_settings(&self, config: Option<&ConfigFile>) -> ProviderSettings {
        let mut provider = self.settings.provider.clone();
        if let Some(overrides) = config.and_then(|c| c.provider.as_ref()) {
            provider.merge(overrides);
        }
        provider.merge(&self.cli_overrides);
        provider
    }

    /// Connect to the cluster
    pub async fn connect(&self, config: Option<&ConfigFile>) -> Result<ProviderContext> {
        let provider = self.provider_settings(config);
        let (annotations, labels) = provider.ignore_patterns()?;
        let client = create_client(&provider).await?;
        Ok(ProviderContext::new(
            client,
            self.settings.timeouts.clone(),
            MetadataFilter::new(annotations, labels),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_default_to_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("config.toml");
        std::fs::write(
            &settings_path,
            "[paths]\nconfig_file = \"infra.yaml\"\nstate_file = \"infra.state.json\"\n",
        )
        .unwrap();

        let workspace = Workspace::load(&GlobalOptions {
            settings: Some(settings_path.clone()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(workspace.config_path, PathBuf::from("infra.yaml"));
        assert_eq!(workspace.state_path(), Path::new("infra.state.json"));

        let workspace = Workspace::load(&GlobalOptions {
            settings: Some(settings_path),
            state: Some(dir.path().join("other.json")),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(workspace.state_path(), dir.path().join("other.json"));
    }

    #[test]
    fn test_provider_settings_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("config.toml");
        std::fs::write(
            &settings_path,
            "[provider]\nconfig_path = \"/etc/kubeconfig\"\nconfig_context = \"staging\"\n",
        )
        .unwrap();
        let workspace = Workspace::load(&GlobalOptions {
            settings: Some(settings_path),
            context: Some("kind-dev".to_string()),
            ..Default::default()
        })
        .unwrap();

        let config = ConfigFile::parse(
            "provider:\n  config_context: prod\n  ignore_labels: ['^team$']\nresources: []\n",
        )
        .unwrap();
        let provider = workspace.provider_settings(Some(&config));
        // env may set KUBE_CONFIG_PATH in CI; only the context is asserted
        assert_eq!(provider.config_context.as_deref(), Some("kind-dev"));
        assert_eq!(provider.ignore_labels, vec!["^team$".to_string()]);
    }
}
