//! Kubernetes client construction from provider settings

use crate::config::settings::ProviderSettings;
use crate::{Error, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::PathBuf;
use tracing::debug;

/// Expand a leading `~/` in a kubeconfig path
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

fn kubeconfig_options(settings: &ProviderSettings) -> KubeConfigOptions {
    KubeConfigOptions {
        context: settings.config_context.clone(),
        cluster: settings.config_context_cluster.clone(),
        user: settings.config_context_auth_info.clone(),
    }
}

/// Build the client configuration: an explicit kubeconfig path wins, then
/// context overrides against the default kubeconfig, then in-cluster/default
/// inference
pub async fn client_config(settings: &ProviderSettings) -> Result<Config> {
    let options = kubeconfig_options(settings);
    let has_overrides =
        options.context.is_some() || options.cluster.is_some() || options.user.is_some();

    let mut config = match &settings.config_path {
        Some(path) => {
            let path = expand_home(path);
            debug!("Loading kubeconfig from {}", path.display());
            let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
                Error::Config(format!("failed to read kubeconfig {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| Error::Config(format!("failed to load kubeconfig: {}", e)))?
        }
        None if has_overrides => Config::from_kubeconfig(&options)
            .await
            .map_err(|e| Error::Config(format!("failed to load kubeconfig: {}", e)))?,
        None => Config::infer()
            .await
            .map_err(|e| Error::Config(format!("failed to infer cluster config: {}", e)))?,
    };

    if settings.insecure {
        config.accept_invalid_certs = true;
    }
    Ok(config)
}

/// Create a client for the configured cluster
pub async fn create_client(settings: &ProviderSettings) -> Result<Client> {
    let config = client_config(settings).await?;
    debug!("Connecting to {}", config.cluster_url);
    Client::try_from(config).map_err(|e| Error::Config(format!("failed to create client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/kube/config"), PathBuf::from("/etc/kube/config"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.kube/config"), home.join(".kube/config"));
        }
    }

    #[test]
    fn test_kubeconfig_options() {
        let settings = ProviderSettings {
            config_context: Some("kind-dev".to_string()),
            ..Default::default()
        };
        let options = kubeconfig_options(&settings);
        assert_eq!(options.context.as_deref(), Some("kind-dev"));
        assert!(options.cluster.is_none());
    }
}
