//! API discovery for arbitrary kinds

use crate::Result;
use kube::Client;
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiResource, Scope};

/// Split `group/version` (or a bare core `version`) into its parts
pub fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Resolve a kind to its API resource and whether it is namespaced
pub async fn resolve_kind(
    client: &Client,
    api_version: &str,
    kind: &str,
) -> Result<(ApiResource, bool)> {
    let (group, version) = split_api_version(api_version);
    let gvk = GroupVersionKind::gvk(&group, &version, kind);
    let (resource, capabilities) = discovery::pinned_kind(client, &gvk).await?;
    Ok((resource, matches!(capabilities.scope, Scope::Namespaced)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_api_version() {
        assert_eq!(
            split_api_version("apps/v1"),
            ("apps".to_string(), "v1".to_string())
        );
        assert_eq!(split_api_version("v1"), (String::new(), "v1".to_string()));
        assert_eq!(
            split_api_version("example.com/v1alpha1"),
            ("example.com".to_string(), "v1alpha1".to_string())
        );
    }
}
