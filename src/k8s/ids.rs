//! Resource ID encoding: `<namespace>/<name>` or `<name>`

use crate::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Build the ID of an object from its metadata
pub fn id_for(meta: &ObjectMeta, namespaced: bool) -> String {
    let name = meta.name.clone().unwrap_or_default();
    match (namespaced, meta.namespace.as_deref()) {
        (true, Some(ns)) => format!("{}/{}", ns, name),
        (true, None) => format!("default/{}", name),
        (false, _) => name,
    }
}

/// Split a namespaced ID into `(namespace, name)`
pub fn parse_namespaced_id(id: &str) -> Result<(String, String)> {
    match id.split('/').collect::<Vec<_>>().as_slice() {
        [ns, name] if !ns.is_empty() && !name.is_empty() => {
            Ok((ns.to_string(), name.to_string()))
        }
        _ => Err(Error::InvalidId {
            id: id.to_string(),
            expected: "<namespace>/<name>".to_string(),
        }),
    }
}

/// Validate a cluster-scoped ID, which is just the object name
pub fn parse_cluster_id(id: &str) -> Result<String> {
    if id.is_empty() || id.contains('/') {
        return Err(Error::InvalidId {
            id: id.to_string(),
            expected: "<name>".to_string(),
        });
    }
    Ok(id.to_string())
}

/// Split any ID into `(namespace, name)`, the namespace being `None` for
/// cluster-scoped types
pub fn parse_id(id: &str, namespaced: bool) -> Result<(Option<String>, String)> {
    if namespaced {
        let (ns, name) = parse_namespaced_id(id)?;
        Ok((Some(ns), name))
    } else {
        Ok((None, parse_cluster_id(id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_ids() {
        let meta = ObjectMeta {
            name: Some("app".to_string()),
            namespace: Some("prod".to_string()),
            ..Default::default()
        };
        let id = id_for(&meta, true);
        assert_eq!(id, "prod/app");
        assert_eq!(
            parse_namespaced_id(&id).unwrap(),
            ("prod".to_string(), "app".to_string())
        );
    }

    #[test]
    fn test_cluster_ids() {
        let meta = ObjectMeta {
            name: Some("validator".to_string()),
            ..Default::default()
        };
        assert_eq!(id_for(&meta, false), "validator");
        assert_eq!(parse_id("validator", false).unwrap(), (None, "validator".to_string()));
    }

    #[test]
    fn test_malformed_ids() {
        assert!(parse_namespaced_id("app").is_err());
        assert!(parse_namespaced_id("a/b/c").is_err());
        assert!(parse_namespaced_id("/app").is_err());
        assert!(parse_cluster_id("ns/app").is_err());
        assert!(parse_cluster_id("").is_err());
    }
}
