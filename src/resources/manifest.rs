//! `kubernetes_manifest`: any object the API server knows, custom
//! resources included, resolved through discovery

use super::{ProviderContext, ResourceType, resource_schema};
use crate::diagnostics::Diagnostics;
use crate::k8s::discovery::resolve_kind;
use crate::k8s::errors::{is_conflict, is_not_found};
use crate::k8s::wait::{PollStatus, poll_until};
use crate::k8s::{patch_diff, retry, to_json_patch, wait_for_deletion};
use crate::schema::{Attribute, ResourceSchema, Schema};
use crate::structure::helpers::{ObjectBuilder, get_block, get_string_map};
use crate::{Error, Result};
use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ManifestResource;

/// `apiVersion=<v>,kind=<k>[,namespace=<ns>],name=<n>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestId {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "apiVersion={},kind={}", self.api_version, self.kind)?;
        if let Some(ns) = &self.namespace {
            write!(f, ",namespace={}", ns)?;
        }
        write!(f, ",name={}", self.name)
    }
}

impl ManifestId {
    pub fn parse(id: &str) -> Result<Self> {
        let invalid = || Error::InvalidId {
            id: id.to_string(),
            expected: "apiVersion=<v>,kind=<k>,namespace=<ns>,name=<n>".to_string(),
        };
        let mut fields = BTreeMap::new();
        for part in id.split(',') {
            let (key, value) = part.split_once('=').ok_or_else(invalid)?;
            if value.is_empty() || fields.insert(key, value).is_some() {
                return Err(invalid());
            }
        }
        let field = |key: &str| fields.get(key).map(|v| v.to_string());
        let parsed = ManifestId {
            api_version: field("apiVersion").ok_or_else(invalid)?,
            kind: field("kind").ok_or_else(invalid)?,
            namespace: field("namespace"),
            name: field("name").ok_or_else(invalid)?,
        };
        let known = 3 + usize::from(parsed.namespace.is_some());
        if fields.len() != known {
            return Err(invalid());
        }
        Ok(parsed)
    }

    fn from_manifest(manifest: &Value, namespace: Option<String>) -> Result<Self> {
        let text = |path: &str| {
            lookup_path(manifest, path)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| Error::attribute(format!("manifest.{}", path), "is required"))
        };
        Ok(ManifestId {
            api_version: text("apiVersion")?,
            kind: text("kind")?,
            namespace,
            name: text("metadata.name")?,
        })
    }
}

/// Value at a dotted path; numeric segments and `[n]` index into arrays
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        let (key, indexes) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            current = match current {
                Value::Object(map) => map.get(key)?,
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        for index in indexes.split('[').skip(1) {
            let n: usize = index.strip_suffix(']')?.parse().ok()?;
            current = current.as_array()?.get(n)?;
        }
    }
    Some(current)
}

/// Server object narrowed to the keys present in `manifest`, so drift in
/// configured fields shows up while server-populated fields do not
fn project(manifest: &Value, object: &Value) -> Value {
    match (manifest, object) {
        (Value::Object(m), Value::Object(o)) => Value::Object(
            m.iter()
                .filter_map(|(key, mv)| o.get(key).map(|ov| (key.clone(), project(mv, ov))))
                .collect(),
        ),
        (Value::Array(m), Value::Array(o)) if m.len() == o.len() => {
            Value::Array(m.iter().zip(o).map(|(mv, ov)| project(mv, ov)).collect())
        }
        (_, other) => other.clone(),
    }
}

const SERVER_METADATA: &[&str] = &[
    "creationTimestamp",
    "generation",
    "managedFields",
    "resourceVersion",
    "selfLink",
    "uid",
];

/// Server object minus status and server-owned metadata, used as the
/// manifest of an imported object
fn strip_server_fields(object: &Value) -> Value {
    let mut out = object.clone();
    if let Some(map) = out.as_object_mut() {
        map.remove("status");
        if let Some(meta) = map.get_mut("metadata").and_then(Value::as_object_mut) {
            for key in SERVER_METADATA {
                meta.remove(*key);
            }
        }
    }
    out
}

/// `Ok` once every `path -> regex` pair matches the object
fn wait_fields_match(object: &Value, fields: &[(String, Regex)]) -> std::result::Result<(), String> {
    for (path, pattern) in fields {
        let actual = match lookup_path(object, path) {
            None | Some(Value::Null) => return Err(format!("{} not set", path)),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        if !pattern.is_match(&actual) {
            return Err(format!("{} is {:?}", path, actual));
        }
    }
    Ok(())
}

fn compile_wait_fields(attrs: &Value) -> Result<Vec<(String, Regex)>> {
    let Some(fields) = get_block(attrs, "wait").and_then(|w| get_string_map(w, "fields")) else {
        return Ok(Vec::new());
    };
    fields
        .into_iter()
        .map(|(path, pattern)| {
            let re = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                Error::attribute(format!("wait.0.fields.{}", path), e.to_string())
            })?;
            Ok((path, re))
        })
        .collect()
}

impl ManifestResource {
    async fn api_for(&self, client: &Client, id: &ManifestId) -> Result<(Api<DynamicObject>, bool)> {
        let (resource, namespaced) = resolve_kind(client, &id.api_version, &id.kind).await?;
        let api = match (namespaced, id.namespace.as_deref()) {
            (true, ns) => Api::namespaced_with(client.clone(), ns.unwrap_or("default"), &resource),
            (false, _) => Api::all_with(client.clone(), &resource),
        };
        Ok((api, namespaced))
    }

    async fn wait_for_fields(
        &self,
        api: &Api<DynamicObject>,
        id: &ManifestId,
        fields: Vec<(String, Regex)>,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let what = format!("{} {}", id.kind, id.name);
        let fields = &fields;
        let name = id.name.as_str();
        poll_until(&what, timeout, interval, || async move {
            let object = serde_json::to_value(api.get(name).await?)?;
            Ok(match wait_fields_match(&object, fields) {
                Ok(()) => PollStatus::Ready(()),
                Err(reason) => PollStatus::Pending(reason),
            })
        })
        .await
    }

    fn flatten(&self, object: &DynamicObject, prior: &Value) -> Result<Value> {
        let mut server = serde_json::to_value(object)?;
        if let Some(meta) = server.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("managedFields");
        }
        let manifest = match prior.get("manifest").filter(|m| m.is_object()) {
            Some(configured) => project(configured, &server),
            None => strip_server_fields(&server),
        };
        Ok(ObjectBuilder::new()
            .set("manifest", manifest)
            .set("object", server)
            .carry("wait", prior)
            .carry("timeouts", prior)
            .build())
    }
}

#[async_trait]
impl ResourceType for ManifestResource {
    fn type_name(&self) -> &'static str {
        "kubernetes_manifest"
    }

    fn schema(&self) -> ResourceSchema {
        resource_schema(
            self.type_name(),
            false,
            "Any Kubernetes object, including custom resources, described by its full manifest",
            Schema::new()
                .attr(
                    "manifest",
                    Attribute::any()
                        .required()
                        .description("Object as it would be written in YAML: apiVersion, kind, metadata and body"),
                )
                .attr(
                    "object",
                    Attribute::any()
                        .computed()
                        .description("Object as returned by the API server"),
                )
                .attr(
                    "wait",
                    Attribute::single_block(
                        Schema::new().attr(
                            "fields",
                            Attribute::map()
                                .optional()
                                .description("Object paths and regular expressions their values must match"),
                        ),
                    )
                    .optional(),
                ),
            true,
        )
    }

    fn validate(&self, attrs: &Value) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let Some(manifest) = attrs.get("manifest") else {
            return diags;
        };
        if !manifest.is_object() {
            diags.error("Invalid manifest", "manifest must be an object", Some("manifest"));
            return diags;
        }
        if let Err(err) = ManifestId::from_manifest(manifest, None) {
            diags.error("Invalid manifest", err.to_string(), Some("manifest"));
        }
        if let Err(err) = compile_wait_fields(attrs) {
            diags.error("Invalid wait condition", err.to_string(), Some("wait.0.fields"));
        }
        diags
    }

    fn replacement_paths(&self, prior: &Value, desired: &Value) -> Vec<String> {
        let (Some(old), Some(new)) = (prior.get("manifest"), desired.get("manifest")) else {
            return Vec::new();
        };
        ["apiVersion", "kind", "metadata.name", "metadata.namespace"]
            .into_iter()
            .filter(|path| lookup_path(old, path) != lookup_path(new, path))
            .map(|path| format!("manifest.{}", path))
            .collect()
    }

    async fn create(&self, ctx: &ProviderContext, desired: &Value) -> Result<(String, Value)> {
        let manifest = desired
            .get("manifest")
            .filter(|m| m.is_object())
            .ok_or_else(|| Error::attribute("manifest", "must be an object"))?;
        let requested_ns = lookup_path(manifest, "metadata.namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut id = ManifestId::from_manifest(manifest, requested_ns)?;
        let (api, namespaced) = self.api_for(&ctx.client, &id).await?;

        let mut body = manifest.clone();
        if namespaced {
            let ns = id.namespace.get_or_insert_with(|| "default".to_string()).clone();
            if let Some(meta) = body.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.insert("namespace".to_string(), Value::String(ns));
            }
        } else {
            id.namespace = None;
        }
        let object: DynamicObject = serde_json::from_value(body)?;

        info!("Creating {} {}", id.kind, id.name);
        match api.create(&PostParams::default(), &object).await {
            Ok(_) => {}
            Err(err) if is_conflict(&err) => {
                return Err(Error::AlreadyExists {
                    kind: id.kind.clone(),
                    name: id.name.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        }

        let fields = compile_wait_fields(desired)?;
        self.wait_for_fields(&api, &id, fields, ctx.timeouts.create(), ctx.timeouts.poll_interval())
            .await?;
        let id = id.to_string();
        let attrs = self.read(ctx, &id, desired).await?.ok_or_else(|| Error::NotFound {
            kind: "manifest".to_string(),
            id: id.clone(),
        })?;
        Ok((id, attrs))
    }

    async fn read(&self, ctx: &ProviderContext, id: &str, prior: &Value) -> Result<Option<Value>> {
        let parsed = ManifestId::parse(id)?;
        let (api, _) = match self.api_for(&ctx.client, &parsed).await {
            Ok(found) => found,
            Err(err) if err.is_not_found() => {
                warn!("{} is no longer served, removing {} from state", parsed.kind, id);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        debug!("Reading {}", id);
        let Some(object) = api.get_opt(&parsed.name).await? else {
            warn!("{} {} not found, removing from state", parsed.kind, parsed.name);
            return Ok(None);
        };
        self.flatten(&object, prior).map(Some)
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        id: &str,
        prior: &Value,
        desired: &Value,
    ) -> Result<Value> {
        let parsed = ManifestId::parse(id)?;
        let (api, _) = self.api_for(&ctx.client, &parsed).await?;
        let empty = Value::Object(Map::new());
        let old = prior.get("manifest").unwrap_or(&empty);
        let new = desired.get("manifest").unwrap_or(&empty);
        let ops = patch_diff(old, new);
        if ops.is_empty() {
            debug!("No API changes for {}", id);
        } else {
            info!("Updating {} {} ({} patch operations)", parsed.kind, parsed.name, ops.len());
            let patch = Patch::Json::<()>(to_json_patch(&ops)?);
            let what = format!("update of {} {}", parsed.kind, parsed.name);
            let (patch, target, name) = (&patch, &api, &parsed.name);
            retry(&what, ctx.timeouts.update(), ctx.timeouts.poll_interval(), || async move {
                Ok(target.patch(name, &PatchParams::default(), patch).await?)
            })
            .await?;
        }
        let fields = compile_wait_fields(desired)?;
        self.wait_for_fields(&api, &parsed, fields, ctx.timeouts.update(), ctx.timeouts.poll_interval())
            .await?;
        self.read(ctx, id, desired).await?.ok_or_else(|| Error::NotFound {
            kind: parsed.kind.clone(),
            id: id.to_string(),
        })
    }

    async fn delete(&self, ctx: &ProviderContext, id: &str) -> Result<()> {
        let parsed = ManifestId::parse(id)?;
        let (api, _) = self.api_for(&ctx.client, &parsed).await?;
        info!("Deleting {} {}", parsed.kind, parsed.name);
        match api.delete(&parsed.name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(err) if is_not_found(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        wait_for_deletion(&api, &parsed.name, ctx.timeouts.delete()).await
    }

    async fn exists(&self, ctx: &ProviderContext, id: &str) -> Result<bool> {
        let parsed = ManifestId::parse(id)?;
        let (api, _) = self.api_for(&ctx.client, &parsed).await?;
        Ok(api.get_opt(&parsed.name).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manifest_ids() {
        let id = ManifestId::parse("apiVersion=example.com/v1,kind=Widget,namespace=prod,name=w1").unwrap();
        assert_eq!(id.namespace.as_deref(), Some("prod"));
        assert_eq!(id.to_string(), "apiVersion=example.com/v1,kind=Widget,namespace=prod,name=w1");

        let cluster = ManifestId::parse("apiVersion=v1,kind=PersistentVolume,name=pv1").unwrap();
        assert!(cluster.namespace.is_none());

        assert!(ManifestId::parse("kind=Widget,name=w1").is_err());
        assert!(ManifestId::parse("apiVersion=v1,kind=X,name=a,color=red").is_err());
        assert!(ManifestId::parse("default/w1").is_err());
    }

    #[test]
    fn test_lookup_path() {
        let obj = json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});
        assert_eq!(lookup_path(&obj, "status.conditions[0].type"), Some(&json!("Ready")));
        assert_eq!(lookup_path(&obj, "status.conditions.0.status"), Some(&json!("True")));
        assert_eq!(lookup_path(&obj, "status.missing"), None);
    }

    #[test]
    fn test_project_keeps_configured_shape() {
        let manifest = json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "w1", "labels": {"app": "w"}},
            "spec": {"size": 3}
        });
        let server = json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "w1", "namespace": "default", "uid": "abc", "labels": {"app": "w"}},
            "spec": {"size": 5, "color": "blue"},
            "status": {"ready": true}
        });
        let projected = project(&manifest, &server);
        let mut expected = manifest.clone();
        expected["spec"]["size"] = json!(5);
        assert_eq!(projected, expected);

        let ops = patch_diff(&projected, &manifest);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path(), "/spec/size");
    }

    #[test]
    fn test_imported_manifest_drops_server_fields() {
        let server = json!({
            "apiVersion": "v1",
            "kind": "PersistentVolume",
            "metadata": {"name": "pv1", "uid": "abc", "resourceVersion": "12"},
            "spec": {"capacity": {"storage": "1Gi"}},
            "status": {"phase": "Available"}
        });
        assert_eq!(
            strip_server_fields(&server),
            json!({
                "apiVersion": "v1",
                "kind": "PersistentVolume",
                "metadata": {"name": "pv1"},
                "spec": {"capacity": {"storage": "1Gi"}}
            })
        );
    }

    #[test]
    fn test_wait_fields() {
        let attrs = json!({"wait": [{"fields": {"status.phase": "Run.*", "status.replicas": "3"}}]});
        let fields = compile_wait_fields(&attrs).unwrap();
        let object = json!({"status": {"phase": "Running", "replicas": 3}});
        assert!(wait_fields_match(&object, &fields).is_ok());
        let object = json!({"status": {"phase": "Pending", "replicas": 3}});
        assert_eq!(
            wait_fields_match(&object, &fields).unwrap_err(),
            "status.phase is \"Pending\""
        );

        let bad = json!({"wait": [{"fields": {"status.phase": "("}}]});
        assert!(compile_wait_fields(&bad).is_err());
    }

    #[test]
    fn test_validate_and_replacement() {
        let attrs = json!({"manifest": {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}}});
        assert!(!ManifestResource.validate(&attrs).has_errors());
        let missing_name = json!({"manifest": {"apiVersion": "v1", "kind": "ConfigMap"}});
        assert!(ManifestResource.validate(&missing_name).has_errors());

        let renamed = json!({"manifest": {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "b"}}});
        assert_eq!(
            ManifestResource.replacement_paths(&attrs, &renamed),
            vec!["manifest.metadata.name"]
        );
    }

    #[tokio::test]
    async fn test_update_retries_conflicting_patch() {
        use crate::config::Timeouts;
        use crate::k8s::testing::{exchange, scripted, status};
        use crate::structure::MetadataFilter;

        let core = json!({
            "kind": "APIResourceList",
            "apiVersion": "v1",
            "groupVersion": "v1",
            "resources": [{
                "name": "configmaps",
                "singularName": "configmap",
                "namespaced": true,
                "kind": "ConfigMap",
                "verbs": ["create", "delete", "get", "list", "patch", "update", "watch"]
            }]
        });
        let object = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "app", "namespace": "default", "resourceVersion": "9"},
            "data": {"log_level": "info"}
        });
        let path = "/api/v1/namespaces/default/configmaps/app";
        let (client, server) = scripted(vec![
            exchange("GET", "/api/v1", 200, core.clone()),
            exchange("PATCH", path, 409, status(409, "Conflict")),
            exchange("PATCH", path, 200, object.clone()),
            exchange("GET", "/api/v1", 200, core),
            exchange("GET", path, 200, object),
        ]);
        let ctx = ProviderContext::new(client, Timeouts::default(), MetadataFilter::default());
        let manifest = |level: &str| {
            json!({"manifest": {
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "app", "namespace": "default"},
                "data": {"log_level": level}
            }})
        };
        let id = "apiVersion=v1,kind=ConfigMap,namespace=default,name=app";
        let state = ManifestResource
            .update(&ctx, id, &manifest("debug"), &manifest("info"))
            .await
            .unwrap();
        assert_eq!(state["manifest"]["data"]["log_level"], json!("info"));

        let seen = server.await.unwrap();
        assert_eq!(seen[1].body, seen[2].body);
    }
}
