//! Resource types and the CRUD glue shared by all of them

pub mod config_map;
pub mod ingress;
pub mod manifest;
pub mod namespace;
pub mod resource_quota;
pub mod secret;
pub mod service;
pub mod stateful_set;
pub mod webhook;

use crate::config::Timeouts;
use crate::diagnostics::Diagnostics;
use crate::k8s::errors::is_conflict;
use crate::k8s::{ids, patch_diff, retry, to_json_patch, wait_for_deletion};
use crate::schema::{OperationTimeouts, ResourceSchema, Schema};
use crate::structure::{MetadataFilter, validate_metadata};
use crate::{Error, Result};
use async_trait::async_trait;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything a CRUD callback needs to reach the cluster
#[derive(Clone)]
pub struct ProviderContext {
    pub client: Client,
    pub timeouts: Timeouts,
    pub filter: MetadataFilter,
}

impl ProviderContext {
    pub fn new(client: Client, timeouts: Timeouts, filter: MetadataFilter) -> Self {
        Self {
            client,
            timeouts,
            filter,
        }
    }

    /// Copy whose create/update/delete timeouts follow a resource's
    /// `timeouts` block, where one is set
    pub fn with_resource_timeouts(&self, attrs: &Value) -> Result<Self> {
        let overrides = OperationTimeouts::from_attrs(attrs)?;
        let mut ctx = self.clone();
        let secs = |d: Option<Duration>, fallback: u64| d.map_or(fallback, |d| d.as_secs());
        ctx.timeouts.create = secs(overrides.create, ctx.timeouts.create);
        ctx.timeouts.update = secs(overrides.update, ctx.timeouts.update);
        ctx.timeouts.delete = secs(overrides.delete, ctx.timeouts.delete);
        Ok(ctx)
    }
}

/// Which write a wait hook follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
}

/// A resource type as the plan/apply driver sees it
#[async_trait]
pub trait ResourceType: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    /// Checks beyond what the schema can express
    fn validate(&self, _attrs: &Value) -> Diagnostics {
        Diagnostics::new()
    }

    /// Attribute paths whose change forces replacement even though the
    /// attribute is not `force_new` in the schema
    fn replacement_paths(&self, _prior: &Value, _desired: &Value) -> Vec<String> {
        Vec::new()
    }

    /// Create the object, returning its ID and the attributes read back
    async fn create(&self, ctx: &ProviderContext, desired: &Value) -> Result<(String, Value)>;

    /// `None` when the object is gone
    async fn read(&self, ctx: &ProviderContext, id: &str, prior: &Value) -> Result<Option<Value>>;

    async fn update(
        &self,
        ctx: &ProviderContext,
        id: &str,
        prior: &Value,
        desired: &Value,
    ) -> Result<Value>;

    async fn delete(&self, ctx: &ProviderContext, id: &str) -> Result<()>;

    async fn exists(&self, ctx: &ProviderContext, id: &str) -> Result<bool>;

    async fn import(&self, ctx: &ProviderContext, id: &str) -> Result<Option<Value>> {
        self.read(ctx, id, &Value::Null).await
    }
}

/// A resource type backed by one typed Kubernetes object. [`Typed`] turns
/// it into a [`ResourceType`].
#[async_trait]
pub trait KubeResource: Send + Sync + 'static {
    type Object: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    const TYPE_NAME: &'static str;
    const KIND: &'static str;
    const NAMESPACED: bool;
    /// Attributes kept only in state, such as wait toggles
    const LOCAL_ATTRIBUTES: &'static [&'static str] = &[];

    fn api(&self, client: Client, namespace: Option<&str>) -> Api<Self::Object>;

    fn schema(&self) -> ResourceSchema;

    fn expand(&self, attrs: &Value) -> Result<Self::Object>;

    fn flatten(&self, object: &Self::Object, prior: &Value, filter: &MetadataFilter)
    -> Result<Value>;

    fn validate(&self, _attrs: &Value) -> Diagnostics {
        Diagnostics::new()
    }

    fn replacement_paths(&self, _prior: &Value, _desired: &Value) -> Vec<String> {
        Vec::new()
    }

    /// Block until the object written by `op` is usable
    async fn wait_ready(
        &self,
        _ctx: &ProviderContext,
        _api: &Api<Self::Object>,
        _object: &Self::Object,
        _attrs: &Value,
        _op: Operation,
    ) -> Result<()> {
        Ok(())
    }
}

/// Generic CRUD over a [`KubeResource`]
pub struct Typed<R>(pub R);

impl<R: KubeResource> Typed<R> {
    fn display_id(id: &str) -> String {
        format!("{} {}", R::KIND, id)
    }

    /// Fill state-only attributes from the prior value or the schema default
    fn carry_local(&self, prior: &Value, attrs: &mut Value) {
        let schema = self.0.schema();
        let Some(out) = attrs.as_object_mut() else {
            return;
        };
        let timeouts = schema.timeouts.then_some("timeouts");
        for key in R::LOCAL_ATTRIBUTES.iter().copied().chain(timeouts) {
            let value = prior
                .get(key)
                .filter(|v| !v.is_null())
                .cloned()
                .or_else(|| schema.block.get(key).and_then(|a| a.default.clone()));
            if let Some(v) = value {
                out.insert(key.to_string(), v);
            }
        }
    }

    async fn read_back(&self, ctx: &ProviderContext, id: &str, prior: &Value) -> Result<Value> {
        self.read(ctx, id, prior).await?.ok_or_else(|| Error::NotFound {
            kind: R::KIND.to_string(),
            id: id.to_string(),
        })
    }
}

#[async_trait]
impl<R: KubeResource> ResourceType for Typed<R> {
    fn type_name(&self) -> &'static str {
        R::TYPE_NAME
    }

    fn schema(&self) -> ResourceSchema {
        self.0.schema()
    }

    fn validate(&self, attrs: &Value) -> Diagnostics {
        let mut diags = validate_metadata(attrs);
        diags.extend(self.0.validate(attrs));
        diags
    }

    fn replacement_paths(&self, prior: &Value, desired: &Value) -> Vec<String> {
        self.0.replacement_paths(prior, desired)
    }

    async fn create(&self, ctx: &ProviderContext, desired: &Value) -> Result<(String, Value)> {
        let object = self.0.expand(desired)?;
        let namespace = object.meta().namespace.clone();
        let api = self.0.api(ctx.client.clone(), namespace.as_deref());

        info!("Creating {} {}", R::KIND, object.meta().name.as_deref().unwrap_or("(generated)"));
        let created = match api.create(&PostParams::default(), &object).await {
            Ok(created) => created,
            Err(err) if is_conflict(&err) => {
                return Err(Error::AlreadyExists {
                    kind: R::KIND.to_string(),
                    name: object.meta().name.clone().unwrap_or_default(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let id = ids::id_for(created.meta(), R::NAMESPACED);
        debug!("Created {} with uid {:?}", id, created.meta().uid);

        self.0
            .wait_ready(ctx, &api, &created, desired, Operation::Create)
            .await?;
        let attrs = self.read_back(ctx, &id, desired).await?;
        Ok((id, attrs))
    }

    async fn read(&self, ctx: &ProviderContext, id: &str, prior: &Value) -> Result<Option<Value>> {
        let (namespace, name) = ids::parse_id(id, R::NAMESPACED)?;
        let api = self.0.api(ctx.client.clone(), namespace.as_deref());
        debug!("Reading {}", Self::display_id(id));
        let Some(object) = api.get_opt(&name).await? else {
            warn!("{} not found, removing from state", Self::display_id(id));
            return Ok(None);
        };
        let mut attrs = self.0.flatten(&object, prior, &ctx.filter)?;
        self.carry_local(prior, &mut attrs);
        Ok(Some(attrs))
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        id: &str,
        prior: &Value,
        desired: &Value,
    ) -> Result<Value> {
        let (namespace, name) = ids::parse_id(id, R::NAMESPACED)?;
        let api = self.0.api(ctx.client.clone(), namespace.as_deref());

        let old = serde_json::to_value(self.0.expand(prior)?)?;
        let new = serde_json::to_value(self.0.expand(desired)?)?;
        let ops = patch_diff(&old, &new);
        if ops.is_empty() {
            debug!("No API changes for {}", Self::display_id(id));
        } else {
            info!("Updating {} ({} patch operations)", Self::display_id(id), ops.len());
            let patch = Patch::Json::<()>(to_json_patch(&ops)?);
            let what = format!("update of {}", Self::display_id(id));
            let (patch, target) = (&patch, &api);
            let name = &name;
            let updated = retry(&what, ctx.timeouts.update(), ctx.timeouts.poll_interval(), || async move {
                Ok(target.patch(name, &PatchParams::default(), patch).await?)
            })
            .await?;
            self.0
                .wait_ready(ctx, &api, &updated, desired, Operation::Update)
                .await?;
        }
        self.read_back(ctx, id, desired).await
    }

    async fn delete(&self, ctx: &ProviderContext, id: &str) -> Result<()> {
        let (namespace, name) = ids::parse_id(id, R::NAMESPACED)?;
        let api = self.0.api(ctx.client.clone(), namespace.as_deref());
        info!("Deleting {}", Self::display_id(id));
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(err) if crate::k8s::errors::is_not_found(&err) => {
                debug!("{} already gone", Self::display_id(id));
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
        wait_for_deletion(&api, &name, ctx.timeouts.delete()).await
    }

    async fn exists(&self, ctx: &ProviderContext, id: &str) -> Result<bool> {
        let (namespace, name) = ids::parse_id(id, R::NAMESPACED)?;
        let api = self.0.api(ctx.client.clone(), namespace.as_deref());
        let object = api.get_opt(&name).await?;
        if let Some(obj) = &object {
            debug!("{} exists (resourceVersion {:?})", Self::display_id(id), obj.resource_version());
        }
        Ok(object.is_some())
    }
}

/// Assemble the schema of a resource type; `timeouts` adds the optional
/// `timeouts` block overriding the configured operation timeouts
pub(crate) fn resource_schema(
    type_name: &str,
    namespaced: bool,
    description: &str,
    block: Schema,
    timeouts: bool,
) -> ResourceSchema {
    let block = if timeouts {
        block.attr("timeouts", OperationTimeouts::block())
    } else {
        block
    };
    ResourceSchema {
        type_name: type_name.to_string(),
        version: 0,
        namespaced,
        description: description.to_string(),
        block,
        timeouts,
    }
}

/// Paths forcing replacement of an object marked `immutable`: once the prior
/// object is immutable, any change to `keys` needs a new object
pub(crate) fn immutable_replacement(prior: &Value, desired: &Value, keys: &[&str]) -> Vec<String> {
    if prior.get("immutable").and_then(Value::as_bool) != Some(true) {
        return Vec::new();
    }
    keys.iter()
        .chain(std::iter::once(&"immutable"))
        .filter(|key| {
            let old = prior.get(**key).filter(|v| !crate::schema::is_unset(Some(v)));
            let new = desired.get(**key).filter(|v| !crate::schema::is_unset(Some(v)));
            old != new
        })
        .map(|key| key.to_string())
        .collect()
}

/// Registry of every resource type the provider serves
pub struct Provider {
    resources: BTreeMap<&'static str, Box<dyn ResourceType>>,
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider {
    pub fn new() -> Self {
        let mut provider = Self {
            resources: BTreeMap::new(),
        };
        provider.register(Typed(namespace::NamespaceResource));
        provider.register(Typed(config_map::ConfigMapResource));
        provider.register(Typed(secret::SecretResource));
        provider.register(Typed(service::ServiceResource));
        provider.register(Typed(ingress::IngressResource));
        provider.register(Typed(stateful_set::StatefulSetResource));
        provider.register(Typed(resource_quota::ResourceQuotaResource));
        provider.register(Typed(webhook::ValidatingWebhookResource));
        provider.register(Typed(webhook::MutatingWebhookResource));
        provider.register(manifest::ManifestResource);
        provider
    }

    fn register(&mut self, resource: impl ResourceType + 'static) {
        self.resources.insert(resource.type_name(), Box::new(resource));
    }

    pub fn get(&self, type_name: &str) -> Result<&dyn ResourceType> {
        self.resources
            .get(type_name)
            .map(|r| r.as_ref())
            .ok_or_else(|| Error::UnknownResourceType(type_name.to_string()))
    }

    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.resources.keys().copied()
    }

    pub fn schemas(&self) -> Vec<ResourceSchema> {
        self.resources.values().map(|r| r.schema()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::testing::{exchange, scripted, status};
    use super::config_map::ConfigMapResource;
    use serde_json::json;

    const COLLECTION: &str = "/api/v1/namespaces/default/configmaps";
    const OBJECT: &str = "/api/v1/namespaces/default/configmaps/app";

    fn attrs(level: &str) -> Value {
        json!({
            "metadata": [{"name": "app", "namespace": "default"}],
            "data": {"log_level": level}
        })
    }

    fn server_object(level: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "app", "namespace": "default", "uid": "7f1c", "resourceVersion": "42"},
            "data": {"log_level": level}
        })
    }

    fn context(client: Client) -> ProviderContext {
        ProviderContext::new(client, Timeouts::default(), MetadataFilter::default())
    }

    #[test]
    fn test_registry() {
        let provider = Provider::new();
        let names: Vec<_> = provider.type_names().collect();
        assert_eq!(names.len(), 10);
        assert!(names.contains(&"kubernetes_config_map"));
        assert!(names.contains(&"kubernetes_manifest"));
        assert!(matches!(
            provider.get("kubernetes_deployment"),
            Err(Error::UnknownResourceType(_))
        ));
    }

    #[test]
    fn test_schemas_are_consistent() {
        let provider = Provider::new();
        for schema in provider.schemas() {
            let resource = provider.get(&schema.type_name).unwrap();
            assert_eq!(resource.type_name(), schema.type_name);
            assert_eq!(schema.block.get("timeouts").is_some(), schema.timeouts);
            if schema.type_name != "kubernetes_manifest" {
                let metadata = schema.block.get("metadata").unwrap();
                assert!(metadata.required, "{} metadata", schema.type_name);
                assert_eq!(
                    metadata.block_schema().unwrap().get("namespace").is_some(),
                    schema.namespaced
                );
            }
        }
    }

    #[test]
    fn test_immutable_replacement() {
        let prior = json!({"immutable": true, "data": {"a": "1"}});
        assert!(immutable_replacement(&prior, &prior, &["data"]).is_empty());

        let desired = json!({"immutable": true, "data": {"a": "2"}});
        assert_eq!(immutable_replacement(&prior, &desired, &["data"]), vec!["data"]);

        let desired = json!({"data": {"a": "1"}});
        assert_eq!(immutable_replacement(&prior, &desired, &["data"]), vec!["immutable"]);

        let mutable = json!({"data": {"a": "1"}});
        assert!(immutable_replacement(&mutable, &desired, &["data"]).is_empty());
    }

    #[tokio::test]
    async fn test_create_reads_back() {
        let (client, server) = scripted(vec![
            exchange("POST", COLLECTION, 201, server_object("debug")),
            exchange("GET", OBJECT, 200, server_object("debug")),
        ]);
        let resource = Typed(ConfigMapResource);
        let (id, state) = resource.create(&context(client), &attrs("debug")).await.unwrap();
        assert_eq!(id, "default/app");
        assert_eq!(state["metadata"][0]["uid"], json!("7f1c"));

        let seen = server.await.unwrap();
        assert_eq!(seen[0].body.as_ref().unwrap()["data"], json!({"log_level": "debug"}));
    }

    #[tokio::test]
    async fn test_create_conflict_is_already_exists() {
        let (client, server) = scripted(vec![exchange(
            "POST",
            COLLECTION,
            409,
            status(409, "AlreadyExists"),
        )]);
        let err = Typed(ConfigMapResource)
            .create(&context(client), &attrs("debug"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, Error::AlreadyExists { kind, name } if kind == "ConfigMap" && name == "app"),
            "{err}"
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_missing_object_is_none() {
        let (client, server) = scripted(vec![exchange("GET", OBJECT, 404, status(404, "NotFound"))]);
        let read = Typed(ConfigMapResource)
            .read(&context(client), "default/app", &attrs("debug"))
            .await
            .unwrap();
        assert!(read.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_update_without_api_changes_only_reads() {
        let (client, server) = scripted(vec![exchange("GET", OBJECT, 200, server_object("debug"))]);
        let state = Typed(ConfigMapResource)
            .update(&context(client), "default/app", &attrs("debug"), &attrs("debug"))
            .await
            .unwrap();
        assert_eq!(state["data"], json!({"log_level": "debug"}));
        let seen = server.await.unwrap();
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn test_update_sends_json_patch() {
        let (client, server) = scripted(vec![
            exchange("PATCH", OBJECT, 200, server_object("info")),
            exchange("GET", OBJECT, 200, server_object("info")),
        ]);
        let state = Typed(ConfigMapResource)
            .update(&context(client), "default/app", &attrs("debug"), &attrs("info"))
            .await
            .unwrap();
        assert_eq!(state["data"], json!({"log_level": "info"}));

        let seen = server.await.unwrap();
        assert_eq!(
            seen[0].body,
            Some(json!([{"op": "replace", "path": "/data/log_level", "value": "info"}]))
        );
        assert_eq!(seen[1].method, "GET");
    }

    #[tokio::test]
    async fn test_delete_of_missing_object_succeeds() {
        let (client, server) = scripted(vec![exchange("DELETE", OBJECT, 404, status(404, "NotFound"))]);
        Typed(ConfigMapResource)
            .delete(&context(client), "default/app")
            .await
            .unwrap();
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resource_timeouts_override_settings() {
        let (client, _server) = scripted(Vec::new());
        let ctx = context(client);
        let attrs = json!({"timeouts": [{"create": "10m", "delete": "30s"}]});
        let scoped = ctx.with_resource_timeouts(&attrs).unwrap();
        assert_eq!(scoped.timeouts.create(), Duration::from_secs(600));
        assert_eq!(scoped.timeouts.update(), ctx.timeouts.update());
        assert_eq!(scoped.timeouts.delete(), Duration::from_secs(30));

        let unchanged = ctx.with_resource_timeouts(&json!({})).unwrap();
        assert_eq!(unchanged.timeouts, ctx.timeouts);
    }

    #[test]
    fn test_timeouts_block_is_carried_into_state() {
        let resource = Typed(super::namespace::NamespaceResource);
        let prior = json!({"timeouts": [{"delete": "20m"}]});
        let mut attrs = json!({"metadata": [{"name": "team-a"}]});
        resource.carry_local(&prior, &mut attrs);
        assert_eq!(attrs["timeouts"], json!([{"delete": "20m"}]));
    }
}
