//! `kubernetes_namespace`

use super::{KubeResource, Operation, ProviderContext, resource_schema};
use crate::Result;
use crate::k8s::wait::{PollStatus, SHORT_POLL_INTERVAL, poll_until};
use crate::schema::{Attribute, ResourceSchema, Schema};
use crate::structure::helpers::{get_block, get_bool};
use crate::structure::{MetadataFilter, ObjectBuilder, expand_metadata, flatten_metadata, metadata_schema};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use kube::{Api, Client, ResourceExt};
use serde_json::Value;

pub struct NamespaceResource;

#[async_trait]
impl KubeResource for NamespaceResource {
    type Object = Namespace;

    const TYPE_NAME: &'static str = "kubernetes_namespace";
    const KIND: &'static str = "Namespace";
    const NAMESPACED: bool = false;
    const LOCAL_ATTRIBUTES: &'static [&'static str] = &["wait_for_default_service_account"];

    fn api(&self, client: Client, _namespace: Option<&str>) -> Api<Namespace> {
        Api::all(client)
    }

    fn schema(&self) -> ResourceSchema {
        resource_schema(
            Self::TYPE_NAME,
            Self::NAMESPACED,
            "Namespaces partition the cluster into virtual clusters",
            Schema::new()
                .attr("metadata", metadata_schema("namespace", false))
                .attr(
                    "wait_for_default_service_account",
                    Attribute::bool()
                        .optional()
                        .default(false)
                        .description("Wait for the default service account to be created"),
                ),
            true,
        )
    }

    fn expand(&self, attrs: &Value) -> Result<Namespace> {
        Ok(Namespace {
            metadata: expand_metadata(attrs, false)?,
            ..Default::default()
        })
    }

    fn flatten(&self, object: &Namespace, prior: &Value, filter: &MetadataFilter) -> Result<Value> {
        let metadata = flatten_metadata(&object.metadata, get_block(prior, "metadata"), filter, false);
        Ok(ObjectBuilder::new().set_block("metadata", Some(metadata)).build())
    }

    async fn wait_ready(
        &self,
        ctx: &ProviderContext,
        _api: &Api<Namespace>,
        object: &Namespace,
        attrs: &Value,
        op: Operation,
    ) -> Result<()> {
        if op != Operation::Create || get_bool(attrs, "wait_for_default_service_account") != Some(true) {
            return Ok(());
        }
        let name = object.name_any();
        let accounts: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), &name);
        let what = format!("default service account in {}", name);
        let accounts = &accounts;
        poll_until(&what, ctx.timeouts.create(), SHORT_POLL_INTERVAL, || async move {
            match accounts.get_opt("default").await? {
                Some(_) => Ok(PollStatus::Ready(())),
                None => Ok(PollStatus::Pending("service account not created yet".to_string())),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_expand_flatten() {
        let attrs = json!({
            "metadata": [{"name": "team-a", "labels": {"team": "a"}}],
            "wait_for_default_service_account": true
        });
        let mut ns = NamespaceResource.expand(&attrs).unwrap();
        assert_eq!(ns.metadata.name.as_deref(), Some("team-a"));
        assert!(ns.metadata.namespace.is_none());

        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "a".to_string());
        labels.insert("kubernetes.io/metadata.name".to_string(), "team-a".to_string());
        ns.metadata.labels = Some(labels);
        ns.metadata.uid = Some("u-1".to_string());

        let flat = NamespaceResource
            .flatten(&ns, &attrs, &MetadataFilter::default())
            .unwrap();
        assert_eq!(
            flat,
            json!({"metadata": [{"name": "team-a", "labels": {"team": "a"}, "uid": "u-1"}]})
        );
    }
}
