//! `kubernetes_resource_quota`

use super::{KubeResource, Operation, ProviderContext, resource_schema};
use crate::Result;
use crate::k8s::wait::{PollStatus, poll_until};
use crate::schema::{AttrKind, Attribute, ResourceSchema, Schema, quantity};
use crate::structure::helpers::{
    flatten_quantity_map, get_block, get_blocks, get_quantity_map, get_str, get_string_list,
};
use crate::structure::{MetadataFilter, ObjectBuilder, expand_metadata, flatten_metadata, metadata_schema};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ResourceQuota, ResourceQuotaSpec, ScopeSelector, ScopedResourceSelectorRequirement,
};
use kube::{Api, Client, ResourceExt};
use serde_json::Value;

pub struct ResourceQuotaResource;

fn expand_spec(spec: &Value) -> ResourceQuotaSpec {
    let scope_selector = get_block(spec, "scope_selector").map(|selector| ScopeSelector {
        match_expressions: Some(
            get_blocks(selector, "match_expression")
                .into_iter()
                .map(|expr| ScopedResourceSelectorRequirement {
                    scope_name: get_str(expr, "scope_name").unwrap_or_default(),
                    operator: get_str(expr, "operator").unwrap_or_default(),
                    values: get_string_list(expr, "values"),
                })
                .collect(),
        ),
    });
    ResourceQuotaSpec {
        hard: get_quantity_map(spec, "hard"),
        scopes: get_string_list(spec, "scopes"),
        scope_selector,
    }
}

fn flatten_spec(spec: &ResourceQuotaSpec) -> Value {
    let scope_selector = spec.scope_selector.as_ref().map(|selector| {
        let expressions = selector
            .match_expressions
            .iter()
            .flatten()
            .map(|expr| {
                ObjectBuilder::new()
                    .set("scope_name", expr.scope_name.clone())
                    .set("operator", expr.operator.clone())
                    .set_list("values", expr.values.as_ref())
                    .build()
            })
            .collect();
        ObjectBuilder::new().set_blocks("match_expression", expressions).build()
    });
    ObjectBuilder::new()
        .set_map("hard", flatten_quantity_map(spec.hard.as_ref()).as_ref())
        .set_list("scopes", spec.scopes.as_ref())
        .set_block("scope_selector", scope_selector)
        .build()
}

/// Whether the quota controller has caught up with `spec.hard`
fn status_matches(quota: &ResourceQuota) -> std::result::Result<(), String> {
    let wanted = quota.spec.as_ref().and_then(|s| s.hard.as_ref());
    let observed = quota.status.as_ref().and_then(|s| s.hard.as_ref());
    match (wanted, observed) {
        (None, _) => Ok(()),
        (Some(_), None) => Err("status.hard not populated yet".to_string()),
        (Some(wanted), Some(observed)) => {
            let pending: Vec<&str> = wanted
                .iter()
                .filter(|(k, v)| {
                    !observed
                        .get(*k)
                        .is_some_and(|o| quantity::equivalent(&o.0, &v.0))
                })
                .map(|(k, _)| k.as_str())
                .collect();
            if pending.is_empty() {
                Ok(())
            } else {
                Err(format!("waiting for {}", pending.join(", ")))
            }
        }
    }
}

#[async_trait]
impl KubeResource for ResourceQuotaResource {
    type Object = ResourceQuota;

    const TYPE_NAME: &'static str = "kubernetes_resource_quota";
    const KIND: &'static str = "ResourceQuota";
    const NAMESPACED: bool = true;

    fn api(&self, client: Client, namespace: Option<&str>) -> Api<ResourceQuota> {
        Api::namespaced(client, namespace.unwrap_or("default"))
    }

    fn schema(&self) -> ResourceSchema {
        let scope_selector = Schema::new().attr(
            "match_expression",
            Attribute::block(
                Schema::new()
                    .attr(
                        "scope_name",
                        Attribute::string()
                            .required()
                            .description("Name of the scope the selector applies to"),
                    )
                    .attr(
                        "operator",
                        Attribute::string()
                            .required()
                            .description("One of In, NotIn, Exists and DoesNotExist"),
                    )
                    .attr("values", Attribute::set_of(AttrKind::String).optional()),
            )
            .optional(),
        );
        let spec = Schema::new()
            .attr(
                "hard",
                Attribute::quantity_map()
                    .optional()
                    .description("Hard limit per named resource, as quantities"),
            )
            .attr("scopes", Attribute::set_of(AttrKind::String).optional())
            .attr(
                "scope_selector",
                Attribute::single_block(scope_selector).optional(),
            );
        resource_schema(
            Self::TYPE_NAME,
            Self::NAMESPACED,
            "Constraints that limit aggregate resource consumption per namespace",
            Schema::new()
                .attr("metadata", metadata_schema("resource quota", true))
                .attr("spec", Attribute::single_block(spec).optional()),
            true,
        )
    }

    fn expand(&self, attrs: &Value) -> Result<ResourceQuota> {
        Ok(ResourceQuota {
            metadata: expand_metadata(attrs, true)?,
            spec: get_block(attrs, "spec").map(expand_spec),
            ..Default::default()
        })
    }

    fn flatten(&self, object: &ResourceQuota, prior: &Value, filter: &MetadataFilter) -> Result<Value> {
        let metadata = flatten_metadata(&object.metadata, get_block(prior, "metadata"), filter, true);
        let spec = object
            .spec
            .as_ref()
            .map(flatten_spec)
            .filter(|s| s.as_object().is_some_and(|o| !o.is_empty()));
        Ok(ObjectBuilder::new()
            .set_block("metadata", Some(metadata))
            .set_block("spec", spec)
            .build())
    }

    async fn wait_ready(
        &self,
        ctx: &ProviderContext,
        api: &Api<ResourceQuota>,
        object: &ResourceQuota,
        _attrs: &Value,
        op: Operation,
    ) -> Result<()> {
        let timeout = match op {
            Operation::Create => ctx.timeouts.create(),
            Operation::Update => ctx.timeouts.update(),
        };
        let name = object.name_any();
        let what = format!("resource quota {}", name);
        let name = &name;
        poll_until(&what, timeout, crate::k8s::wait::SHORT_POLL_INTERVAL, || async move {
            let quota = api.get(name).await?;
            Ok(match status_matches(&quota) {
                Ok(()) => PollStatus::Ready(()),
                Err(pending) => PollStatus::Pending(pending),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ResourceQuotaStatus;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn attrs() -> Value {
        json!({
            "metadata": [{"name": "compute", "namespace": "team-a"}],
            "spec": [{
                "hard": {"pods": "10", "requests.cpu": "4"},
                "scope_selector": [{
                    "match_expression": [{"scope_name": "PriorityClass", "operator": "In", "values": ["high"]}]
                }]
            }]
        })
    }

    #[test]
    fn test_expand_flatten() {
        let quota = ResourceQuotaResource.expand(&attrs()).unwrap();
        let spec = quota.spec.as_ref().unwrap();
        assert_eq!(spec.hard.as_ref().unwrap()["pods"], Quantity("10".to_string()));
        let flat = ResourceQuotaResource
            .flatten(&quota, &attrs(), &MetadataFilter::default())
            .unwrap();
        assert_eq!(flat, attrs());
    }

    #[test]
    fn test_status_matches() {
        let mut quota = ResourceQuotaResource.expand(&attrs()).unwrap();
        assert!(status_matches(&quota).is_err());

        let mut hard = BTreeMap::new();
        hard.insert("pods".to_string(), Quantity("10".to_string()));
        quota.status = Some(ResourceQuotaStatus {
            hard: Some(hard.clone()),
            used: None,
        });
        assert_eq!(status_matches(&quota).unwrap_err(), "waiting for requests.cpu");

        hard.insert("requests.cpu".to_string(), Quantity("4".to_string()));
        quota.status = Some(ResourceQuotaStatus {
            hard: Some(hard),
            used: None,
        });
        assert!(status_matches(&quota).is_ok());
    }
}
