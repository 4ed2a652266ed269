//! `kubernetes_stateful_set`

use super::{KubeResource, Operation, ProviderContext, resource_schema};
use crate::k8s::wait::{PollStatus, poll_until};
use crate::schema::{AttrKind, Attribute, ResourceSchema, Schema};
use crate::structure::helpers::{
    ObjectBuilder, get_block, get_blocks, get_bool, get_i64, get_str, get_string_list,
    get_string_map, string_map_value,
};
use crate::structure::metadata::nested_metadata_schema;
use crate::structure::pod::{expand_pod_template, flatten_pod_template, pod_template_schema};
use crate::structure::selectors::{expand_label_selector, flatten_label_selector, label_selector_schema};
use crate::structure::{MetadataFilter, expand_metadata, flatten_metadata, metadata_schema};
use crate::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{Api, Client, ResourceExt};
use serde_json::{Map, Value, json};
use tracing::debug;

pub struct StatefulSetResource;

fn claim_template_schema() -> Schema {
    Schema::new()
        .attr("metadata", nested_metadata_schema().required().min_items(1))
        .attr(
            "spec",
            Attribute::single_block(
                Schema::new()
                    .attr(
                        "access_modes",
                        Attribute::set_of(AttrKind::String).required(),
                    )
                    .attr("storage_class_name", Attribute::string().optional().computed())
                    .attr(
                        "resources",
                        Attribute::single_block(
                            Schema::new()
                                .attr("requests", Attribute::quantity_map().optional())
                                .attr("limits", Attribute::quantity_map().optional()),
                        )
                        .required()
                        .min_items(1),
                    ),
            )
            .required()
            .min_items(1),
        )
}

fn expand_claim_template(claim: &Value) -> Result<Value> {
    let mut meta = Map::new();
    if let Some(m) = get_block(claim, "metadata") {
        if let Some(name) = get_str(m, "name") {
            meta.insert("name".to_string(), json!(name));
        }
        if let Some(labels) = get_string_map(m, "labels") {
            meta.insert("labels".to_string(), string_map_value(&labels));
        }
        if let Some(annotations) = get_string_map(m, "annotations") {
            meta.insert("annotations".to_string(), string_map_value(&annotations));
        }
    }
    if !meta.contains_key("name") {
        return Err(Error::attribute(
            "spec.0.volume_claim_template.metadata.0.name",
            "claim templates need a name",
        ));
    }
    let spec = get_block(claim, "spec")
        .ok_or_else(|| Error::attribute("spec.0.volume_claim_template.spec", "block is required"))?;
    let mut out_spec = Map::new();
    if let Some(modes) = get_string_list(spec, "access_modes") {
        out_spec.insert("accessModes".to_string(), json!(modes));
    }
    if let Some(class) = get_str(spec, "storage_class_name") {
        out_spec.insert("storageClassName".to_string(), json!(class));
    }
    if let Some(res) = get_block(spec, "resources") {
        let mut resources = Map::new();
        if let Some(requests) = get_string_map(res, "requests") {
            resources.insert("requests".to_string(), string_map_value(&requests));
        }
        if let Some(limits) = get_string_map(res, "limits") {
            resources.insert("limits".to_string(), string_map_value(&limits));
        }
        out_spec.insert("resources".to_string(), Value::Object(resources));
    }
    Ok(json!({"metadata": meta, "spec": out_spec}))
}

fn flatten_claim_template(claim: &Value) -> Value {
    let meta = claim.get("metadata").unwrap_or(&Value::Null);
    let metadata = ObjectBuilder::new()
        .set_map("annotations", get_string_map(meta, "annotations").as_ref())
        .set_map("labels", get_string_map(meta, "labels").as_ref())
        .set_opt("name", get_str(meta, "name"))
        .build();
    let spec = claim.get("spec").unwrap_or(&Value::Null);
    let resources = spec.get("resources").map(|r| {
        ObjectBuilder::new()
            .set_map("requests", get_string_map(r, "requests").as_ref())
            .set_map("limits", get_string_map(r, "limits").as_ref())
            .build()
    });
    let spec = ObjectBuilder::new()
        .set_list("access_modes", get_string_list(spec, "accessModes").as_ref())
        .set_opt("storage_class_name", get_str(spec, "storageClassName"))
        .set_block("resources", resources)
        .build();
    ObjectBuilder::new()
        .set_block("metadata", Some(metadata))
        .set_block("spec", Some(spec))
        .build()
}

fn expand_spec(spec: &Value) -> Result<Value> {
    let mut out = Map::new();
    if let Some(replicas) = get_i64(spec, "replicas") {
        out.insert("replicas".to_string(), json!(replicas));
    }
    if let Some(selector) = get_block(spec, "selector") {
        out.insert("selector".to_string(), expand_label_selector(selector));
    }
    if let Some(service_name) = get_str(spec, "service_name") {
        out.insert("serviceName".to_string(), json!(service_name));
    }
    if let Some(policy) = get_str(spec, "pod_management_policy") {
        out.insert("podManagementPolicy".to_string(), json!(policy));
    }
    if let Some(limit) = get_i64(spec, "revision_history_limit") {
        out.insert("revisionHistoryLimit".to_string(), json!(limit));
    }
    if let Some(strategy) = get_block(spec, "update_strategy") {
        let mut s = Map::new();
        if let Some(kind) = get_str(strategy, "type") {
            s.insert("type".to_string(), json!(kind));
        }
        if let Some(rolling) = get_block(strategy, "rolling_update") {
            let partition = get_i64(rolling, "partition").unwrap_or(0);
            s.insert("rollingUpdate".to_string(), json!({"partition": partition}));
        }
        out.insert("updateStrategy".to_string(), Value::Object(s));
    }
    let template = get_block(spec, "template")
        .ok_or_else(|| Error::attribute("spec.0.template", "block is required"))?;
    out.insert("template".to_string(), expand_pod_template(template)?);
    let claims = get_blocks(spec, "volume_claim_template")
        .into_iter()
        .map(expand_claim_template)
        .collect::<Result<Vec<_>>>()?;
    if !claims.is_empty() {
        out.insert("volumeClaimTemplates".to_string(), Value::Array(claims));
    }
    Ok(Value::Object(out))
}

fn flatten_spec(spec: &Value, prior: Option<&Value>, filter: &MetadataFilter) -> Result<Value> {
    let update_strategy = spec.get("updateStrategy").map(|s| {
        let rolling = s.get("rollingUpdate").map(|r| {
            ObjectBuilder::new()
                .set("partition", get_i64(r, "partition").unwrap_or(0))
                .build()
        });
        ObjectBuilder::new()
            .set_opt("type", get_str(s, "type"))
            .set_block("rolling_update", rolling)
            .build()
    });
    let prior_template = prior.and_then(|p| get_block(p, "template"));
    let template = spec
        .get("template")
        .map(|t| flatten_pod_template(t, prior_template, filter))
        .transpose()?;
    let claims = spec
        .get("volumeClaimTemplates")
        .and_then(Value::as_array)
        .map(|claims| claims.iter().map(flatten_claim_template).collect())
        .unwrap_or_default();
    Ok(ObjectBuilder::new()
        .set_opt("replicas", get_i64(spec, "replicas"))
        .set_block("selector", spec.get("selector").map(flatten_label_selector))
        .set_opt("service_name", get_str(spec, "serviceName"))
        .set_opt("pod_management_policy", get_str(spec, "podManagementPolicy"))
        .set_opt("revision_history_limit", get_i64(spec, "revisionHistoryLimit"))
        .set_block("update_strategy", update_strategy)
        .set_block("template", template)
        .set_blocks("volume_claim_template", claims)
        .build())
}

/// `Ok` once every replica runs the current revision, otherwise the reason
fn rollout_status(sts: &StatefulSet) -> std::result::Result<(), String> {
    let Some(spec) = sts.spec.as_ref() else {
        return Ok(());
    };
    let Some(status) = sts.status.as_ref() else {
        return Err("no status reported yet".to_string());
    };
    let generation = sts.metadata.generation.unwrap_or(0);
    if status.observed_generation.unwrap_or(0) < generation {
        return Err(format!(
            "observed generation {} behind {}",
            status.observed_generation.unwrap_or(0),
            generation
        ));
    }
    let replicas = spec.replicas.unwrap_or(1);
    let strategy = spec.update_strategy.as_ref();
    if strategy.and_then(|s| s.type_.as_deref()) == Some("OnDelete") {
        let ready = status.ready_replicas.unwrap_or(0);
        return if ready >= replicas {
            Ok(())
        } else {
            Err(format!("{} of {} replicas ready", ready, replicas))
        };
    }
    let partition = strategy
        .and_then(|s| s.rolling_update.as_ref())
        .and_then(|r| r.partition)
        .unwrap_or(0);
    let expected_updated = (replicas - partition).max(0);
    let updated = status.updated_replicas.unwrap_or(0);
    let ready = status.ready_replicas.unwrap_or(0);
    if updated < expected_updated {
        return Err(format!("{} of {} replicas updated", updated, expected_updated));
    }
    if ready != replicas {
        return Err(format!("{} of {} replicas ready", ready, replicas));
    }
    if partition == 0 && status.current_revision != status.update_revision {
        return Err(format!(
            "revision {} not yet current",
            status.update_revision.as_deref().unwrap_or("(unknown)")
        ));
    }
    Ok(())
}

#[async_trait]
impl KubeResource for StatefulSetResource {
    type Object = StatefulSet;

    const TYPE_NAME: &'static str = "kubernetes_stateful_set";
    const KIND: &'static str = "StatefulSet";
    const NAMESPACED: bool = true;
    const LOCAL_ATTRIBUTES: &'static [&'static str] = &["wait_for_rollout"];

    fn api(&self, client: Client, namespace: Option<&str>) -> Api<StatefulSet> {
        Api::namespaced(client, namespace.unwrap_or("default"))
    }

    fn schema(&self) -> ResourceSchema {
        let update_strategy = Schema::new()
            .attr(
                "type",
                Attribute::string()
                    .optional()
                    .default("RollingUpdate")
                    .description("RollingUpdate or OnDelete"),
            )
            .attr(
                "rolling_update",
                Attribute::single_block(
                    Schema::new().attr("partition", Attribute::int().optional().default(0)),
                )
                .optional(),
            );
        let spec = Schema::new()
            .attr("replicas", Attribute::int().optional().default(1))
            .attr(
                "selector",
                label_selector_schema().required().min_items(1).force_new(),
            )
            .attr(
                "service_name",
                Attribute::string()
                    .required()
                    .force_new()
                    .description("Governing service responsible for the pods' network identity"),
            )
            .attr(
                "pod_management_policy",
                Attribute::string()
                    .optional()
                    .force_new()
                    .default("OrderedReady")
                    .description("OrderedReady or Parallel"),
            )
            .attr("revision_history_limit", Attribute::int().optional().computed())
            .attr(
                "update_strategy",
                Attribute::single_block(update_strategy).optional().computed(),
            )
            .attr("template", pod_template_schema())
            .attr(
                "volume_claim_template",
                Attribute::block(claim_template_schema()).optional().force_new(),
            );
        resource_schema(
            Self::TYPE_NAME,
            Self::NAMESPACED,
            "Workload with stable network identity and persistent storage per pod",
            Schema::new()
                .attr("metadata", metadata_schema("stateful set", true))
                .attr("spec", Attribute::single_block(spec).required().min_items(1))
                .attr(
                    "wait_for_rollout",
                    Attribute::bool()
                        .optional()
                        .default(true)
                        .description("Wait for the rollout to complete on create and update"),
                ),
            true,
        )
    }

    fn expand(&self, attrs: &Value) -> Result<StatefulSet> {
        let metadata = expand_metadata(attrs, true)?;
        let spec = get_block(attrs, "spec")
            .ok_or_else(|| Error::attribute("spec", "block is required"))?;
        let wire = json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": serde_json::to_value(&metadata)?,
            "spec": expand_spec(spec)?,
        });
        Ok(serde_json::from_value(wire)?)
    }

    fn flatten(&self, object: &StatefulSet, prior: &Value, filter: &MetadataFilter) -> Result<Value> {
        let metadata = flatten_metadata(&object.metadata, get_block(prior, "metadata"), filter, true);
        let spec = match object.spec.as_ref() {
            Some(spec) => Some(flatten_spec(
                &serde_json::to_value(spec)?,
                get_block(prior, "spec"),
                filter,
            )?),
            None => None,
        };
        Ok(ObjectBuilder::new()
            .set_block("metadata", Some(metadata))
            .set_block("spec", spec)
            .build())
    }

    async fn wait_ready(
        &self,
        ctx: &ProviderContext,
        api: &Api<StatefulSet>,
        object: &StatefulSet,
        attrs: &Value,
        op: Operation,
    ) -> Result<()> {
        if get_bool(attrs, "wait_for_rollout") == Some(false) {
            debug!("Not waiting for rollout of {}", object.name_any());
            return Ok(());
        }
        let timeout = match op {
            Operation::Create => ctx.timeouts.create(),
            Operation::Update => ctx.timeouts.update(),
        };
        let name = object.name_any();
        let what = format!("rollout of stateful set {}", name);
        let name = &name;
        poll_until(&what, timeout, ctx.timeouts.poll_interval(), || async move {
            let sts = api.get(name).await?;
            Ok(match rollout_status(&sts) {
                Ok(()) => PollStatus::Ready(()),
                Err(reason) => PollStatus::Pending(reason),
            })
        })
        .await
    }
}
