//! `metadata` block shared by every resource type

use super::helpers::{ObjectBuilder, get_block, get_str, get_string_map};
use crate::diagnostics::Diagnostics;
use crate::schema::{Attribute, Schema};
use crate::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// Label and annotation keys dropped from flattened metadata
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub ignore_annotations: Vec<Regex>,
    pub ignore_labels: Vec<Regex>,
}

impl MetadataFilter {
    pub fn new(ignore_annotations: Vec<Regex>, ignore_labels: Vec<Regex>) -> Self {
        Self {
            ignore_annotations,
            ignore_labels,
        }
    }
}

/// Keys under `kubernetes.io` and `k8s.io` (or their subdomains) belong to the
/// cluster, e.g. `kubectl.kubernetes.io/last-applied-configuration`
pub fn is_internal_key(key: &str) -> bool {
    let Some((prefix, _)) = key.split_once('/') else {
        return false;
    };
    ["kubernetes.io", "k8s.io"]
        .iter()
        .any(|domain| prefix == *domain || prefix.ends_with(&format!(".{}", domain)))
}

/// The `metadata` block schema
pub fn metadata_schema(object_kind: &str, namespaced: bool) -> Attribute {
    let mut block = Schema::new()
        .attr(
            "annotations",
            Attribute::map()
                .optional()
                .description(format!("Unstructured key value map stored with the {}", object_kind)),
        )
        .attr(
            "labels",
            Attribute::map()
                .optional()
                .description(format!("Map of string keys and values used to organize and categorize the {}", object_kind)),
        )
        .attr(
            "name",
            Attribute::string()
                .optional()
                .computed()
                .force_new()
                .description(format!("Name of the {}, must be unique", object_kind)),
        )
        .attr(
            "generate_name",
            Attribute::string()
                .optional()
                .force_new()
                .description("Prefix used by the server to generate a unique name"),
        )
        .attr("generation", Attribute::int().computed())
        .attr("resource_version", Attribute::string().computed())
        .attr("uid", Attribute::string().computed());
    if namespaced {
        block = block.attr(
            "namespace",
            Attribute::string()
                .optional()
                .force_new()
                .default("default")
                .description(format!("Namespace that contains the {}", object_kind)),
        );
    }
    Attribute::single_block(block)
        .required()
        .min_items(1)
        .description(format!("Standard {}'s metadata", object_kind))
}

/// Configuration may set `name` or `generate_name`, not both
pub fn validate_metadata(attrs: &Value) -> Diagnostics {
    let mut diags = Diagnostics::new();
    if let Some(block) = get_block(attrs, "metadata")
        && get_str(block, "name").is_some()
        && get_str(block, "generate_name").is_some()
    {
        diags.error(
            "Conflicting configuration arguments",
            "\"generate_name\" cannot be set together with \"name\"",
            Some("metadata.0.generate_name"),
        );
    }
    diags
}

/// Expand the first `metadata` block of a resource
pub fn expand_metadata(attrs: &Value, namespaced: bool) -> Result<ObjectMeta> {
    let block = get_block(attrs, "metadata")
        .ok_or_else(|| Error::attribute("metadata", "block is required"))?;
    expand_metadata_block(block, namespaced)
}

/// A name already assigned by the server wins over `generate_name`, which
/// state keeps alongside it
pub fn expand_metadata_block(block: &Value, namespaced: bool) -> Result<ObjectMeta> {
    let name = get_str(block, "name");
    let generate_name = get_str(block, "generate_name").filter(|_| name.is_none());
    let namespace = if namespaced {
        Some(get_str(block, "namespace").unwrap_or_else(|| "default".to_string()))
    } else {
        None
    };
    Ok(ObjectMeta {
        name,
        generate_name,
        namespace,
        labels: get_string_map(block, "labels"),
        annotations: get_string_map(block, "annotations"),
        ..Default::default()
    })
}

fn filter_keys(
    map: Option<&BTreeMap<String, String>>,
    configured: Option<BTreeMap<String, String>>,
    ignore: &[Regex],
) -> Option<BTreeMap<String, String>> {
    let configured = configured.unwrap_or_default();
    let filtered: BTreeMap<String, String> = map?
        .iter()
        .filter(|(k, _)| configured.contains_key(*k) || !is_internal_key(k))
        .filter(|(k, _)| !ignore.iter().any(|re| re.is_match(k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!filtered.is_empty()).then_some(filtered)
}

/// Flatten server metadata into a `metadata` block. `prior` is the previous
/// block (state or config) and decides which internal keys stay visible.
pub fn flatten_metadata(
    meta: &ObjectMeta,
    prior: Option<&Value>,
    filter: &MetadataFilter,
    namespaced: bool,
) -> Value {
    let empty = Value::Null;
    let prior = prior.unwrap_or(&empty);
    let annotations = filter_keys(
        meta.annotations.as_ref(),
        get_string_map(prior, "annotations"),
        &filter.ignore_annotations,
    );
    let labels = filter_keys(
        meta.labels.as_ref(),
        get_string_map(prior, "labels"),
        &filter.ignore_labels,
    );

    let mut builder = ObjectBuilder::new()
        .set_map("annotations", annotations.as_ref())
        .set_map("labels", labels.as_ref())
        .set_opt("name", meta.name.clone())
        .set_opt("generation", meta.generation)
        .set_opt("resource_version", meta.resource_version.clone())
        .set_opt("uid", meta.uid.clone())
        .carry("generate_name", prior);
    if namespaced {
        builder = builder.set_opt("namespace", meta.namespace.clone());
    }
    builder.build()
}

/// Flatten metadata nested inside another object (e.g. a pod template), which
/// carries only labels, annotations and name
pub fn flatten_nested_metadata(meta: &ObjectMeta, prior: Option<&Value>, filter: &MetadataFilter) -> Value {
    let empty = Value::Null;
    let prior = prior.unwrap_or(&empty);
    let annotations = filter_keys(
        meta.annotations.as_ref(),
        get_string_map(prior, "annotations"),
        &filter.ignore_annotations,
    );
    let labels = filter_keys(
        meta.labels.as_ref(),
        get_string_map(prior, "labels"),
        &filter.ignore_labels,
    );
    ObjectBuilder::new()
        .set_map("annotations", annotations.as_ref())
        .set_map("labels", labels.as_ref())
        .set_opt("name", meta.name.clone())
        .build()
}

/// Schema of nested metadata blocks (pod templates, claim templates)
pub fn nested_metadata_schema() -> Attribute {
    Attribute::single_block(
        Schema::new()
            .attr("annotations", Attribute::map().optional())
            .attr("labels", Attribute::map().optional())
            .attr("name", Attribute::string().optional()),
    )
    .optional()
}
