//! `kubernetes_config_map`

use super::{KubeResource, immutable_replacement, resource_schema};
use crate::Result;
use crate::schema::{Attribute, ResourceSchema, Schema};
use crate::structure::helpers::{
    expand_base64_map, flatten_base64_map, get_block, get_bool, get_string_map,
};
use crate::structure::{MetadataFilter, ObjectBuilder, expand_metadata, flatten_metadata, metadata_schema};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use serde_json::Value;

pub struct ConfigMapResource;

#[async_trait]
impl KubeResource for ConfigMapResource {
    type Object = ConfigMap;

    const TYPE_NAME: &'static str = "kubernetes_config_map";
    const KIND: &'static str = "ConfigMap";
    const NAMESPACED: bool = true;

    fn api(&self, client: Client, namespace: Option<&str>) -> Api<ConfigMap> {
        Api::namespaced(client, namespace.unwrap_or("default"))
    }

    fn schema(&self) -> ResourceSchema {
        resource_schema(
            Self::TYPE_NAME,
            Self::NAMESPACED,
            "Configuration data for pods to consume",
            Schema::new()
                .attr("metadata", metadata_schema("config map", true))
                .attr(
                    "data",
                    Attribute::map()
                        .optional()
                        .description("Configuration data, keys must be valid file names"),
                )
                .attr(
                    "binary_data",
                    Attribute::map()
                        .optional()
                        .description("Binary configuration data, values are base64 encoded"),
                )
                .attr(
                    "immutable",
                    Attribute::bool()
                        .optional()
                        .description("Data cannot be updated once set; changes replace the object"),
                ),
            false,
        )
    }

    fn replacement_paths(&self, prior: &Value, desired: &Value) -> Vec<String> {
        immutable_replacement(prior, desired, &["data", "binary_data"])
    }

    fn expand(&self, attrs: &Value) -> Result<ConfigMap> {
        Ok(ConfigMap {
            metadata: expand_metadata(attrs, true)?,
            data: get_string_map(attrs, "data"),
            binary_data: expand_base64_map(get_string_map(attrs, "binary_data"), "binary_data")?,
            immutable: get_bool(attrs, "immutable"),
        })
    }

    fn flatten(&self, object: &ConfigMap, prior: &Value, filter: &MetadataFilter) -> Result<Value> {
        let metadata = flatten_metadata(&object.metadata, get_block(prior, "metadata"), filter, true);
        Ok(ObjectBuilder::new()
            .set_block("metadata", Some(metadata))
            .set_map("data", object.data.as_ref())
            .set_map("binary_data", flatten_base64_map(object.binary_data.as_ref()).as_ref())
            .set_opt("immutable", object.immutable)
            .build())
    }
}
