//! `kubernetes_secret`

use super::{KubeResource, Operation, ProviderContext, immutable_replacement, resource_schema};
use crate::k8s::wait::{PollStatus, SHORT_POLL_INTERVAL, poll_until};
use crate::schema::{Attribute, ResourceSchema, Schema};
use crate::structure::helpers::{
    expand_base64_map, expand_byte_map, get_block, get_bool, get_str, get_string_map,
};
use crate::structure::{MetadataFilter, ObjectBuilder, expand_metadata, flatten_metadata, metadata_schema};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};
use serde_json::Value;
use std::collections::BTreeMap;

pub const SERVICE_ACCOUNT_TOKEN: &str = "kubernetes.io/service-account-token";

/// Keys the token controller writes into service account token secrets
const TOKEN_CONTROLLER_KEYS: &[&str] = &["ca.crt", "namespace", "token"];

pub struct SecretResource;

#[async_trait]
impl KubeResource for SecretResource {
    type Object = Secret;

    const TYPE_NAME: &'static str = "kubernetes_secret";
    const KIND: &'static str = "Secret";
    const NAMESPACED: bool = true;
    const LOCAL_ATTRIBUTES: &'static [&'static str] = &["wait_for_service_account_token"];

    fn api(&self, client: Client, namespace: Option<&str>) -> Api<Secret> {
        Api::namespaced(client, namespace.unwrap_or("default"))
    }

    fn schema(&self) -> ResourceSchema {
        resource_schema(
            Self::TYPE_NAME,
            Self::NAMESPACED,
            "Sensitive data such as passwords, tokens and keys",
            Schema::new()
                .attr("metadata", metadata_schema("secret", true))
                .attr(
                    "data",
                    Attribute::map()
                        .optional()
                        .sensitive()
                        .description("Secret data as plain text; encoded on the wire"),
                )
                .attr(
                    "binary_data",
                    Attribute::map()
                        .optional()
                        .sensitive()
                        .description("Binary secret data, values are base64 encoded"),
                )
                .attr(
                    "type",
                    Attribute::string()
                        .optional()
                        .force_new()
                        .default("Opaque")
                        .description("Type of secret, used to facilitate programmatic handling"),
                )
                .attr("immutable", Attribute::bool().optional())
                .attr(
                    "wait_for_service_account_token",
                    Attribute::bool()
                        .optional()
                        .default(true)
                        .description("Wait for the token controller to populate service account tokens"),
                ),
            true,
        )
    }

    fn replacement_paths(&self, prior: &Value, desired: &Value) -> Vec<String> {
        immutable_replacement(prior, desired, &["data", "binary_data"])
    }

    fn expand(&self, attrs: &Value) -> Result<Secret> {
        let mut data = expand_byte_map(get_string_map(attrs, "data")).unwrap_or_default();
        if let Some(binary) = expand_base64_map(get_string_map(attrs, "binary_data"), "binary_data")? {
            for (key, value) in binary {
                if data.contains_key(&key) {
                    return Err(Error::attribute(
                        format!("binary_data.{}", key),
                        "key is also set in data",
                    ));
                }
                data.insert(key, value);
            }
        }
        Ok(Secret {
            metadata: expand_metadata(attrs, true)?,
            data: (!data.is_empty()).then_some(data),
            type_: get_str(attrs, "type"),
            immutable: get_bool(attrs, "immutable"),
            ..Default::default()
        })
    }

    fn flatten(&self, object: &Secret, prior: &Value, filter: &MetadataFilter) -> Result<Value> {
        let metadata = flatten_metadata(&object.metadata, get_block(prior, "metadata"), filter, true);
        let prior_data = get_string_map(prior, "data").unwrap_or_default();
        let prior_binary = get_string_map(prior, "binary_data").unwrap_or_default();
        let token_secret = object.type_.as_deref() == Some(SERVICE_ACCOUNT_TOKEN);

        let mut data = BTreeMap::new();
        let mut binary = BTreeMap::new();
        for (key, value) in object.data.iter().flatten() {
            if token_secret && TOKEN_CONTROLLER_KEYS.contains(&key.as_str()) && !prior_data.contains_key(key) {
                continue;
            }
            match split_value(key, value, &prior_binary) {
                Ok(text) => data.insert(key.clone(), text),
                Err(encoded) => binary.insert(key.clone(), encoded),
            };
        }

        Ok(ObjectBuilder::new()
            .set_block("metadata", Some(metadata))
            .set_map("data", Some(&data))
            .set_map("binary_data", Some(&binary))
            .set_opt("type", object.type_.clone())
            .set_opt("immutable", object.immutable)
            .build())
    }

    async fn wait_ready(
        &self,
        ctx: &ProviderContext,
        api: &Api<Secret>,
        object: &Secret,
        attrs: &Value,
        op: Operation,
    ) -> Result<()> {
        if op != Operation::Create
            || object.type_.as_deref() != Some(SERVICE_ACCOUNT_TOKEN)
            || get_bool(attrs, "wait_for_service_account_token") == Some(false)
        {
            return Ok(());
        }
        let name = object.name_any();
        let what = format!("service account token in secret {}", name);
        let name = &name;
        poll_until(&what, ctx.timeouts.create(), SHORT_POLL_INTERVAL, || async move {
            let secret = api.get(name).await?;
            let has_token = secret
                .data
                .as_ref()
                .is_some_and(|d| d.get("token").is_some_and(|t| !t.0.is_empty()));
            if has_token {
                Ok(PollStatus::Ready(()))
            } else {
                Ok(PollStatus::Pending("token not populated yet".to_string()))
            }
        })
        .await
    }
}

/// Plain text when the key is not tracked as binary and decodes as UTF-8,
/// otherwise the base64 encoding
fn split_value(
    key: &str,
    value: &ByteString,
    prior_binary: &BTreeMap<String, String>,
) -> std::result::Result<String, String> {
    if prior_binary.contains_key(key) {
        return Err(STANDARD.encode(&value.0));
    }
    String::from_utf8(value.0.clone()).map_err(|_| STANDARD.encode(&value.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_and_binary_data_share_the_wire_map() {
        let attrs = json!({
            "metadata": [{"name": "db", "namespace": "prod"}],
            "data": {"password": "s3cret"},
            "binary_data": {"keystore": "/wA="},
            "type": "Opaque"
        });
        let secret = SecretResource.expand(&attrs).unwrap();
        let data = secret.data.as_ref().unwrap();
        assert_eq!(data["password"].0, b"s3cret".to_vec());
        assert_eq!(data["keystore"].0, vec![0xffu8, 0x00]);

        let flat = SecretResource
            .flatten(&secret, &attrs, &MetadataFilter::default())
            .unwrap();
        assert_eq!(flat, attrs);
    }

    #[test]
    fn test_imported_binary_values_stay_encoded() {
        let mut data = BTreeMap::new();
        data.insert("raw".to_string(), ByteString(vec![0xff, 0xfe]));
        data.insert("user".to_string(), ByteString(b"admin".to_vec()));
        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some("imported".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        let flat = SecretResource
            .flatten(&secret, &Value::Null, &MetadataFilter::default())
            .unwrap();
        assert_eq!(flat["data"], json!({"user": "admin"}));
        assert_eq!(flat["binary_data"], json!({"raw": "//4="}));
    }

    #[test]
    fn test_token_controller_keys_hidden() {
        let mut data = BTreeMap::new();
        data.insert("token".to_string(), ByteString(b"abc".to_vec()));
        data.insert("ca.crt".to_string(), ByteString(b"cert".to_vec()));
        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some("sa-token".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(data),
            type_: Some(SERVICE_ACCOUNT_TOKEN.to_string()),
            ..Default::default()
        };
        let flat = SecretResource
            .flatten(&secret, &Value::Null, &MetadataFilter::default())
            .unwrap();
        assert!(flat.get("data").is_none());
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let attrs = json!({
            "metadata": [{"name": "db"}],
            "data": {"k": "v"},
            "binary_data": {"k": "AA=="}
        });
        assert!(SecretResource.expand(&attrs).is_err());
    }
}
