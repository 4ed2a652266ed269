//! `kubernetes_validating_webhook_configuration` and
//! `kubernetes_mutating_webhook_configuration`

use super::{KubeResource, resource_schema};
use crate::diagnostics::Diagnostics;
use crate::schema::{AttrKind, Attribute, ResourceSchema, Schema};
use crate::structure::helpers::{
    ObjectBuilder, get_block, get_blocks, get_i64, get_str, get_string_list,
};
use crate::structure::selectors::{expand_label_selector, flatten_label_selector, label_selector_schema};
use crate::structure::{MetadataFilter, expand_metadata, flatten_metadata, metadata_schema};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Api, Client};
use serde_json::{Map, Value, json};

const API_VERSION: &str = "admissionregistration.k8s.io/v1";

pub struct ValidatingWebhookResource;
pub struct MutatingWebhookResource;

fn webhook_schema(mutating: bool) -> Schema {
    let service = Schema::new()
        .attr("namespace", Attribute::string().required())
        .attr("name", Attribute::string().required())
        .attr("path", Attribute::string().optional())
        .attr("port", Attribute::int().optional().default(443));
    let client_config = Schema::new()
        .attr(
            "ca_bundle",
            Attribute::string()
                .optional()
                .description("PEM encoded CA bundle used to validate the webhook's server certificate"),
        )
        .attr(
            "url",
            Attribute::string()
                .optional()
                .description("Location of the webhook as https://host:port/path"),
        )
        .attr("service", Attribute::single_block(service).optional());
    let rule = Schema::new()
        .attr("api_groups", Attribute::list_of(AttrKind::String).required())
        .attr("api_versions", Attribute::list_of(AttrKind::String).required())
        .attr(
            "operations",
            Attribute::list_of(AttrKind::String)
                .required()
                .description("CREATE, UPDATE, DELETE, CONNECT or *"),
        )
        .attr("resources", Attribute::list_of(AttrKind::String).required())
        .attr(
            "scope",
            Attribute::string()
                .optional()
                .default("*")
                .description("Cluster, Namespaced or *"),
        );
    let mut webhook = Schema::new()
        .attr(
            "name",
            Attribute::string()
                .required()
                .description("Fully qualified name of the admission webhook"),
        )
        .attr(
            "admission_review_versions",
            Attribute::list_of(AttrKind::String)
                .optional()
                .default(json!(["v1"])),
        )
        .attr(
            "client_config",
            Attribute::single_block(client_config).required().min_items(1),
        )
        .attr(
            "failure_policy",
            Attribute::string().optional().default("Fail").description("Ignore or Fail"),
        )
        .attr(
            "match_policy",
            Attribute::string()
                .optional()
                .default("Equivalent")
                .description("Exact or Equivalent"),
        )
        .attr("namespace_selector", label_selector_schema().optional())
        .attr("object_selector", label_selector_schema().optional())
        .attr("rule", Attribute::block(rule).optional())
        .attr(
            "side_effects",
            Attribute::string()
                .optional()
                .default("None")
                .description("None or NoneOnDryRun"),
        )
        .attr("timeout_seconds", Attribute::int().optional().default(10));
    if mutating {
        webhook = webhook.attr(
            "reinvocation_policy",
            Attribute::string()
                .optional()
                .default("Never")
                .description("Never or IfNeeded"),
        );
    }
    Schema::new()
        .attr("metadata", metadata_schema("webhook configuration", false))
        .attr("webhook", Attribute::block(webhook).required().min_items(1))
}

fn validate_webhooks(attrs: &Value) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for (i, webhook) in get_blocks(attrs, "webhook").into_iter().enumerate() {
        let Some(config) = get_block(webhook, "client_config") else {
            continue;
        };
        let url = get_str(config, "url");
        let service = get_block(config, "service");
        if url.is_some() == service.is_some() {
            diags.error(
                "Invalid client_config",
                "exactly one of url or service must be set",
                Some(&format!("webhook.{}.client_config.0", i)),
            );
        }
        if let Some(url) = url
            && !url.starts_with("https://")
        {
            diags.error(
                "Invalid webhook URL",
                format!("{:?} must use the https scheme", url),
                Some(&format!("webhook.{}.client_config.0.url", i)),
            );
        }
        if let Some(timeout) = get_i64(webhook, "timeout_seconds")
            && !(1..=30).contains(&timeout)
        {
            diags.error(
                "Invalid timeout_seconds",
                "must be between 1 and 30",
                Some(&format!("webhook.{}.timeout_seconds", i)),
            );
        }
    }
    diags
}

fn put_str(map: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(v) = value {
        map.insert(key.to_string(), Value::String(v));
    }
}

fn expand_webhook(webhook: &Value, mutating: bool) -> Value {
    let mut out = Map::new();
    put_str(&mut out, "name", get_str(webhook, "name"));
    if let Some(versions) = get_string_list(webhook, "admission_review_versions") {
        out.insert("admissionReviewVersions".to_string(), json!(versions));
    }

    let mut config = Map::new();
    if let Some(cc) = get_block(webhook, "client_config") {
        put_str(
            &mut config,
            "caBundle",
            get_str(cc, "ca_bundle").map(|pem| STANDARD.encode(pem.as_bytes())),
        );
        put_str(&mut config, "url", get_str(cc, "url"));
        if let Some(svc) = get_block(cc, "service") {
            let mut service = Map::new();
            put_str(&mut service, "namespace", get_str(svc, "namespace"));
            put_str(&mut service, "name", get_str(svc, "name"));
            put_str(&mut service, "path", get_str(svc, "path"));
            if let Some(port) = get_i64(svc, "port") {
                service.insert("port".to_string(), json!(port));
            }
            config.insert("service".to_string(), Value::Object(service));
        }
    }
    out.insert("clientConfig".to_string(), Value::Object(config));

    put_str(&mut out, "failurePolicy", get_str(webhook, "failure_policy"));
    put_str(&mut out, "matchPolicy", get_str(webhook, "match_policy"));
    if let Some(selector) = get_block(webhook, "namespace_selector") {
        out.insert("namespaceSelector".to_string(), expand_label_selector(selector));
    }
    if let Some(selector) = get_block(webhook, "object_selector") {
        out.insert("objectSelector".to_string(), expand_label_selector(selector));
    }
    let rules: Vec<Value> = get_blocks(webhook, "rule")
        .into_iter()
        .map(|rule| {
            let list = |key: &str| json!(get_string_list(rule, key).unwrap_or_default());
            let mut r = Map::new();
            r.insert("apiGroups".to_string(), list("api_groups"));
            r.insert("apiVersions".to_string(), list("api_versions"));
            r.insert("operations".to_string(), list("operations"));
            r.insert("resources".to_string(), list("resources"));
            put_str(&mut r, "scope", get_str(rule, "scope"));
            Value::Object(r)
        })
        .collect();
    if !rules.is_empty() {
        out.insert("rules".to_string(), Value::Array(rules));
    }
    put_str(&mut out, "sideEffects", get_str(webhook, "side_effects"));
    if let Some(timeout) = get_i64(webhook, "timeout_seconds") {
        out.insert("timeoutSeconds".to_string(), json!(timeout));
    }
    if mutating {
        put_str(&mut out, "reinvocationPolicy", get_str(webhook, "reinvocation_policy"));
    }
    Value::Object(out)
}

/// Selectors the server defaults to `{}` are left out of state
fn flatten_selector(selector: Option<&Value>) -> Option<Value> {
    selector
        .map(flatten_label_selector)
        .filter(|s| s.as_object().is_some_and(|o| !o.is_empty()))
}

fn flatten_webhook(webhook: &Value, mutating: bool) -> Value {
    let client_config = webhook.get("clientConfig").map(|cc| {
        let ca_bundle = get_str(cc, "caBundle").map(|encoded| {
            STANDARD
                .decode(encoded.as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .unwrap_or(encoded)
        });
        let service = cc.get("service").map(|svc| {
            ObjectBuilder::new()
                .set_opt("namespace", get_str(svc, "namespace"))
                .set_opt("name", get_str(svc, "name"))
                .set_opt("path", get_str(svc, "path"))
                .set_opt("port", get_i64(svc, "port"))
                .build()
        });
        ObjectBuilder::new()
            .set_opt("ca_bundle", ca_bundle)
            .set_opt("url", get_str(cc, "url"))
            .set_block("service", service)
            .build()
    });
    let rules = webhook
        .get("rules")
        .and_then(Value::as_array)
        .map(|rules| {
            rules
                .iter()
                .map(|r| {
                    ObjectBuilder::new()
                        .set_list("api_groups", get_string_list(r, "apiGroups").as_ref())
                        .set_list("api_versions", get_string_list(r, "apiVersions").as_ref())
                        .set_list("operations", get_string_list(r, "operations").as_ref())
                        .set_list("resources", get_string_list(r, "resources").as_ref())
                        .set_opt("scope", get_str(r, "scope"))
                        .build()
                })
                .collect()
        })
        .unwrap_or_default();
    let mut builder = ObjectBuilder::new()
        .set_opt("name", get_str(webhook, "name"))
        .set_list(
            "admission_review_versions",
            get_string_list(webhook, "admissionReviewVersions").as_ref(),
        )
        .set_block("client_config", client_config)
        .set_opt("failure_policy", get_str(webhook, "failurePolicy"))
        .set_opt("match_policy", get_str(webhook, "matchPolicy"))
        .set_block("namespace_selector", flatten_selector(webhook.get("namespaceSelector")))
        .set_block("object_selector", flatten_selector(webhook.get("objectSelector")))
        .set_blocks("rule", rules)
        .set_opt("side_effects", get_str(webhook, "sideEffects"))
        .set_opt("timeout_seconds", get_i64(webhook, "timeoutSeconds"));
    if mutating {
        builder = builder.set_opt("reinvocation_policy", get_str(webhook, "reinvocationPolicy"));
    }
    builder.build()
}

/// Whole configuration object in its API shape
fn expand_configuration(attrs: &Value, kind: &str, mutating: bool) -> Result<Value> {
    let metadata = expand_metadata(attrs, false)?;
    let webhooks: Vec<Value> = get_blocks(attrs, "webhook")
        .into_iter()
        .map(|w| expand_webhook(w, mutating))
        .collect();
    if webhooks.is_empty() {
        return Err(Error::attribute("webhook", "at least one webhook is required"));
    }
    Ok(json!({
        "apiVersion": API_VERSION,
        "kind": kind,
        "metadata": serde_json::to_value(&metadata)?,
        "webhooks": webhooks,
    }))
}

fn flatten_configuration(
    metadata: &ObjectMeta,
    webhooks: Value,
    prior: &Value,
    filter: &MetadataFilter,
    mutating: bool,
) -> Value {
    let metadata = flatten_metadata(metadata, get_block(prior, "metadata"), filter, false);
    let webhooks: Vec<Value> = webhooks
        .as_array()
        .map(|hooks| hooks.iter().map(|w| flatten_webhook(w, mutating)).collect())
        .unwrap_or_default();
    ObjectBuilder::new()
        .set_block("metadata", Some(metadata))
        .set_blocks("webhook", webhooks)
        .build()
}

#[async_trait]
impl KubeResource for ValidatingWebhookResource {
    type Object = ValidatingWebhookConfiguration;

    const TYPE_NAME: &'static str = "kubernetes_validating_webhook_configuration";
    const KIND: &'static str = "ValidatingWebhookConfiguration";
    const NAMESPACED: bool = false;

    fn api(&self, client: Client, _namespace: Option<&str>) -> Api<Self::Object> {
        Api::all(client)
    }

    fn schema(&self) -> ResourceSchema {
        resource_schema(
            Self::TYPE_NAME,
            Self::NAMESPACED,
            "Admission webhooks that accept or reject objects without changing them",
            webhook_schema(false),
            false,
        )
    }

    fn validate(&self, attrs: &Value) -> Diagnostics {
        validate_webhooks(attrs)
    }

    fn expand(&self, attrs: &Value) -> Result<Self::Object> {
        Ok(serde_json::from_value(expand_configuration(attrs, Self::KIND, false)?)?)
    }

    fn flatten(&self, object: &Self::Object, prior: &Value, filter: &MetadataFilter) -> Result<Value> {
        let webhooks = serde_json::to_value(&object.webhooks)?;
        Ok(flatten_configuration(&object.metadata, webhooks, prior, filter, false))
    }
}

#[async_trait]
impl KubeResource for MutatingWebhookResource {
    type Object = MutatingWebhookConfiguration;

    const TYPE_NAME: &'static str = "kubernetes_mutating_webhook_configuration";
    const KIND: &'static str = "MutatingWebhookConfiguration";
    const NAMESPACED: bool = false;

    fn api(&self, client: Client, _namespace: Option<&str>) -> Api<Self::Object> {
        Api::all(client)
    }

    fn schema(&self) -> ResourceSchema {
        resource_schema(
            Self::TYPE_NAME,
            Self::NAMESPACED,
            "Admission webhooks that may modify objects before they are stored",
            webhook_schema(true),
            false,
        )
    }

    fn validate(&self, attrs: &Value) -> Diagnostics {
        validate_webhooks(attrs)
    }

    fn expand(&self, attrs: &Value) -> Result<Self::Object> {
        Ok(serde_json::from_value(expand_configuration(attrs, Self::KIND, true)?)?)
    }

    fn flatten(&self, object: &Self::Object, prior: &Value, filter: &MetadataFilter) -> Result<Value> {
        let webhooks = serde_json::to_value(&object.webhooks)?;
        Ok(flatten_configuration(&object.metadata, webhooks, prior, filter, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn attrs(mutating: bool) -> Value {
        let mut webhook = json!({
            "name": "pods.policy.example.com",
            "admission_review_versions": ["v1"],
            "client_config": [{
                "ca_bundle": PEM,
                "service": [{"namespace": "policy", "name": "webhook", "path": "/validate", "port": 443}]
            }],
            "failure_policy": "Fail",
            "match_policy": "Equivalent",
            "namespace_selector": [{"match_labels": {"policy": "enforced"}}],
            "rule": [{
                "api_groups": [""],
                "api_versions": ["v1"],
                "operations": ["CREATE", "UPDATE"],
                "resources": ["pods"],
                "scope": "Namespaced"
            }],
            "side_effects": "None",
            "timeout_seconds": 5
        });
        if mutating {
            webhook["reinvocation_policy"] = json!("IfNeeded");
        }
        json!({"metadata": [{"name": "pod-policy"}], "webhook": [webhook]})
    }

    #[test]
    fn test_validating_round_trip() {
        let config = ValidatingWebhookResource.expand(&attrs(false)).unwrap();
        let hook = &config.webhooks.as_ref().unwrap()[0];
        assert_eq!(hook.client_config.ca_bundle.as_ref().unwrap().0, PEM.as_bytes());
        assert_eq!(hook.timeout_seconds, Some(5));
        let flat = ValidatingWebhookResource
            .flatten(&config, &attrs(false), &MetadataFilter::default())
            .unwrap();
        assert_eq!(flat, attrs(false));
    }

    #[test]
    fn test_mutating_round_trip() {
        let config = MutatingWebhookResource.expand(&attrs(true)).unwrap();
        let hook = &config.webhooks.as_ref().unwrap()[0];
        assert_eq!(hook.reinvocation_policy.as_deref(), Some("IfNeeded"));
        let flat = MutatingWebhookResource
            .flatten(&config, &attrs(true), &MetadataFilter::default())
            .unwrap();
        assert_eq!(flat, attrs(true));
    }

    #[test]
    fn test_server_default_selectors_dropped() {
        let mut config = ValidatingWebhookResource.expand(&attrs(false)).unwrap();
        if let Some(hooks) = config.webhooks.as_mut() {
            hooks[0].object_selector = Some(Default::default());
        }
        let flat = ValidatingWebhookResource
            .flatten(&config, &Value::Null, &MetadataFilter::default())
            .unwrap();
        assert!(flat["webhook"][0].get("object_selector").is_none());
    }

    #[test]
    fn test_client_config_needs_one_target() {
        let mut both = attrs(false);
        both["webhook"][0]["client_config"][0]["url"] = json!("https://policy.example.com/validate");
        let diags = ValidatingWebhookResource.validate(&both);
        assert!(diags.has_errors());

        let mut neither = attrs(false);
        neither["webhook"][0]["client_config"][0]
            .as_object_mut()
            .unwrap()
            .remove("service");
        assert!(ValidatingWebhookResource.validate(&neither).has_errors());

        let mut plain = neither.clone();
        plain["webhook"][0]["client_config"][0]["url"] = json!("http://policy.example.com");
        let diags = ValidatingWebhookResource.validate(&plain);
        assert_eq!(diags.iter().next().unwrap().summary, "Invalid webhook URL");
    }

    #[test]
    fn test_flatten_keeps_undecodable_ca_bundle() {
        let hook = json!({
            "name": "policy.example.com",
            "clientConfig": {"caBundle": "not base64!", "url": "https://policy.example.com/check"}
        });
        let flat: Value = flatten_webhook(&hook, false);
        assert_eq!(flat["client_config"][0]["ca_bundle"], json!("not base64!"));
        assert!(flat.get("reinvocation_policy").is_none());
    }
}
