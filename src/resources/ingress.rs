//! `kubernetes_ingress_v1`

use super::service::{flatten_load_balancer_status, load_balancer_status_schema, wait_for_load_balancer};
use super::{KubeResource, Operation, ProviderContext, resource_schema};
use crate::diagnostics::Diagnostics;
use crate::schema::{AttrKind, Attribute, ResourceSchema, Schema};
use crate::structure::helpers::{get_block, get_blocks, get_bool, get_i32, get_str, get_string_list};
use crate::structure::{MetadataFilter, ObjectBuilder, expand_metadata, flatten_metadata, metadata_schema};
use crate::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::TypedLocalObjectReference;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use kube::{Api, Client, ResourceExt};
use serde_json::Value;

pub struct IngressResource;

fn backend_schema() -> Schema {
    Schema::new()
        .attr(
            "service",
            Attribute::single_block(
                Schema::new()
                    .attr("name", Attribute::string().required())
                    .attr(
                        "port",
                        Attribute::single_block(
                            Schema::new()
                                .attr("name", Attribute::string().optional())
                                .attr("number", Attribute::int().optional()),
                        )
                        .required()
                        .min_items(1),
                    ),
            )
            .optional(),
        )
        .attr(
            "resource",
            Attribute::single_block(
                Schema::new()
                    .attr("api_group", Attribute::string().optional())
                    .attr("kind", Attribute::string().required())
                    .attr("name", Attribute::string().required()),
            )
            .optional(),
        )
}

fn expand_backend(backend: &Value) -> IngressBackend {
    let service = get_block(backend, "service").map(|svc| IngressServiceBackend {
        name: get_str(svc, "name").unwrap_or_default(),
        port: get_block(svc, "port").map(|port| ServiceBackendPort {
            name: get_str(port, "name"),
            number: get_i32(port, "number"),
        }),
    });
    let resource = get_block(backend, "resource").map(|res| TypedLocalObjectReference {
        api_group: get_str(res, "api_group"),
        kind: get_str(res, "kind").unwrap_or_default(),
        name: get_str(res, "name").unwrap_or_default(),
    });
    IngressBackend { resource, service }
}

fn flatten_backend(backend: &IngressBackend) -> Value {
    let service = backend.service.as_ref().map(|svc| {
        let port = svc.port.as_ref().map(|p| {
            ObjectBuilder::new()
                .set_opt("name", p.name.clone())
                .set_opt("number", p.number)
                .build()
        });
        ObjectBuilder::new()
            .set("name", svc.name.clone())
            .set_block("port", port)
            .build()
    });
    let resource = backend.resource.as_ref().map(|res| {
        ObjectBuilder::new()
            .set_opt("api_group", res.api_group.clone())
            .set("kind", res.kind.clone())
            .set("name", res.name.clone())
            .build()
    });
    ObjectBuilder::new()
        .set_block("service", service)
        .set_block("resource", resource)
        .build()
}

fn expand_rule(rule: &Value) -> Result<IngressRule> {
    let http = match get_block(rule, "http") {
        Some(http) => {
            let paths = get_blocks(http, "path")
                .into_iter()
                .map(|path| {
                    let backend = get_block(path, "backend")
                        .ok_or_else(|| Error::attribute("spec.0.rule.http.0.path.backend", "block is required"))?;
                    Ok(HTTPIngressPath {
                        backend: expand_backend(backend),
                        path: get_str(path, "path"),
                        path_type: get_str(path, "path_type")
                            .unwrap_or_else(|| "ImplementationSpecific".to_string()),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Some(HTTPIngressRuleValue { paths })
        }
        None => None,
    };
    Ok(IngressRule {
        host: get_str(rule, "host"),
        http,
    })
}

fn flatten_rule(rule: &IngressRule) -> Value {
    let http = rule.http.as_ref().map(|http| {
        let paths = http
            .paths
            .iter()
            .map(|p| {
                ObjectBuilder::new()
                    .set_opt("path", p.path.clone())
                    .set("path_type", p.path_type.clone())
                    .set_block("backend", Some(flatten_backend(&p.backend)))
                    .build()
            })
            .collect();
        ObjectBuilder::new().set_blocks("path", paths).build()
    });
    ObjectBuilder::new()
        .set_opt("host", rule.host.clone())
        .set_block("http", http)
        .build()
}

fn expand_spec(spec: &Value) -> Result<IngressSpec> {
    let rules = get_blocks(spec, "rule")
        .into_iter()
        .map(expand_rule)
        .collect::<Result<Vec<_>>>()?;
    let tls: Vec<IngressTLS> = get_blocks(spec, "tls")
        .into_iter()
        .map(|t| IngressTLS {
            hosts: get_string_list(t, "hosts"),
            secret_name: get_str(t, "secret_name"),
        })
        .collect();
    Ok(IngressSpec {
        ingress_class_name: get_str(spec, "ingress_class_name"),
        default_backend: get_block(spec, "default_backend").map(expand_backend),
        rules: (!rules.is_empty()).then_some(rules),
        tls: (!tls.is_empty()).then_some(tls),
    })
}

fn flatten_spec(spec: &IngressSpec) -> Value {
    let rules = spec.rules.iter().flatten().map(flatten_rule).collect();
    let tls = spec
        .tls
        .iter()
        .flatten()
        .map(|t| {
            ObjectBuilder::new()
                .set_list("hosts", t.hosts.as_ref())
                .set_opt("secret_name", t.secret_name.clone())
                .build()
        })
        .collect();
    ObjectBuilder::new()
        .set_opt("ingress_class_name", spec.ingress_class_name.clone())
        .set_block("default_backend", spec.default_backend.as_ref().map(flatten_backend))
        .set_blocks("rule", rules)
        .set_blocks("tls", tls)
        .build()
}

fn ingress_count(ingress: &Ingress) -> usize {
    ingress
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map_or(0, Vec::len)
}

/// Backends need exactly one of `service` and `resource`
fn validate_backend(backend: &Value, path: &str, diags: &mut Diagnostics) {
    let service = get_block(backend, "service");
    let resource = get_block(backend, "resource");
    if service.is_some() == resource.is_some() {
        diags.error(
            "Invalid backend",
            "exactly one of service or resource must be set",
            Some(path),
        );
    }
    if let Some(port) = service.and_then(|s| get_block(s, "port"))
        && get_str(port, "name").is_some() == get_i32(port, "number").is_some()
    {
        diags.error(
            "Invalid backend port",
            "exactly one of name or number must be set",
            Some(&format!("{}.service.0.port", path)),
        );
    }
}

#[async_trait]
impl KubeResource for IngressResource {
    type Object = Ingress;

    const TYPE_NAME: &'static str = "kubernetes_ingress_v1";
    const KIND: &'static str = "Ingress";
    const NAMESPACED: bool = true;
    const LOCAL_ATTRIBUTES: &'static [&'static str] = &["wait_for_load_balancer"];

    fn api(&self, client: Client, namespace: Option<&str>) -> Api<Ingress> {
        Api::namespaced(client, namespace.unwrap_or("default"))
    }

    fn schema(&self) -> ResourceSchema {
        let path = Schema::new()
            .attr("path", Attribute::string().optional())
            .attr(
                "path_type",
                Attribute::string()
                    .optional()
                    .default("ImplementationSpecific")
                    .description("Exact, Prefix or ImplementationSpecific"),
            )
            .attr(
                "backend",
                Attribute::single_block(backend_schema()).required().min_items(1),
            );
        let rule = Schema::new()
            .attr("host", Attribute::string().optional())
            .attr(
                "http",
                Attribute::single_block(
                    Schema::new().attr("path", Attribute::block(path).required().min_items(1)),
                )
                .optional(),
            );
        let spec = Schema::new()
            .attr("ingress_class_name", Attribute::string().optional())
            .attr(
                "default_backend",
                Attribute::single_block(backend_schema()).optional(),
            )
            .attr("rule", Attribute::block(rule).optional())
            .attr(
                "tls",
                Attribute::block(
                    Schema::new()
                        .attr("hosts", Attribute::list_of(AttrKind::String).optional())
                        .attr("secret_name", Attribute::string().optional()),
                )
                .optional(),
            );
        resource_schema(
            Self::TYPE_NAME,
            Self::NAMESPACED,
            "Rules routing external HTTP(S) traffic to services",
            Schema::new()
                .attr("metadata", metadata_schema("ingress", true))
                .attr("spec", Attribute::single_block(spec).required().min_items(1))
                .attr(
                    "wait_for_load_balancer",
                    Attribute::bool()
                        .optional()
                        .default(false)
                        .description("Wait for the ingress controller to publish an address"),
                )
                .attr("status", load_balancer_status_schema()),
            true,
        )
    }

    fn validate(&self, attrs: &Value) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let Some(spec) = get_block(attrs, "spec") else {
            return diags;
        };
        if let Some(backend) = get_block(spec, "default_backend") {
            validate_backend(backend, "spec.0.default_backend.0", &mut diags);
        }
        for (r, rule) in get_blocks(spec, "rule").into_iter().enumerate() {
            let Some(http) = get_block(rule, "http") else {
                continue;
            };
            for (p, path) in get_blocks(http, "path").into_iter().enumerate() {
                if let Some(backend) = get_block(path, "backend") {
                    let at = format!("spec.0.rule.{}.http.0.path.{}.backend.0", r, p);
                    validate_backend(backend, &at, &mut diags);
                }
            }
        }
        diags
    }

    fn expand(&self, attrs: &Value) -> Result<Ingress> {
        let spec = get_block(attrs, "spec").map(expand_spec).transpose()?;
        Ok(Ingress {
            metadata: expand_metadata(attrs, true)?,
            spec,
            ..Default::default()
        })
    }

    fn flatten(&self, object: &Ingress, prior: &Value, filter: &MetadataFilter) -> Result<Value> {
        let metadata = flatten_metadata(&object.metadata, get_block(prior, "metadata"), filter, true);
        let ingress = object
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| (e.ip.clone(), e.hostname.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ObjectBuilder::new()
            .set_block("metadata", Some(metadata))
            .set_block("spec", object.spec.as_ref().map(flatten_spec))
            .set_block("status", flatten_load_balancer_status(ingress))
            .build())
    }

    async fn wait_ready(
        &self,
        ctx: &ProviderContext,
        api: &Api<Ingress>,
        object: &Ingress,
        attrs: &Value,
        op: Operation,
    ) -> Result<()> {
        if get_bool(attrs, "wait_for_load_balancer") != Some(true) {
            return Ok(());
        }
        let timeout = match op {
            Operation::Create => ctx.timeouts.create(),
            Operation::Update => ctx.timeouts.update(),
        };
        wait_for_load_balancer(
            api,
            &object.name_any(),
            timeout,
            ctx.timeouts.poll_interval(),
            ingress_count,
        )
        .await
    }
}
