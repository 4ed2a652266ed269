//! `kubernetes_service`

use super::{KubeResource, Operation, ProviderContext, resource_schema};
use crate::Result;
use crate::diagnostics::Diagnostics;
use crate::k8s::wait::{PollStatus, poll_until};
use crate::schema::{AttrKind, Attribute, ResourceSchema, Schema};
use crate::structure::helpers::{
    expand_int_or_string, flatten_int_or_string, get_block, get_blocks, get_bool, get_i32,
    get_str, get_string_list, get_string_map,
};
use crate::structure::{MetadataFilter, ObjectBuilder, expand_metadata, flatten_metadata, metadata_schema};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use kube::{Api, Client, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::fmt::Debug;
use std::time::Duration;

pub struct ServiceResource;

fn port_schema() -> Schema {
    Schema::new()
        .attr("name", Attribute::string().optional())
        .attr("port", Attribute::int().required())
        .attr(
            "target_port",
            Attribute::string()
                .optional()
                .computed()
                .description("Number or name of the port on the pods, defaults to port"),
        )
        .attr("node_port", Attribute::int().optional().computed())
        .attr("protocol", Attribute::string().optional().default("TCP"))
}

/// Computed `status{load_balancer{ingress{ip, hostname}}}` block
pub(crate) fn load_balancer_status_schema() -> Attribute {
    Attribute::block(
        Schema::new().attr(
            "load_balancer",
            Attribute::block(
                Schema::new().attr(
                    "ingress",
                    Attribute::block(
                        Schema::new()
                            .attr("ip", Attribute::string().computed())
                            .attr("hostname", Attribute::string().computed()),
                    )
                    .computed(),
                ),
            )
            .computed(),
        ),
    )
    .computed()
}

/// Status block from `(ip, hostname)` pairs; `None` while nothing is assigned
pub(crate) fn flatten_load_balancer_status(ingress: Vec<(Option<String>, Option<String>)>) -> Option<Value> {
    if ingress.is_empty() {
        return None;
    }
    let entries = ingress
        .into_iter()
        .map(|(ip, hostname)| {
            ObjectBuilder::new()
                .set_opt("ip", ip)
                .set_opt("hostname", hostname)
                .build()
        })
        .collect();
    let load_balancer = ObjectBuilder::new().set_blocks("ingress", entries).build();
    Some(ObjectBuilder::new().set_block("load_balancer", Some(load_balancer)).build())
}

/// Poll until `ingress_count` reports at least one load balancer endpoint
pub(crate) async fn wait_for_load_balancer<K>(
    api: &Api<K>,
    name: &str,
    timeout: Duration,
    interval: Duration,
    ingress_count: fn(&K) -> usize,
) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    let what = format!("load balancer of {}", name);
    poll_until(&what, timeout, interval, || async move {
        let object = api.get(name).await?;
        if ingress_count(&object) > 0 {
            Ok(PollStatus::Ready(()))
        } else {
            Ok(PollStatus::Pending("no ingress assigned yet".to_string()))
        }
    })
    .await
}

fn expand_port(port: &Value) -> ServicePort {
    ServicePort {
        name: get_str(port, "name"),
        port: get_i32(port, "port").unwrap_or_default(),
        target_port: get_str(port, "target_port").map(|p| expand_int_or_string(&p)),
        node_port: get_i32(port, "node_port"),
        protocol: get_str(port, "protocol"),
        ..Default::default()
    }
}

fn flatten_port(port: &ServicePort) -> Value {
    ObjectBuilder::new()
        .set_opt("name", port.name.clone())
        .set("port", port.port)
        .set_opt("target_port", port.target_port.as_ref().map(flatten_int_or_string))
        .set_opt("node_port", port.node_port)
        .set_opt("protocol", port.protocol.clone())
        .build()
}

fn expand_spec(spec: &Value) -> ServiceSpec {
    let ports: Vec<ServicePort> = get_blocks(spec, "port").into_iter().map(expand_port).collect();
    ServiceSpec {
        selector: get_string_map(spec, "selector"),
        type_: get_str(spec, "type"),
        ports: (!ports.is_empty()).then_some(ports),
        cluster_ip: get_str(spec, "cluster_ip"),
        external_ips: get_string_list(spec, "external_ips"),
        external_name: get_str(spec, "external_name"),
        load_balancer_ip: get_str(spec, "load_balancer_ip"),
        load_balancer_source_ranges: get_string_list(spec, "load_balancer_source_ranges"),
        session_affinity: get_str(spec, "session_affinity"),
        external_traffic_policy: get_str(spec, "external_traffic_policy"),
        publish_not_ready_addresses: get_bool(spec, "publish_not_ready_addresses"),
        ..Default::default()
    }
}

fn flatten_spec(spec: &ServiceSpec) -> Value {
    let ports = spec
        .ports
        .iter()
        .flatten()
        .map(flatten_port)
        .collect();
    ObjectBuilder::new()
        .set_map("selector", spec.selector.as_ref())
        .set_opt("type", spec.type_.clone())
        .set_blocks("port", ports)
        .set_opt("cluster_ip", spec.cluster_ip.clone())
        .set_list("external_ips", spec.external_ips.as_ref())
        .set_opt("external_name", spec.external_name.clone())
        .set_opt("load_balancer_ip", spec.load_balancer_ip.clone())
        .set_list("load_balancer_source_ranges", spec.load_balancer_source_ranges.as_ref())
        .set_opt("session_affinity", spec.session_affinity.clone())
        .set_opt("external_traffic_policy", spec.external_traffic_policy.clone())
        .set("publish_not_ready_addresses", spec.publish_not_ready_addresses.unwrap_or(false))
        .build()
}

fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        == Some("LoadBalancer")
}

fn ingress_count(service: &Service) -> usize {
    service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map_or(0, Vec::len)
}

#[async_trait]
impl KubeResource for ServiceResource {
    type Object = Service;

    const TYPE_NAME: &'static str = "kubernetes_service";
    const KIND: &'static str = "Service";
    const NAMESPACED: bool = true;
    const LOCAL_ATTRIBUTES: &'static [&'static str] = &["wait_for_load_balancer"];

    fn api(&self, client: Client, namespace: Option<&str>) -> Api<Service> {
        Api::namespaced(client, namespace.unwrap_or("default"))
    }

    fn schema(&self) -> ResourceSchema {
        let spec = Schema::new()
            .attr(
                "selector",
                Attribute::map()
                    .optional()
                    .description("Route traffic to pods with these labels"),
            )
            .attr(
                "type",
                Attribute::string()
                    .optional()
                    .default("ClusterIP")
                    .description("ClusterIP, NodePort, LoadBalancer or ExternalName"),
            )
            .attr("port", Attribute::block(port_schema()).optional())
            .attr(
                "cluster_ip",
                Attribute::string().optional().computed().force_new(),
            )
            .attr("external_ips", Attribute::set_of(AttrKind::String).optional())
            .attr("external_name", Attribute::string().optional())
            .attr("load_balancer_ip", Attribute::string().optional())
            .attr(
                "load_balancer_source_ranges",
                Attribute::set_of(AttrKind::String).optional(),
            )
            .attr(
                "session_affinity",
                Attribute::string().optional().default("None"),
            )
            .attr(
                "external_traffic_policy",
                Attribute::string().optional().computed(),
            )
            .attr(
                "publish_not_ready_addresses",
                Attribute::bool().optional().default(false),
            );
        resource_schema(
            Self::TYPE_NAME,
            Self::NAMESPACED,
            "Abstract way to expose an application running on a set of pods",
            Schema::new()
                .attr("metadata", metadata_schema("service", true))
                .attr("spec", Attribute::single_block(spec).required().min_items(1))
                .attr(
                    "wait_for_load_balancer",
                    Attribute::bool()
                        .optional()
                        .default(true)
                        .description("Wait for LoadBalancer services to be assigned an ingress"),
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
        let service_type = get_str(spec, "type").unwrap_or_else(|| "ClusterIP".to_string());
        if service_type == "ExternalName" {
            if get_str(spec, "external_name").is_none() {
                diags.error(
                    "Missing external_name",
                    "ExternalName services must set external_name",
                    Some("spec.0.external_name"),
                );
            }
        } else if get_blocks(spec, "port").is_empty() && get_str(spec, "cluster_ip").as_deref() != Some("None") {
            diags.error(
                "Missing port",
                format!("{} services need at least one port", service_type),
                Some("spec.0.port"),
            );
        }
        for (i, port) in get_blocks(spec, "port").into_iter().enumerate() {
            if get_i32(port, "port").is_none_or(|p| !(1..=65535).contains(&p)) {
                diags.error(
                    "Invalid port",
                    "port must be between 1 and 65535",
                    Some(&format!("spec.0.port.{}.port", i)),
                );
            }
        }
        diags
    }

    fn expand(&self, attrs: &Value) -> Result<Service> {
        Ok(Service {
            metadata: expand_metadata(attrs, true)?,
            spec: get_block(attrs, "spec").map(expand_spec),
            ..Default::default()
        })
    }

    fn flatten(&self, object: &Service, prior: &Value, filter: &MetadataFilter) -> Result<Value> {
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
        api: &Api<Service>,
        object: &Service,
        attrs: &Value,
        op: Operation,
    ) -> Result<()> {
        if !is_load_balancer(object) || get_bool(attrs, "wait_for_load_balancer") == Some(false) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};

    fn attrs() -> Value {
        json!({
            "metadata": [{"name": "web", "namespace": "default"}],
            "spec": [{
                "selector": {"app": "web"},
                "type": "LoadBalancer",
                "port": [{"name": "http", "port": 80, "target_port": "http", "protocol": "TCP"}],
                "session_affinity": "None",
                "publish_not_ready_addresses": false
            }]
        })
    }

    #[test]
    fn test_expand() {
        let svc = ServiceResource.expand(&attrs()).unwrap();
        let spec = svc.spec.unwrap();
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(
            port.target_port,
            Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::String("http".to_string()))
        );
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
    }

    #[test]
    fn test_flatten_server_fields() {
        let mut svc = ServiceResource.expand(&attrs()).unwrap();
        if let Some(spec) = svc.spec.as_mut() {
            spec.cluster_ip = Some("10.0.0.12".to_string());
            spec.external_traffic_policy = Some("Cluster".to_string());
            if let Some(ports) = spec.ports.as_mut() {
                ports[0].node_port = Some(31080);
            }
        }
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some("203.0.113.7".to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        assert_eq!(ingress_count(&svc), 1);

        let flat = ServiceResource
            .flatten(&svc, &attrs(), &MetadataFilter::default())
            .unwrap();
        assert_eq!(flat["spec"][0]["cluster_ip"], json!("10.0.0.12"));
        assert_eq!(flat["spec"][0]["port"][0]["node_port"], json!(31080));
        assert_eq!(
            flat["status"][0]["load_balancer"][0]["ingress"][0]["ip"],
            json!("203.0.113.7")
        );

        let changes = crate::schema::diff(&ServiceResource.schema().block, &flat, &attrs());
        assert!(changes.is_empty(), "{:?}", changes);
    }

    #[test]
    fn test_validate() {
        assert!(!ServiceResource.validate(&attrs()).has_errors());

        let mut no_ports = attrs();
        no_ports["spec"][0].as_object_mut().unwrap().remove("port");
        assert!(ServiceResource.validate(&no_ports).has_errors());

        let external = json!({
            "metadata": [{"name": "db"}],
            "spec": [{"type": "ExternalName"}]
        });
        let diags = ServiceResource.validate(&external);
        assert_eq!(diags.len(), 1);
        assert_eq!(
            diags.iter().next().unwrap().attribute.as_deref(),
            Some("spec.0.external_name")
        );
    }
}
