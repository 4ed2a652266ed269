//! Pod templates, expanded to and flattened from their API JSON shape

use super::helpers::{
    ObjectBuilder, get_block, get_blocks, get_bool, get_i64, get_str, get_string_list,
    get_string_map, string_map_value,
};
use super::metadata::{MetadataFilter, flatten_nested_metadata, nested_metadata_schema};
use crate::schema::{AttrKind, Attribute, Schema};
use crate::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{Map, Value, json};

fn put(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        map.insert(key.to_string(), v);
    }
}

fn container_schema() -> Schema {
    Schema::new()
        .attr("name", Attribute::string().required())
        .attr("image", Attribute::string().optional())
        .attr(
            "image_pull_policy",
            Attribute::string()
                .optional()
                .computed()
                .description("One of Always, Never, IfNotPresent"),
        )
        .attr("command", Attribute::list_of(AttrKind::String).optional())
        .attr("args", Attribute::list_of(AttrKind::String).optional())
        .attr("working_dir", Attribute::string().optional())
        .attr(
            "env",
            Attribute::block(
                Schema::new()
                    .attr("name", Attribute::string().required())
                    .attr("value", Attribute::string().optional()),
            )
            .optional(),
        )
        .attr(
            "port",
            Attribute::block(
                Schema::new()
                    .attr("name", Attribute::string().optional())
                    .attr("container_port", Attribute::int().required())
                    .attr("protocol", Attribute::string().optional().default("TCP")),
            )
            .optional(),
        )
        .attr(
            "resources",
            Attribute::single_block(
                Schema::new()
                    .attr("limits", Attribute::quantity_map().optional())
                    .attr("requests", Attribute::quantity_map().optional()),
            )
            .optional(),
        )
        .attr(
            "volume_mount",
            Attribute::block(
                Schema::new()
                    .attr("name", Attribute::string().required())
                    .attr("mount_path", Attribute::string().required())
                    .attr("read_only", Attribute::bool().optional().default(false))
                    .attr("sub_path", Attribute::string().optional()),
            )
            .optional(),
        )
}

fn volume_schema() -> Schema {
    Schema::new()
        .attr("name", Attribute::string().required())
        .attr(
            "config_map",
            Attribute::single_block(Schema::new().attr("name", Attribute::string().required()))
                .optional(),
        )
        .attr(
            "secret",
            Attribute::single_block(
                Schema::new()
                    .attr("secret_name", Attribute::string().required())
                    .attr("optional", Attribute::bool().optional()),
            )
            .optional(),
        )
        .attr(
            "empty_dir",
            Attribute::single_block(Schema::new().attr("medium", Attribute::string().optional()))
                .optional(),
        )
        .attr(
            "persistent_volume_claim",
            Attribute::single_block(
                Schema::new()
                    .attr("claim_name", Attribute::string().required())
                    .attr("read_only", Attribute::bool().optional().default(false)),
            )
            .optional(),
        )
}

fn pod_spec_schema() -> Schema {
    Schema::new()
        .attr(
            "container",
            Attribute::block(container_schema())
                .required()
                .min_items(1)
                .description("Containers belonging to the pod"),
        )
        .attr(
            "init_container",
            Attribute::block(container_schema()).optional(),
        )
        .attr("service_account_name", Attribute::string().optional().computed())
        .attr("node_selector", Attribute::map().optional())
        .attr(
            "termination_grace_period_seconds",
            Attribute::int().optional().default(30),
        )
        .attr("volume", Attribute::block(volume_schema()).optional())
}

/// The `template` block of workload resources
pub fn pod_template_schema() -> Attribute {
    Attribute::single_block(
        Schema::new()
            .attr("metadata", nested_metadata_schema())
            .attr(
                "spec",
                Attribute::single_block(pod_spec_schema()).required().min_items(1),
            ),
    )
    .required()
    .min_items(1)
    .description("Pod template the workload stamps out")
}

fn expand_container(c: &Value) -> Value {
    let mut out = Map::new();
    put(&mut out, "name", get_str(c, "name").map(Value::String));
    put(&mut out, "image", get_str(c, "image").map(Value::String));
    put(&mut out, "imagePullPolicy", get_str(c, "image_pull_policy").map(Value::String));
    put(&mut out, "command", get_string_list(c, "command").map(|l| json!(l)));
    put(&mut out, "args", get_string_list(c, "args").map(|l| json!(l)));
    put(&mut out, "workingDir", get_str(c, "working_dir").map(Value::String));

    let env: Vec<Value> = get_blocks(c, "env")
        .into_iter()
        .map(|e| {
            let mut var = Map::new();
            put(&mut var, "name", get_str(e, "name").map(Value::String));
            put(&mut var, "value", get_str(e, "value").map(Value::String));
            Value::Object(var)
        })
        .collect();
    if !env.is_empty() {
        out.insert("env".to_string(), Value::Array(env));
    }

    let ports: Vec<Value> = get_blocks(c, "port")
        .into_iter()
        .map(|p| {
            let mut port = Map::new();
            put(&mut port, "name", get_str(p, "name").map(Value::String));
            put(&mut port, "containerPort", get_i64(p, "container_port").map(Value::from));
            put(&mut port, "protocol", get_str(p, "protocol").map(Value::String));
            Value::Object(port)
        })
        .collect();
    if !ports.is_empty() {
        out.insert("ports".to_string(), Value::Array(ports));
    }

    if let Some(res) = get_block(c, "resources") {
        let mut resources = Map::new();
        put(&mut resources, "limits", get_string_map(res, "limits").map(|m| string_map_value(&m)));
        put(&mut resources, "requests", get_string_map(res, "requests").map(|m| string_map_value(&m)));
        out.insert("resources".to_string(), Value::Object(resources));
    }

    let mounts: Vec<Value> = get_blocks(c, "volume_mount")
        .into_iter()
        .map(|m| {
            let mut mount = Map::new();
            put(&mut mount, "name", get_str(m, "name").map(Value::String));
            put(&mut mount, "mountPath", get_str(m, "mount_path").map(Value::String));
            put(&mut mount, "readOnly", get_bool(m, "read_only").filter(|b| *b).map(Value::Bool));
            put(&mut mount, "subPath", get_str(m, "sub_path").map(Value::String));
            Value::Object(mount)
        })
        .collect();
    if !mounts.is_empty() {
        out.insert("volumeMounts".to_string(), Value::Array(mounts));
    }
    Value::Object(out)
}

fn flatten_container(c: &Value) -> Value {
    let env = c
        .get("env")
        .and_then(Value::as_array)
        .map(|vars| {
            vars.iter()
                .map(|e| {
                    ObjectBuilder::new()
                        .set_opt("name", get_str(e, "name"))
                        .set_opt("value", get_str(e, "value"))
                        .build()
                })
                .collect()
        })
        .unwrap_or_default();
    let ports = c
        .get("ports")
        .and_then(Value::as_array)
        .map(|ports| {
            ports
                .iter()
                .map(|p| {
                    ObjectBuilder::new()
                        .set_opt("name", get_str(p, "name"))
                        .set_opt("container_port", get_i64(p, "containerPort"))
                        .set_opt("protocol", get_str(p, "protocol"))
                        .build()
                })
                .collect()
        })
        .unwrap_or_default();
    let resources = c.get("resources").and_then(|r| {
        let limits = get_string_map(r, "limits");
        let requests = get_string_map(r, "requests");
        (limits.is_some() || requests.is_some()).then(|| {
            ObjectBuilder::new()
                .set_map("limits", limits.as_ref())
                .set_map("requests", requests.as_ref())
                .build()
        })
    });
    let mounts = c
        .get("volumeMounts")
        .and_then(Value::as_array)
        .map(|mounts| {
            mounts
                .iter()
                .map(|m| {
                    ObjectBuilder::new()
                        .set_opt("name", get_str(m, "name"))
                        .set_opt("mount_path", get_str(m, "mountPath"))
                        .set("read_only", get_bool(m, "readOnly").unwrap_or(false))
                        .set_opt("sub_path", get_str(m, "subPath"))
                        .build()
                })
                .collect()
        })
        .unwrap_or_default();

    ObjectBuilder::new()
        .set_opt("name", get_str(c, "name"))
        .set_opt("image", get_str(c, "image"))
        .set_opt("image_pull_policy", get_str(c, "imagePullPolicy"))
        .set_list("command", get_string_list(c, "command").as_ref())
        .set_list("args", get_string_list(c, "args").as_ref())
        .set_opt("working_dir", get_str(c, "workingDir"))
        .set_blocks("env", env)
        .set_blocks("port", ports)
        .set_block("resources", resources)
        .set_blocks("volume_mount", mounts)
        .build()
}

fn expand_volume(v: &Value) -> Result<Value> {
    let mut out = Map::new();
    put(&mut out, "name", get_str(v, "name").map(Value::String));
    let mut sources = 0;
    if let Some(cm) = get_block(v, "config_map") {
        out.insert("configMap".to_string(), json!({"name": get_str(cm, "name")}));
        sources += 1;
    }
    if let Some(secret) = get_block(v, "secret") {
        let mut s = Map::new();
        put(&mut s, "secretName", get_str(secret, "secret_name").map(Value::String));
        put(&mut s, "optional", get_bool(secret, "optional").map(Value::Bool));
        out.insert("secret".to_string(), Value::Object(s));
        sources += 1;
    }
    if let Some(empty_dir) = get_block(v, "empty_dir") {
        let mut e = Map::new();
        put(&mut e, "medium", get_str(empty_dir, "medium").map(Value::String));
        out.insert("emptyDir".to_string(), Value::Object(e));
        sources += 1;
    }
    if let Some(pvc) = get_block(v, "persistent_volume_claim") {
        let mut p = Map::new();
        put(&mut p, "claimName", get_str(pvc, "claim_name").map(Value::String));
        put(&mut p, "readOnly", get_bool(pvc, "read_only").filter(|b| *b).map(Value::Bool));
        out.insert("persistentVolumeClaim".to_string(), Value::Object(p));
        sources += 1;
    }
    if sources != 1 {
        return Err(Error::attribute(
            format!("volume {:?}", get_str(v, "name").unwrap_or_default()),
            "exactly one of config_map, secret, empty_dir or persistent_volume_claim must be set",
        ));
    }
    Ok(Value::Object(out))
}

fn flatten_volume(v: &Value) -> Value {
    let config_map = v
        .get("configMap")
        .map(|cm| ObjectBuilder::new().set_opt("name", get_str(cm, "name")).build());
    let secret = v.get("secret").map(|s| {
        ObjectBuilder::new()
            .set_opt("secret_name", get_str(s, "secretName"))
            .set_opt("optional", get_bool(s, "optional"))
            .build()
    });
    let empty_dir = v
        .get("emptyDir")
        .map(|e| ObjectBuilder::new().set_opt("medium", get_str(e, "medium")).build());
    let pvc = v.get("persistentVolumeClaim").map(|p| {
        ObjectBuilder::new()
            .set_opt("claim_name", get_str(p, "claimName"))
            .set("read_only", get_bool(p, "readOnly").unwrap_or(false))
            .build()
    });
    ObjectBuilder::new()
        .set_opt("name", get_str(v, "name"))
        .set_block("config_map", config_map)
        .set_block("secret", secret)
        .set_block("empty_dir", empty_dir)
        .set_block("persistent_volume_claim", pvc)
        .build()
}

fn expand_pod_spec(spec: &Value) -> Result<Value> {
    let mut out = Map::new();
    let containers: Vec<Value> = get_blocks(spec, "container")
        .into_iter()
        .map(expand_container)
        .collect();
    if containers.is_empty() {
        return Err(Error::attribute(
            "spec.0.template.0.spec.0.container",
            "at least one container is required",
        ));
    }
    out.insert("containers".to_string(), Value::Array(containers));
    let init: Vec<Value> = get_blocks(spec, "init_container")
        .into_iter()
        .map(expand_container)
        .collect();
    if !init.is_empty() {
        out.insert("initContainers".to_string(), Value::Array(init));
    }
    put(
        &mut out,
        "serviceAccountName",
        get_str(spec, "service_account_name").map(Value::String),
    );
    put(
        &mut out,
        "nodeSelector",
        get_string_map(spec, "node_selector").map(|m| string_map_value(&m)),
    );
    put(
        &mut out,
        "terminationGracePeriodSeconds",
        get_i64(spec, "termination_grace_period_seconds").map(Value::from),
    );
    let volumes = get_blocks(spec, "volume")
        .into_iter()
        .map(expand_volume)
        .collect::<Result<Vec<_>>>()?;
    if !volumes.is_empty() {
        out.insert("volumes".to_string(), Value::Array(volumes));
    }
    Ok(Value::Object(out))
}

fn flatten_pod_spec(spec: &Value) -> Value {
    let containers = |key: &str| -> Vec<Value> {
        spec.get(key)
            .and_then(Value::as_array)
            .map(|cs| cs.iter().map(flatten_container).collect())
            .unwrap_or_default()
    };
    let volumes = spec
        .get("volumes")
        .and_then(Value::as_array)
        .map(|vs| vs.iter().map(flatten_volume).collect())
        .unwrap_or_default();
    ObjectBuilder::new()
        .set_blocks("container", containers("containers"))
        .set_blocks("init_container", containers("initContainers"))
        .set_opt("service_account_name", get_str(spec, "serviceAccountName"))
        .set_map("node_selector", get_string_map(spec, "nodeSelector").as_ref())
        .set_opt(
            "termination_grace_period_seconds",
            get_i64(spec, "terminationGracePeriodSeconds"),
        )
        .set_blocks("volume", volumes)
        .build()
}

/// Template block into a `PodTemplateSpec`-shaped JSON object
pub fn expand_pod_template(template: &Value) -> Result<Value> {
    let mut out = Map::new();
    if let Some(meta) = get_block(template, "metadata") {
        let meta = ObjectMeta {
            name: get_str(meta, "name"),
            labels: get_string_map(meta, "labels"),
            annotations: get_string_map(meta, "annotations"),
            ..Default::default()
        };
        out.insert("metadata".to_string(), serde_json::to_value(meta)?);
    }
    let spec = get_block(template, "spec")
        .ok_or_else(|| Error::attribute("spec.0.template.0.spec", "block is required"))?;
    out.insert("spec".to_string(), expand_pod_spec(spec)?);
    Ok(Value::Object(out))
}

/// `PodTemplateSpec`-shaped JSON back into a template block
pub fn flatten_pod_template(
    template: &Value,
    prior: Option<&Value>,
    filter: &MetadataFilter,
) -> Result<Value> {
    let meta: ObjectMeta = match template.get("metadata") {
        Some(m) => serde_json::from_value(m.clone())?,
        None => ObjectMeta::default(),
    };
    let prior_meta = prior.and_then(|p| get_block(p, "metadata"));
    let metadata = flatten_nested_metadata(&meta, prior_meta, filter);
    let metadata = (metadata != json!({})).then_some(metadata);
    Ok(ObjectBuilder::new()
        .set_block("metadata", metadata)
        .set_block("spec", template.get("spec").map(flatten_pod_spec))
        .build())
}
