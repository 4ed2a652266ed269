//! Attribute-level comparison of prior state and desired configuration

use super::quantity;
use super::types::{AttrKind, Schema};
use serde_json::Value;

/// One attribute whose value differs between state and configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub path: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub force_new: bool,
    pub sensitive: bool,
}

/// Null, empty strings, empty maps and empty lists all mean "unset"
pub fn is_unset(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        _ => false,
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn set_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}

/// Compare `prior` (state) with `desired` (configuration) attribute by attribute.
/// Computed-only attributes are skipped, and optional+computed attributes
/// the configuration leaves out keep whatever the server chose.
pub fn diff(schema: &Schema, prior: &Value, desired: &Value) -> Vec<AttributeChange> {
    let mut changes = Vec::new();
    diff_object(schema, prior, desired, "", false, &mut changes);
    changes
}

fn diff_object(
    schema: &Schema,
    prior: &Value,
    desired: &Value,
    prefix: &str,
    sensitive: bool,
    out: &mut Vec<AttributeChange>,
) {
    for (name, attr) in schema.iter() {
        if attr.is_computed_only() {
            continue;
        }
        let path = join(prefix, name);
        let old = prior.get(name);
        let new = desired.get(name);
        let sensitive = sensitive || attr.sensitive;

        if is_unset(new) && attr.computed {
            continue;
        }
        if is_unset(old) && is_unset(new) {
            continue;
        }

        let record = |out: &mut Vec<AttributeChange>| {
            out.push(AttributeChange {
                path: path.clone(),
                old: old.filter(|v| !is_unset(Some(v))).cloned(),
                new: new.filter(|v| !is_unset(Some(v))).cloned(),
                force_new: attr.force_new,
                sensitive,
            });
        };

        match (&attr.kind, old, new) {
            (AttrKind::Block { block, .. }, Some(Value::Array(o)), Some(Value::Array(n)))
                if o.len() == n.len() =>
            {
                let before = out.len();
                for (i, (oi, ni)) in o.iter().zip(n.iter()).enumerate() {
                    diff_object(block, oi, ni, &join(&path, &i.to_string()), sensitive, out);
                }
                if attr.force_new {
                    for change in &mut out[before..] {
                        change.force_new = true;
                    }
                }
            }
            (AttrKind::Set { .. }, Some(Value::Array(o)), Some(Value::Array(n))) => {
                if !set_equal(o, n) {
                    record(out);
                }
            }
            (AttrKind::QuantityMap, Some(Value::Object(o)), Some(Value::Object(n))) => {
                if !quantity::maps_equivalent(o, n) {
                    record(out);
                }
            }
            _ => {
                if old != new {
                    record(out);
                }
            }
        }
    }
}

/// Copy optional+computed values the configuration leaves out from the prior
/// state into the desired value, so updates keep server-assigned fields
pub fn carry_computed(schema: &Schema, prior: &Value, desired: Value) -> Value {
    let Some(prior_obj) = prior.as_object() else {
        return desired;
    };
    let mut obj = match desired {
        Value::Object(obj) => obj,
        other => return other,
    };
    for (name, attr) in schema.iter() {
        let Some(prior_value) = prior_obj.get(name) else {
            continue;
        };
        let current = obj.get(name);
        if attr.is_computed_only() || (attr.computed && is_unset(current)) {
            obj.insert(name.clone(), prior_value.clone());
            continue;
        }
        if let Some(block) = attr.block_schema()
            && let (Value::Array(prior_items), Some(Value::Array(items))) =
                (prior_value, obj.get_mut(name))
            && prior_items.len() == items.len()
        {
            for (item, prior_item) in items.iter_mut().zip(prior_items) {
                *item = carry_computed(block, prior_item, std::mem::take(item));
            }
        }
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new()
            .attr(
                "metadata",
                Attribute::single_block(
                    Schema::new()
                        .attr("name", Attribute::string().optional().computed().force_new())
                        .attr("labels", Attribute::map().optional())
                        .attr("annotations", Attribute::map().optional())
                        .attr("resource_version", Attribute::string().computed()),
                )
                .required(),
            )
            .attr(
                "spec",
                Attribute::single_block(
                    Schema::new()
                        .attr("cluster_ip", Attribute::string().optional().computed().force_new())
                        .attr("external_ips", Attribute::set_of(AttrKind::String).optional())
                        .attr("type", Attribute::string().optional().default("ClusterIP")),
                )
                .required(),
            )
            .attr("data", Attribute::map().optional().sensitive())
            .attr("hard", Attribute::quantity_map().optional())
    }

    fn prior() -> Value {
        json!({
            "metadata": [{"name": "web", "labels": {"app": "web"}, "resource_version": "12"}],
            "spec": [{"cluster_ip": "10.0.0.7", "external_ips": ["1.1.1.1", "2.2.2.2"], "type": "ClusterIP"}],
            "data": {"password": "a"}
        })
    }

    #[test]
    fn test_no_changes_when_config_omits_computed() {
        let desired = json!({
            "metadata": [{"name": "web", "labels": {"app": "web"}}],
            "spec": [{"external_ips": ["2.2.2.2", "1.1.1.1"], "type": "ClusterIP"}],
            "data": {"password": "a"}
        });
        assert!(diff(&schema(), &prior(), &desired).is_empty());
    }

    #[test]
    fn test_label_change_is_in_place() {
        let desired = json!({
            "metadata": [{"name": "web", "labels": {"app": "api"}}],
            "spec": [{"external_ips": ["1.1.1.1", "2.2.2.2"], "type": "ClusterIP"}],
            "data": {"password": "a"}
        });
        let changes = diff(&schema(), &prior(), &desired);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "metadata.0.labels");
        assert!(!changes[0].force_new);
    }

    #[test]
    fn test_force_new_attribute() {
        let desired = json!({
            "metadata": [{"name": "web2", "labels": {"app": "web"}}],
            "spec": [{"external_ips": ["1.1.1.1", "2.2.2.2"], "type": "ClusterIP"}],
            "data": {"password": "b"}
        });
        let changes = diff(&schema(), &prior(), &desired);
        let name = changes.iter().find(|c| c.path == "metadata.0.name").unwrap();
        assert!(name.force_new);
        let data = changes.iter().find(|c| c.path == "data").unwrap();
        assert!(data.sensitive);
    }

    #[test]
    fn test_empty_map_equals_absent() {
        let desired = json!({
            "metadata": [{"name": "web", "labels": {"app": "web"}}],
            "spec": [{"external_ips": ["1.1.1.1", "2.2.2.2"], "type": "ClusterIP"}],
            "data": {"password": "a"}
        });
        let mut prior = prior();
        prior["metadata"][0]["annotations"] = json!({});
        assert!(diff(&schema(), &prior, &desired).is_empty());
    }

    #[test]
    fn test_carry_computed_keeps_server_values() {
        let desired = json!({
            "metadata": [{"name": "web", "labels": {"app": "api"}}],
            "spec": [{"type": "NodePort"}]
        });
        let merged = carry_computed(&schema(), &prior(), desired);
        assert_eq!(merged["spec"][0]["cluster_ip"], json!("10.0.0.7"));
        assert_eq!(merged["spec"][0]["type"], json!("NodePort"));
        assert_eq!(merged["metadata"][0]["resource_version"], json!("12"));
        assert_eq!(merged["metadata"][0]["labels"], json!({"app": "api"}));
        assert!(merged["spec"][0].get("external_ips").is_none());
    }

    #[test]
    fn test_quantities_compare_by_value() {
        let mut prior = prior();
        prior["hard"] = json!({"cpu": "500m", "memory": "1Gi"});
        let mut desired = prior.clone();
        desired["hard"] = json!({"cpu": "0.5", "memory": "1024Mi"});
        assert!(diff(&schema(), &prior, &desired).is_empty());

        desired["hard"] = json!({"cpu": "1", "memory": "1024Mi"});
        let changes = diff(&schema(), &prior, &desired);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "hard");
    }
}
