//! Config normalization, defaults and validation against a schema

use super::quantity;
use super::types::{AttrKind, Schema};
use crate::diagnostics::Diagnostics;
use serde_json::{Map, Value};
use std::collections::HashSet;

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

impl Schema {
    /// Bring a hand-written block into the stored shape: single blocks written as
    /// bare objects become one-element lists, numbers and bools given where a
    /// string is expected become strings
    pub fn normalize(&self, value: Value) -> Value {
        let Value::Object(obj) = value else {
            return value;
        };
        let mut out = Map::new();
        for (key, v) in obj {
            let normalized = match self.get(&key).map(|a| &a.kind) {
                Some(AttrKind::Block { block, .. }) => match v {
                    Value::Object(_) => Value::Array(vec![block.normalize(v)]),
                    Value::Array(items) => {
                        Value::Array(items.into_iter().map(|i| block.normalize(i)).collect())
                    }
                    other => other,
                },
                Some(AttrKind::String) => stringify_scalar(v),
                Some(AttrKind::Map | AttrKind::QuantityMap) => match v {
                    Value::Object(m) => Value::Object(
                        m.into_iter()
                            .map(|(k, v)| (k, stringify_scalar(v)))
                            .collect(),
                    ),
                    other => other,
                },
                Some(AttrKind::List { elem }) | Some(AttrKind::Set { elem })
                    if **elem == AttrKind::String =>
                {
                    match v {
                        Value::Array(items) => {
                            Value::Array(items.into_iter().map(stringify_scalar).collect())
                        }
                        other => other,
                    }
                }
                _ => v,
            };
            out.insert(key, normalized);
        }
        Value::Object(out)
    }

    /// Fill attribute defaults for keys the block leaves unset
    pub fn apply_defaults(&self, value: Value) -> Value {
        let Value::Object(mut obj) = value else {
            return value;
        };
        for (name, attr) in self.iter() {
            let present = obj.get(name).is_some_and(|v| !v.is_null());
            if !present {
                if let Some(default) = &attr.default {
                    obj.insert(name.clone(), default.clone());
                }
                continue;
            }
            if let Some(block) = attr.block_schema()
                && let Some(Value::Array(items)) = obj.get_mut(name)
            {
                for item in items.iter_mut() {
                    *item = block.apply_defaults(std::mem::take(item));
                }
            }
        }
        Value::Object(obj)
    }

    /// Check a normalized block and report every problem found
    pub fn validate(&self, value: &Value) -> Diagnostics {
        let mut diags = Diagnostics::new();
        validate_object(self, value, "", &mut diags);
        diags
    }
}

fn stringify_scalar(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => other,
    }
}

fn validate_object(schema: &Schema, value: &Value, prefix: &str, diags: &mut Diagnostics) {
    let Some(obj) = value.as_object() else {
        diags.error(
            "Invalid block",
            format!("expected an object, got {}", type_name(value)),
            Some(prefix),
        );
        return;
    };

    for (key, v) in obj {
        let path = join(prefix, key);
        let Some(attr) = schema.get(key) else {
            diags.error(
                "Unsupported argument",
                format!("An argument named {:?} is not expected here", key),
                Some(&path),
            );
            continue;
        };
        if v.is_null() {
            continue;
        }
        if attr.is_computed_only() {
            diags.error(
                "Value for unconfigurable attribute",
                format!("{:?} is computed by the server and cannot be set", key),
                Some(&path),
            );
            continue;
        }
        validate_value(&attr.kind, v, &path, diags);
    }

    for (name, attr) in schema.iter() {
        if attr.required && obj.get(name).is_none_or(Value::is_null) {
            diags.error(
                "Missing required argument",
                format!("The argument {:?} is required, but no definition was found", name),
                Some(&join(prefix, name)),
            );
        }
    }
}

fn validate_value(kind: &AttrKind, value: &Value, path: &str, diags: &mut Diagnostics) {
    let mismatch = |diags: &mut Diagnostics, expected: &str| {
        diags.error(
            "Incorrect attribute value type",
            format!("expected {}, got {}", expected, type_name(value)),
            Some(path),
        );
    };

    match kind {
        AttrKind::String => {
            if !value.is_string() {
                mismatch(diags, "string");
            }
        }
        AttrKind::Int => {
            if !(value.is_i64() || value.is_u64()) {
                mismatch(diags, "integer");
            }
        }
        AttrKind::Bool => {
            if !value.is_boolean() {
                mismatch(diags, "bool");
            }
        }
        AttrKind::Map => match value.as_object() {
            Some(map) => {
                for (k, v) in map {
                    if !v.is_string() {
                        diags.error(
                            "Incorrect attribute value type",
                            format!("map values must be strings, got {}", type_name(v)),
                            Some(&join(path, k)),
                        );
                    }
                }
            }
            None => mismatch(diags, "map of string"),
        },
        AttrKind::QuantityMap => match value.as_object() {
            Some(map) => {
                for (k, v) in map {
                    let path = join(path, k);
                    match v.as_str() {
                        Some(text) if quantity::parse(text).is_some() => {}
                        Some(text) => diags.error(
                            "Invalid quantity",
                            format!("{:?} is not a resource quantity such as \"500m\" or \"1Gi\"", text),
                            Some(&path),
                        ),
                        None => diags.error(
                            "Incorrect attribute value type",
                            format!("quantities must be strings, got {}", type_name(v)),
                            Some(&path),
                        ),
                    }
                }
            }
            None => mismatch(diags, "map of quantity"),
        },
        AttrKind::List { elem } => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    validate_value(elem, item, &join(path, &i.to_string()), diags);
                }
            }
            None => mismatch(diags, "list"),
        },
        AttrKind::Set { elem } => match value.as_array() {
            Some(items) => {
                let mut seen = HashSet::new();
                for (i, item) in items.iter().enumerate() {
                    let item_path = join(path, &i.to_string());
                    validate_value(elem, item, &item_path, diags);
                    if !seen.insert(item.to_string()) {
                        diags.error(
                            "Duplicate set element",
                            format!("{} appears more than once", item),
                            Some(&item_path),
                        );
                    }
                }
            }
            None => mismatch(diags, "set"),
        },
        AttrKind::Block {
            block,
            min_items,
            max_items,
        } => match value.as_array() {
            Some(items) => {
                if items.len() < *min_items {
                    diags.error(
                        "Insufficient blocks",
                        format!("at least {} block(s) required, got {}", min_items, items.len()),
                        Some(path),
                    );
                }
                if let Some(max) = max_items
                    && items.len() > *max
                {
                    diags.error(
                        "Too many blocks",
                        format!("no more than {} block(s) allowed, got {}", max, items.len()),
                        Some(path),
                    );
                }
                for (i, item) in items.iter().enumerate() {
                    validate_object(block, item, &join(path, &i.to_string()), diags);
                }
            }
            None => mismatch(diags, "list of blocks"),
        },
        AttrKind::Any => {}
    }
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
                        .attr("name", Attribute::string().required())
                        .attr("labels", Attribute::map().optional())
                        .attr("uid", Attribute::string().computed()),
                )
                .required()
                .min_items(1),
            )
            .attr("replicas", Attribute::int().optional().default(1))
            .attr(
                "ports",
                Attribute::set_of(AttrKind::Int).optional(),
            )
            .attr(
                "args",
                Attribute::list_of(AttrKind::String).optional(),
            )
            .attr("target_port", Attribute::string().optional())
            .attr("requests", Attribute::quantity_map().optional())
    }

    #[test]
    fn test_normalize_wraps_single_blocks() {
        let value = schema().normalize(json!({
            "metadata": {"name": "web", "labels": {"tier": 1, "canary": true}},
            "args": ["--port", 8080]
        }));
        assert_eq!(
            value,
            json!({
                "metadata": [{"name": "web", "labels": {"tier": "1", "canary": "true"}}],
                "args": ["--port", "8080"]
            })
        );
    }

    #[test]
    fn test_apply_defaults() {
        let value = schema().apply_defaults(json!({"metadata": [{"name": "web"}]}));
        assert_eq!(value["replicas"], json!(1));

        let value = schema().apply_defaults(json!({"metadata": [{"name": "web"}], "replicas": 3}));
        assert_eq!(value["replicas"], json!(3));
    }

    #[test]
    fn test_validate_ok() {
        let diags = schema().validate(&json!({
            "metadata": [{"name": "web"}],
            "ports": [80, 443]
        }));
        assert!(diags.is_empty(), "{}", diags);
    }

    #[test]
    fn test_validate_reports_paths() {
        let diags = schema().validate(&json!({
            "metadata": [{"labels": {"a": 1}, "uid": "x", "bogus": true}],
            "replicas": "three",
            "ports": [80, 80]
        }));
        let paths: Vec<String> = diags
            .iter()
            .filter_map(|d| d.attribute.clone())
            .collect();
        assert!(paths.contains(&"metadata.0.name".to_string()));
        assert!(paths.contains(&"metadata.0.labels.a".to_string()));
        assert!(paths.contains(&"metadata.0.uid".to_string()));
        assert!(paths.contains(&"metadata.0.bogus".to_string()));
        assert!(paths.contains(&"replicas".to_string()));
        assert!(paths.contains(&"ports.1".to_string()));
    }

    #[test]
    fn test_validate_block_count() {
        let diags = schema().validate(&json!({
            "metadata": [{"name": "a"}, {"name": "b"}]
        }));
        assert!(diags.iter().any(|d| d.summary == "Too many blocks"));

        let diags = schema().validate(&json!({"metadata": []}));
        assert!(diags.iter().any(|d| d.summary == "Insufficient blocks"));
    }

    #[test]
    fn test_validate_missing_required_block() {
        let diags = schema().validate(&json!({}));
        assert!(diags.has_errors());
        assert_eq!(diags.iter().next().unwrap().attribute.as_deref(), Some("metadata"));
    }

    #[test]
    fn test_normalize_stringifies_scalars_for_strings() {
        let value = schema().normalize(json!({
            "metadata": {"name": "web"},
            "target_port": 8080,
            "requests": {"cpu": 1, "memory": "1Gi"}
        }));
        assert_eq!(value["target_port"], json!("8080"));
        assert_eq!(value["requests"], json!({"cpu": "1", "memory": "1Gi"}));
        assert!(schema().validate(&value).is_empty());
    }

    #[test]
    fn test_validate_quantities() {
        let diags = schema().validate(&json!({
            "metadata": [{"name": "web"}],
            "requests": {"cpu": "lots", "memory": "512Mi"}
        }));
        let paths: Vec<String> = diags
            .iter()
            .filter_map(|d| d.attribute.clone())
            .collect();
        assert_eq!(paths, vec!["requests.cpu".to_string()]);
    }
}
