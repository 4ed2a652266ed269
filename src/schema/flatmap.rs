//! Legacy flat key/value encoding of attribute trees

use serde_json::Value;
use std::collections::BTreeMap;

/// Flatten an attribute tree into `a.0.b = v` keys, with `.#` list counts and
/// `.%` map sizes
pub fn flatten(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(obj) = value.as_object() {
        for (key, v) in obj {
            walk(key, v, &mut out);
        }
    }
    out
}

fn walk(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Array(items) => {
            out.insert(format!("{}.#", prefix), items.len().to_string());
            for (i, item) in items.iter().enumerate() {
                walk(&format!("{}.{}", prefix, i), item, out);
            }
        }
        Value::Object(map) => {
            out.insert(format!("{}.%", prefix), map.len().to_string());
            for (key, v) in map {
                walk(&format!("{}.{}", prefix, key), v, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_blocks_and_maps() {
        let flat = flatten(&json!({
            "metadata": [{"name": "web", "labels": {"app": "web", "tier": "front"}}],
            "immutable": false,
            "replicas": 3,
            "unset": null
        }));
        let expected: BTreeMap<String, String> = [
            ("immutable", "false"),
            ("metadata.#", "1"),
            ("metadata.0.labels.%", "2"),
            ("metadata.0.labels.app", "web"),
            ("metadata.0.labels.tier", "front"),
            ("metadata.0.name", "web"),
            ("replicas", "3"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(flat, expected);
    }

    #[test]
    fn test_flatten_empty_list() {
        let flat = flatten(&json!({"ports": []}));
        assert_eq!(flat.get("ports.#").map(String::as_str), Some("0"));
        assert_eq!(flat.len(), 1);
    }
}
