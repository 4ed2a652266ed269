//! Readers and builders for attribute trees

use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::ByteString;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Non-empty string attribute
pub fn get_str(attrs: &Value, key: &str) -> Option<String> {
    attrs
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn get_i64(attrs: &Value, key: &str) -> Option<i64> {
    attrs.get(key).and_then(Value::as_i64)
}

pub fn get_i32(attrs: &Value, key: &str) -> Option<i32> {
    get_i64(attrs, key).and_then(|n| i32::try_from(n).ok())
}

pub fn get_bool(attrs: &Value, key: &str) -> Option<bool> {
    attrs.get(key).and_then(Value::as_bool)
}

/// Map attribute; `None` when absent or empty
pub fn get_string_map(attrs: &Value, key: &str) -> Option<BTreeMap<String, String>> {
    let map: BTreeMap<String, String> = attrs
        .get(key)?
        .as_object()?
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();
    (!map.is_empty()).then_some(map)
}

/// List or set of strings; `None` when absent or empty
pub fn get_string_list(attrs: &Value, key: &str) -> Option<Vec<String>> {
    let list: Vec<String> = attrs
        .get(key)?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    (!list.is_empty()).then_some(list)
}

/// First element of a block list
pub fn get_block<'a>(attrs: &'a Value, key: &str) -> Option<&'a Value> {
    attrs.get(key)?.as_array()?.first()
}

/// Every element of a block list
pub fn get_blocks<'a>(attrs: &'a Value, key: &str) -> Vec<&'a Value> {
    attrs
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().collect())
        .unwrap_or_default()
}

/// Required non-empty string attribute
pub fn require_str(attrs: &Value, key: &str, path: &str) -> Result<String> {
    get_str(attrs, key).ok_or_else(|| Error::attribute(format!("{}.{}", path, key), "is required"))
}

/// Map of quantities such as `{"cpu": "500m"}`
pub fn get_quantity_map(attrs: &Value, key: &str) -> Option<BTreeMap<String, Quantity>> {
    get_string_map(attrs, key).map(|m| m.into_iter().map(|(k, v)| (k, Quantity(v))).collect())
}

pub fn flatten_quantity_map(map: Option<&BTreeMap<String, Quantity>>) -> Option<BTreeMap<String, String>> {
    map.filter(|m| !m.is_empty())
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
}

/// Numeric strings become ports, everything else a named port
pub fn expand_int_or_string(value: &str) -> IntOrString {
    match value.parse::<i32>() {
        Ok(n) => IntOrString::Int(n),
        Err(_) => IntOrString::String(value.to_string()),
    }
}

pub fn flatten_int_or_string(value: &IntOrString) -> String {
    match value {
        IntOrString::Int(n) => n.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}

/// Map of base64 strings into raw bytes
pub fn expand_base64_map(
    map: Option<BTreeMap<String, String>>,
    path: &str,
) -> Result<Option<BTreeMap<String, ByteString>>> {
    let Some(map) = map else {
        return Ok(None);
    };
    let mut out = BTreeMap::new();
    for (key, encoded) in map {
        let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
            Error::attribute(format!("{}.{}", path, key), format!("invalid base64: {}", e))
        })?;
        out.insert(key, ByteString(bytes));
    }
    Ok(Some(out))
}

pub fn flatten_base64_map(map: Option<&BTreeMap<String, ByteString>>) -> Option<BTreeMap<String, String>> {
    map.filter(|m| !m.is_empty())
        .map(|m| m.iter().map(|(k, v)| (k.clone(), STANDARD.encode(&v.0))).collect())
}

/// Plain-text map into raw bytes
pub fn expand_byte_map(map: Option<BTreeMap<String, String>>) -> Option<BTreeMap<String, ByteString>> {
    map.map(|m| {
        m.into_iter()
            .map(|(k, v)| (k, ByteString(v.into_bytes())))
            .collect()
    })
}

/// Raw bytes into plain text; non UTF-8 values are reported as errors
pub fn flatten_byte_map(
    map: Option<&BTreeMap<String, ByteString>>,
    path: &str,
) -> Result<Option<BTreeMap<String, String>>> {
    let Some(map) = map.filter(|m| !m.is_empty()) else {
        return Ok(None);
    };
    let mut out = BTreeMap::new();
    for (key, value) in map {
        let text = String::from_utf8(value.0.clone()).map_err(|_| {
            Error::attribute(
                format!("{}.{}", path, key),
                "value is not valid UTF-8, use binary_data instead",
            )
        })?;
        out.insert(key.clone(), text);
    }
    Ok(Some(out))
}

pub fn string_map_value(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// Builder for flattened attribute objects. Unset and empty values are skipped
/// so state never records a value the configuration could not have written.
#[derive(Debug, Default)]
pub struct ObjectBuilder(Map<String, Value>);

impl ObjectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn set_opt<T: Into<Value>>(mut self, key: &str, value: Option<T>) -> Self {
        if let Some(v) = value {
            let v = v.into();
            if v != Value::String(String::new()) {
                self.0.insert(key.to_string(), v);
            }
        }
        self
    }

    pub fn set_map(mut self, key: &str, map: Option<&BTreeMap<String, String>>) -> Self {
        if let Some(m) = map.filter(|m| !m.is_empty()) {
            self.0.insert(key.to_string(), string_map_value(m));
        }
        self
    }

    pub fn set_list(mut self, key: &str, list: Option<&Vec<String>>) -> Self {
        if let Some(l) = list.filter(|l| !l.is_empty()) {
            self.0.insert(key.to_string(), json!(l));
        }
        self
    }

    /// Single nested block
    pub fn set_block(mut self, key: &str, block: Option<Value>) -> Self {
        if let Some(b) = block {
            self.0.insert(key.to_string(), Value::Array(vec![b]));
        }
        self
    }

    /// Repeated nested block
    pub fn set_blocks(mut self, key: &str, blocks: Vec<Value>) -> Self {
        if !blocks.is_empty() {
            self.0.insert(key.to_string(), Value::Array(blocks));
        }
        self
    }

    /// Copy a value verbatim from another object if present
    pub fn carry(mut self, key: &str, from: &Value) -> Self {
        if let Some(v) = from.get(key).filter(|v| !v.is_null()) {
            self.0.insert(key.to_string(), v.clone());
        }
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_getters() {
        let attrs = json!({
            "name": "web",
            "empty": "",
            "replicas": 3,
            "big": 9_000_000_000i64,
            "labels": {"app": "web"},
            "no_labels": {},
            "hosts": ["a", "b"],
            "spec": [{"type": "ClusterIP"}]
        });
        assert_eq!(get_str(&attrs, "name").as_deref(), Some("web"));
        assert_eq!(get_str(&attrs, "empty"), None);
        assert_eq!(get_i32(&attrs, "replicas"), Some(3));
        assert_eq!(get_i32(&attrs, "big"), None);
        assert_eq!(get_string_map(&attrs, "labels").unwrap()["app"], "web");
        assert_eq!(get_string_map(&attrs, "no_labels"), None);
        assert_eq!(get_string_list(&attrs, "hosts").unwrap(), vec!["a", "b"]);
        assert_eq!(get_block(&attrs, "spec").unwrap()["type"], json!("ClusterIP"));
        assert!(get_blocks(&attrs, "missing").is_empty());
        assert!(require_str(&attrs, "missing", "metadata.0").is_err());
    }

    #[test]
    fn test_int_or_string() {
        assert_eq!(expand_int_or_string("8080"), IntOrString::Int(8080));
        assert_eq!(
            expand_int_or_string("http"),
            IntOrString::String("http".to_string())
        );
        assert_eq!(flatten_int_or_string(&IntOrString::Int(80)), "80");
    }

    #[test]
    fn test_base64_maps() {
        let mut map = BTreeMap::new();
        map.insert("bin".to_string(), "AAEC".to_string());
        let bytes = expand_base64_map(Some(map.clone()), "binary_data").unwrap().unwrap();
        assert_eq!(bytes["bin"].0, vec![0u8, 1, 2]);
        assert_eq!(flatten_base64_map(Some(&bytes)).unwrap(), map);

        let mut bad = BTreeMap::new();
        bad.insert("bin".to_string(), "%%%".to_string());
        let err = expand_base64_map(Some(bad), "binary_data").unwrap_err();
        assert!(err.to_string().contains("binary_data.bin"));
    }

    #[test]
    fn test_byte_maps() {
        let mut map = BTreeMap::new();
        map.insert("password".to_string(), "s3cret".to_string());
        let bytes = expand_byte_map(Some(map.clone())).unwrap();
        assert_eq!(flatten_byte_map(Some(&bytes), "data").unwrap().unwrap(), map);

        let mut invalid = BTreeMap::new();
        invalid.insert("raw".to_string(), ByteString(vec![0xff, 0xfe]));
        assert!(flatten_byte_map(Some(&invalid), "data").is_err());
    }

    #[test]
    fn test_builder_skips_empty() {
        let labels = BTreeMap::new();
        let value = ObjectBuilder::new()
            .set("name", "web")
            .set_opt("namespace", Some(""))
            .set_opt::<i32>("replicas", None)
            .set_map("labels", Some(&labels))
            .set_list("hosts", Some(&vec![]))
            .set_block("spec", Some(json!({"a": 1})))
            .set_blocks("port", vec![])
            .build();
        assert_eq!(value, json!({"name": "web", "spec": [{"a": 1}]}));
    }
}
