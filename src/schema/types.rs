//! Attribute and resource schema declarations

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Value type of an attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttrKind {
    String,
    Int,
    Bool,
    /// Map of string to string
    Map,
    /// Map of string to resource quantity, compared by value
    QuantityMap,
    List {
        elem: Box<AttrKind>,
    },
    /// Unordered list without duplicates
    Set {
        elem: Box<AttrKind>,
    },
    /// Nested block, stored as a list of objects
    Block {
        block: Schema,
        min_items: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    /// Arbitrary JSON document
    Any,
}

/// A single attribute of a block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    #[serde(flatten)]
    pub kind: AttrKind,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub computed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force_new: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Attribute {
    pub fn new(kind: AttrKind) -> Self {
        Self {
            kind,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            sensitive: false,
            default: None,
            description: String::new(),
        }
    }

    pub fn string() -> Self {
        Self::new(AttrKind::String)
    }

    pub fn int() -> Self {
        Self::new(AttrKind::Int)
    }

    pub fn bool() -> Self {
        Self::new(AttrKind::Bool)
    }

    pub fn map() -> Self {
        Self::new(AttrKind::Map)
    }

    pub fn quantity_map() -> Self {
        Self::new(AttrKind::QuantityMap)
    }

    pub fn any() -> Self {
        Self::new(AttrKind::Any)
    }

    pub fn list_of(elem: AttrKind) -> Self {
        Self::new(AttrKind::List {
            elem: Box::new(elem),
        })
    }

    pub fn set_of(elem: AttrKind) -> Self {
        Self::new(AttrKind::Set {
            elem: Box::new(elem),
        })
    }

    pub fn block(block: Schema) -> Self {
        Self::new(AttrKind::Block {
            block,
            min_items: 0,
            max_items: None,
        })
    }

    /// Block that may appear at most once
    pub fn single_block(block: Schema) -> Self {
        Self::block(block).max_items(1)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.optional = false;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self.required = false;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn max_items(mut self, n: usize) -> Self {
        if let AttrKind::Block { max_items, .. } = &mut self.kind {
            *max_items = Some(n);
        }
        self
    }

    pub fn min_items(mut self, n: usize) -> Self {
        if let AttrKind::Block { min_items, .. } = &mut self.kind {
            *min_items = n;
        }
        self
    }

    /// Set by the server only, never by configuration
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }

    /// Nested block schema, if this attribute is a block
    pub fn block_schema(&self) -> Option<&Schema> {
        match &self.kind {
            AttrKind::Block { block, .. } => Some(block),
            _ => None,
        }
    }
}

/// Attributes of a block, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Schema {
    attributes: BTreeMap<String, Attribute>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attr(mut self, name: &str, attribute: Attribute) -> Self {
        self.attributes.insert(name.to_string(), attribute);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Attribute)> {
        self.attributes.iter()
    }

    /// Replace sensitive values with a placeholder for display
    pub fn mask_sensitive(&self, value: &Value) -> Value {
        let Some(obj) = value.as_object() else {
            return value.clone();
        };
        let mut out = serde_json::Map::new();
        for (key, v) in obj {
            let masked = match self.get(key) {
                Some(attr) if attr.sensitive && !v.is_null() => {
                    Value::String("(sensitive)".to_string())
                }
                Some(attr) => match (attr.block_schema(), v) {
                    (Some(block), Value::Array(items)) => {
                        Value::Array(items.iter().map(|i| block.mask_sensitive(i)).collect())
                    }
                    _ => v.clone(),
                },
                None => v.clone(),
            };
            out.insert(key.clone(), masked);
        }
        Value::Object(out)
    }
}

/// Per-operation timeouts from a resource's `timeouts` block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub create: Option<Duration>,
    pub update: Option<Duration>,
    pub delete: Option<Duration>,
}

impl OperationTimeouts {
    /// Schema of the `timeouts` block
    pub fn block() -> Attribute {
        let duration = |op: &str| {
            Attribute::string()
                .optional()
                .description(format!("How long to wait for {op}, e.g. \"90s\" or \"10m\""))
        };
        Attribute::single_block(
            Schema::new()
                .attr("create", duration("create"))
                .attr("update", duration("update"))
                .attr("delete", duration("delete")),
        )
        .optional()
    }

    /// Read the `timeouts` block of a resource's attributes, if any
    pub fn from_attrs(attrs: &Value) -> Result<Self> {
        let Some(block) = attrs.pointer("/timeouts/0") else {
            return Ok(Self::default());
        };
        let field = |op: &str| -> Result<Option<Duration>> {
            match block.get(op).and_then(Value::as_str) {
                None | Some("") => Ok(None),
                Some(text) => parse_duration(text).map(Some).ok_or_else(|| {
                    Error::attribute(
                        format!("timeouts.0.{op}"),
                        format!("invalid duration {text:?}, expected e.g. \"30s\", \"10m\" or \"1h30m\""),
                    )
                }),
            }
        };
        Ok(Self {
            create: field("create")?,
            update: field("update")?,
            delete: field("delete")?,
        })
    }
}

/// Parse durations like `45s`, `10m` or `1h30m`
pub fn parse_duration(text: &str) -> Option<Duration> {
    let mut total = 0u64;
    let mut digits = String::new();
    for c in text.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            _ => return None,
        };
        let n: u64 = digits.parse().ok()?;
        total = total.checked_add(n.checked_mul(unit)?)?;
        digits.clear();
    }
    if !digits.is_empty() || total == 0 {
        return None;
    }
    Some(Duration::from_secs(total))
}

/// Everything the provider declares about one resource type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSchema {
    pub type_name: String,
    pub version: u32,
    pub namespaced: bool,
    pub description: String,
    pub block: Schema,
    /// Whether the block accepts a `timeouts` block
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timeouts: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Schema {
        Schema::new()
            .attr(
                "metadata",
                Attribute::single_block(
                    Schema::new()
                        .attr("name", Attribute::string().optional())
                        .attr("uid", Attribute::string().computed()),
                )
                .required(),
            )
            .attr("data", Attribute::map().optional().sensitive())
    }

    #[test]
    fn test_mask_sensitive() {
        let schema = sample();
        let masked = schema.mask_sensitive(&json!({
            "metadata": [{"name": "db"}],
            "data": {"password": "hunter2"}
        }));
        assert_eq!(masked["data"], json!("(sensitive)"));
        assert_eq!(masked["metadata"][0]["name"], json!("db"));
    }

    #[test]
    fn test_schema_serializes_flags() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["metadata"]["type"], json!("block"));
        assert_eq!(value["metadata"]["max_items"], json!(1));
        assert_eq!(value["data"]["sensitive"], json!(true));
        assert!(value["data"].get("computed").is_none());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("0s"), None);
        assert_eq!(parse_duration("5d"), None);
    }

    #[test]
    fn test_timeouts_from_attrs() {
        let attrs = json!({"timeouts": [{"create": "10m", "delete": ""}]});
        let timeouts = OperationTimeouts::from_attrs(&attrs).unwrap();
        assert_eq!(timeouts.create, Some(Duration::from_secs(600)));
        assert_eq!(timeouts.update, None);
        assert_eq!(timeouts.delete, None);

        assert_eq!(
            OperationTimeouts::from_attrs(&json!({})).unwrap(),
            OperationTimeouts::default()
        );
        let err = OperationTimeouts::from_attrs(&json!({"timeouts": [{"update": "soon"}]}))
            .unwrap_err();
        assert!(err.to_string().contains("timeouts.0.update"));
    }
}
