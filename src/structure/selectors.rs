//! Label selectors in their API (camelCase) shape

use super::helpers::{ObjectBuilder, get_blocks, get_str, get_string_list, get_string_map, string_map_value};
use crate::schema::{AttrKind, Attribute, Schema};
use serde_json::{Map, Value, json};

/// `selector`-style block with `match_labels` and `match_expressions`
pub fn label_selector_schema() -> Attribute {
    Attribute::single_block(
        Schema::new()
            .attr(
                "match_labels",
                Attribute::map()
                    .optional()
                    .description("Map of {key,value} pairs, each an equality requirement"),
            )
            .attr(
                "match_expressions",
                Attribute::block(
                    Schema::new()
                        .attr("key", Attribute::string().optional())
                        .attr(
                            "operator",
                            Attribute::string()
                                .optional()
                                .description("One of In, NotIn, Exists and DoesNotExist"),
                        )
                        .attr("values", Attribute::set_of(AttrKind::String).optional()),
                )
                .optional(),
            ),
    )
}

/// Selector block into `{"matchLabels": .., "matchExpressions": [..]}`
pub fn expand_label_selector(block: &Value) -> Value {
    let mut out = Map::new();
    if let Some(labels) = get_string_map(block, "match_labels") {
        out.insert("matchLabels".to_string(), string_map_value(&labels));
    }
    let expressions: Vec<Value> = get_blocks(block, "match_expressions")
        .into_iter()
        .map(|expr| {
            let mut e = Map::new();
            e.insert("key".to_string(), json!(get_str(expr, "key").unwrap_or_default()));
            e.insert(
                "operator".to_string(),
                json!(get_str(expr, "operator").unwrap_or_default()),
            );
            if let Some(values) = get_string_list(expr, "values") {
                e.insert("values".to_string(), json!(values));
            }
            Value::Object(e)
        })
        .collect();
    if !expressions.is_empty() {
        out.insert("matchExpressions".to_string(), Value::Array(expressions));
    }
    Value::Object(out)
}

/// API selector into a selector block
pub fn flatten_label_selector(selector: &Value) -> Value {
    let expressions = selector
        .get("matchExpressions")
        .and_then(Value::as_array)
        .map(|exprs| {
            exprs
                .iter()
                .map(|e| {
                    ObjectBuilder::new()
                        .set_opt("key", get_str(e, "key"))
                        .set_opt("operator", get_str(e, "operator"))
                        .set_list("values", get_string_list(e, "values").as_ref())
                        .build()
                })
                .collect()
        })
        .unwrap_or_default();
    ObjectBuilder::new()
        .set_map("match_labels", get_string_map(selector, "matchLabels").as_ref())
        .set_blocks("match_expressions", expressions)
        .build()
}
