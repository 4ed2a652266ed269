//! RFC 6902 JSON Patch generation from two versions of an API object

use crate::Result;
use serde::Serialize;
use serde_json::Value;

/// A single JSON Patch operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl PatchOp {
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Remove { path } | PatchOp::Replace { path, .. } => {
                path
            }
        }
    }
}

/// Escape an object key for use in a JSON pointer (RFC 6901)
pub fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Operations turning `old` into `new`. Objects are compared key by key;
/// arrays and scalars that differ are replaced whole.
pub fn diff(old: &Value, new: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_at("", old, new, &mut ops);
    ops
}

fn diff_at(path: &str, old: &Value, new: &Value, ops: &mut Vec<PatchOp>) {
    match (old, new) {
        (Value::Object(o), Value::Object(n)) => {
            for (key, old_value) in o {
                let child = format!("{}/{}", path, escape(key));
                match n.get(key) {
                    None => ops.push(PatchOp::Remove { path: child }),
                    Some(new_value) => diff_at(&child, old_value, new_value, ops),
                }
            }
            for (key, new_value) in n {
                if !o.contains_key(key) {
                    ops.push(PatchOp::Add {
                        path: format!("{}/{}", path, escape(key)),
                        value: new_value.clone(),
                    });
                }
            }
        }
        _ if old == new => {}
        _ => ops.push(PatchOp::Replace {
            path: path.to_string(),
            value: new.clone(),
        }),
    }
}

/// Convert operations into the patch type accepted by the API client
pub fn to_json_patch(ops: &[PatchOp]) -> Result<json_patch::Patch> {
    Ok(serde_json::from_value(serde_json::to_value(ops)?)?)
}
