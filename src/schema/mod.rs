//! Resource schemas: declaration, validation, diffing and flat encoding

pub mod diff;
pub mod flatmap;
pub mod quantity;
pub mod types;
mod validate;

pub use diff::{AttributeChange, carry_computed, diff, is_unset};
pub use types::{AttrKind, Attribute, OperationTimeouts, ResourceSchema, Schema};
