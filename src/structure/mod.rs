//! Expand/flatten machinery shared by resource types

pub mod helpers;
pub mod metadata;
pub mod pod;
pub mod selectors;

pub use helpers::ObjectBuilder;
pub use metadata::{
    MetadataFilter, expand_metadata, flatten_metadata, metadata_schema, validate_metadata,
};
