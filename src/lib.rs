//! kubeform: Kubernetes resources declared as schema-checked attribute
//! trees, reconciled through create/read/update/delete callbacks

pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod k8s;
pub mod plan;
pub mod resources;
pub mod schema;
pub mod state;
pub mod structure;
pub mod utils;

pub use error::{Error, Result};
