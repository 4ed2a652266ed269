//! Settings and resource configuration files

pub mod manifest;
pub mod settings;

pub use manifest::{ConfigFile, ResourceBlock};
pub use settings::{ProviderSettings, Settings, Timeouts};
