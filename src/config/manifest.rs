//! Resource configuration file: the declared resource blocks

use crate::config::settings::ProviderSettings;
use crate::state::Address;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// One declared resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResourceBlock {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default = "empty_object")]
    pub attributes: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl ResourceBlock {
    pub fn address(&self) -> Address {
        Address::new(&self.type_name, &self.name)
    }
}

/// Parsed configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Connection overrides applied on top of the settings file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderSettings>,

    #[serde(default)]
    pub resources: Vec<ResourceBlock>,
}

impl ConfigFile {
    /// Parse YAML or JSON text
    pub fn parse(text: &str) -> Result<Self> {
        let config: ConfigFile = if text.trim_start().starts_with('{') {
            serde_json::from_str(text).context("Failed to parse configuration as JSON")?
        } else {
            serde_yaml::from_str(text).context("Failed to parse configuration as YAML")?
        };
        config.check_addresses()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid configuration: {}", path.display()))
    }

    fn check_addresses(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for block in &self.resources {
            if block.name.is_empty()
                || !block
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                bail!(
                    "Invalid resource name {:?}: use letters, digits, '_' and '-'",
                    block.name
                );
            }
            if !seen.insert(block.address()) {
                bail!("Duplicate resource address: {}", block.address());
            }
        }
        Ok(())
    }

    pub fn find(&self, address: &Address) -> Option<&ResourceBlock> {
        self.resources.iter().find(|b| &b.address() == address)
    }
}
