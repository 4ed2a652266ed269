//! Persistent record of managed objects

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

pub const STATE_VERSION: u32 = 1;

/// `<type>.<name>` address of a resource block
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub type_name: String,
    pub name: String,
}

impl Address {
    pub fn new(type_name: &str, name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.name)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((type_name, name))
                if !type_name.is_empty() && !name.is_empty() && !name.contains('.') =>
            {
                Ok(Address::new(type_name, name))
            }
            _ => Err(Error::State(format!(
                "invalid resource address {:?}, expected <type>.<name>",
                s
            ))),
        }
    }
}

/// One managed object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub schema_version: u32,
    pub attributes: Value,
}

impl ResourceState {
    pub fn address(&self) -> Address {
        Address::new(&self.type_name, &self.name)
    }
}

/// The whole state file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct State {
    pub version: u32,
    pub serial: u64,
    pub lineage: String,
    #[serde(default)]
    pub resources: Vec<ResourceState>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            resources: Vec::new(),
        }
    }
}

impl State {
    /// Read the state file; a missing file is an empty state
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No state at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .map_err(|e| Error::State(format!("failed to read {}: {}", path.display(), e)))?;
        let state: State = serde_json::from_str(&text)
            .map_err(|e| Error::State(format!("failed to parse {}: {}", path.display(), e)))?;
        if state.version != STATE_VERSION {
            return Err(Error::State(format!(
                "unsupported state version {} in {}",
                state.version,
                path.display()
            )));
        }
        Ok(state)
    }

    /// Write atomically: a temp file in the same directory renamed over the target.
    /// Bumps the serial.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.serial += 1;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let text = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::State(format!("failed to create temp file: {}", e)))?;
        tmp.write_all(text.as_bytes())
            .and_then(|_| tmp.write_all(b"\n"))
            .map_err(|e| Error::State(format!("failed to write state: {}", e)))?;
        tmp.persist(path)
            .map_err(|e| Error::State(format!("failed to replace {}: {}", path.display(), e)))?;
        debug!("Wrote state serial {} to {}", self.serial, path.display());
        Ok(())
    }

    pub fn get(&self, address: &Address) -> Option<&ResourceState> {
        self.resources.iter().find(|r| &r.address() == address)
    }

    /// Insert or replace the entry for the resource's address, keeping its position
    pub fn upsert(&mut self, resource: ResourceState) {
        let address = resource.address();
        match self.resources.iter_mut().find(|r| r.address() == address) {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    pub fn remove(&mut self, address: &Address) -> Option<ResourceState> {
        let index = self.resources.iter().position(|r| &r.address() == address)?;
        Some(self.resources.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(name: &str, id: &str) -> ResourceState {
        ResourceState {
            type_name: "kubernetes_config_map".to_string(),
            name: name.to_string(),
            id: id.to_string(),
            schema_version: 0,
            attributes: json!({"metadata": [{"name": name}]}),
        }
    }

    #[test]
    fn test_address_parsing() {
        let address: Address = "kubernetes_service.web".parse().unwrap();
        assert_eq!(address.type_name, "kubernetes_service");
        assert_eq!(address.to_string(), "kubernetes_service.web");
        assert!("kubernetes_service".parse::<Address>().is_err());
        assert!("a.b.c".parse::<Address>().is_err());
    }

    #[test]
    fn test_upsert_and_remove() {
        let mut state = State::default();
        state.upsert(entry("a", "default/a"));
        state.upsert(entry("b", "default/b"));
        state.upsert(entry("a", "other/a"));
        assert_eq!(state.resources.len(), 2);
        assert_eq!(state.resources[0].id, "other/a");

        let address = Address::new("kubernetes_config_map", "a");
        assert!(state.remove(&address).is_some());
        assert!(state.get(&address).is_none());
        assert!(state.remove(&address).is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = State::load(&dir.path().join("absent.json")).unwrap();
        assert!(state.resources.is_empty());
        assert_eq!(state.serial, 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubeform.state.json");
        let mut state = State::default();
        state.upsert(entry("a", "default/a"));
        state.save(&path).unwrap();
        state.save(&path).unwrap();

        let loaded = State::load(&path).unwrap();
        assert_eq!(loaded.serial, 2);
        assert_eq!(loaded.lineage, state.lineage);
        assert_eq!(loaded.resources, state.resources);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version": 9, "serial": 1, "lineage": "x"}"#).unwrap();
        assert!(State::load(&path).is_err());
    }
}
