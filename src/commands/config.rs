//! `kubeform config` subcommands

use crate::config::Settings;
use anyhow::{Result, bail};
use std::fs;
use std::path::Path;

/// Write an example settings file
pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, Settings::example_config()?)?;
    crate::log_info!("Wrote {}", path.display());
    println!("Created settings file at {}", path.display());
    Ok(())
}

/// Print the effective settings as TOML
pub fn show(settings: &Settings) -> Result<()> {
    print!("{}", toml::to_string_pretty(settings)?);
    Ok(())
}
