//! `kubeform validate`

use super::Workspace;
use crate::plan::validate_config;
use anyhow::Result;
use colored::Colorize;

/// Parse the configuration and validate every block without contacting the cluster
pub fn validate(workspace: &Workspace) -> Result<()> {
    let config = workspace.config()?;
    validate_config(&workspace.provider, &config)?;
    println!(
        "{} {} resource block(s) in {}",
        "Success!".green().bold(),
        config.resources.len(),
        workspace.config_path.display()
    );
    Ok(())
}
