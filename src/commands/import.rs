//! `kubeform import`

use super::Workspace;
use crate::state::{Address, ResourceState};
use anyhow::{Result, bail};
use colored::Colorize;

/// Read an existing object and start managing it under `address`
pub async fn import(workspace: &Workspace, address: &str, id: &str) -> Result<()> {
    let address: Address = address.parse()?;
    let resource = workspace.provider.get(&address.type_name)?;
    let config = workspace.config().ok();
    if let Some(config) = &config
        && config.find(&address).is_none()
    {
        crate::log_warn!(
            "{} is not declared in {}; the next plan will destroy it",
            address,
            workspace.config_path.display()
        );
    }

    let mut state = workspace.state()?;
    if state.get(&address).is_some() {
        bail!("{} is already managed; remove it from state first", address);
    }

    let ctx = workspace.connect(config.as_ref()).await?;
    if !resource.exists(&ctx, id).await? {
        bail!("Cannot import non-existent object {} ({})", id, address.type_name);
    }
    let Some(attributes) = resource.import(&ctx, id).await? else {
        bail!("Object {} disappeared during import", id);
    };

    state.upsert(ResourceState {
        type_name: address.type_name.clone(),
        name: address.name.clone(),
        id: id.to_string(),
        schema_version: resource.schema().version,
        attributes,
    });
    state.save(workspace.state_path())?;
    println!("{} {} from {}", "Imported".green().bold(), address, id);
    Ok(())
}
