//! `kubeform show` and `kubeform schema`

use super::Workspace;
use crate::resources::Provider;
use crate::schema::flatmap;
use crate::state::State;
use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write as _;

fn render_state(state: &State, provider: &Provider, flat: bool) -> Result<String> {
    let mut out = String::new();
    for entry in &state.resources {
        let attributes = match provider.get(&entry.type_name) {
            Ok(resource) => resource.schema().block.mask_sensitive(&entry.attributes),
            Err(_) => entry.attributes.clone(),
        };
        writeln!(out, "# {}:", entry.address().to_string().bold())?;
        writeln!(out, "id = {}", entry.id)?;
        if flat {
            for (key, value) in flatmap::flatten(&attributes) {
                writeln!(out, "{} = {}", key, value)?;
            }
        } else {
            writeln!(out, "{}", serde_json::to_string_pretty(&attributes)?)?;
        }
        writeln!(out)?;
    }
    Ok(out)
}

/// Print the managed resources with sensitive values masked
pub fn show(workspace: &Workspace, flat: bool) -> Result<()> {
    let state = workspace.state()?;
    if state.resources.is_empty() {
        println!("The state is empty. No resources are managed.");
        return Ok(());
    }
    print!("{}", render_state(&state, &workspace.provider, flat)?);
    Ok(())
}

/// Print one resource schema, or all of them, as JSON
pub fn schema(workspace: &Workspace, type_name: Option<&str>) -> Result<()> {
    let text = match type_name {
        Some(name) => {
            let resource = workspace.provider.get(name)?;
            serde_json::to_string_pretty(&resource.schema())
        }
        None => serde_json::to_string_pretty(&workspace.provider.schemas()),
    }
    .context("Failed to serialize schema")?;
    println!("{}", text);
    Ok(())
}
