//! `kubeform plan` and `kubeform refresh`

use super::Workspace;
use crate::config::ConfigFile;
use crate::plan::{self, Plan};
use crate::resources::ProviderContext;
use crate::state::State;
use crate::utils::progress::with_spinner_result;
use anyhow::Result;

/// Refresh (when enabled) and compute the plan for the current configuration
pub(crate) async fn prepare(
    workspace: &Workspace,
    config: &ConfigFile,
    ctx: &ProviderContext,
    state: &mut State,
) -> Result<Plan> {
    if workspace.settings.behavior.refresh_before_plan && !state.resources.is_empty() {
        refresh_state(workspace, ctx, state).await?;
    }
    Ok(plan::compute(&workspace.provider, config, state)?)
}

async fn refresh_state(workspace: &Workspace, ctx: &ProviderContext, state: &mut State) -> Result<()> {
    let message = format!("Refreshing {} resource(s)", state.resources.len());
    let removed = with_spinner_result(
        &message,
        "Refreshed state",
        plan::refresh(&workspace.provider, ctx, state),
    )
    .await?;
    for address in removed {
        crate::log_warn!("{} no longer exists and was removed from state", address);
    }
    Ok(())
}

/// Print the changes an apply would make
pub async fn plan(workspace: &Workspace) -> Result<()> {
    let config = workspace.config()?;
    let ctx = workspace.connect(Some(&config)).await?;
    let mut state = workspace.state()?;

    let plan = prepare(workspace, &config, &ctx, &mut state).await?;
    print!("{}", plan::render(&plan, &workspace.provider));
    Ok(())
}

/// Re-read every resource in state and persist the result
pub async fn refresh(workspace: &Workspace) -> Result<()> {
    let config = workspace.config().ok();
    let ctx = workspace.connect(config.as_ref()).await?;
    let mut state = workspace.state()?;

    refresh_state(workspace, &ctx, &mut state).await?;
    state.save(workspace.state_path())?;
    println!("{} resource(s) in state", state.resources.len());
    Ok(())
}
