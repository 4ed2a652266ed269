//! `kubeform apply` and `kubeform destroy`

use super::Workspace;
use super::plan::prepare;
use crate::plan::{self, Plan};
use crate::resources::ProviderContext;
use crate::state::State;
use crate::utils::confirm_unless;
use anyhow::Result;
use colored::Colorize;

fn confirmation_prompt(plan: &Plan) -> String {
    let summary = plan.summary();
    if summary.destroy > 0 {
        format!(
            "{} resource(s) will be destroyed. Apply these changes?",
            summary.destroy
        )
    } else {
        "Apply these changes?".to_string()
    }
}

async fn execute(
    workspace: &Workspace,
    plan: &Plan,
    ctx: &ProviderContext,
    state: &mut State,
) -> Result<()> {
    let result = plan::apply(plan, &workspace.provider, ctx, state, workspace.state_path()).await;
    match result {
        Ok(done) => {
            println!("\n{}", done.to_string().green().bold());
            Ok(())
        }
        Err(err) => {
            crate::log_error!(
                "Apply stopped; state at {} reflects the completed steps",
                workspace.state_path().display()
            );
            Err(err.into())
        }
    }
}

/// Plan, confirm and execute the changes
pub async fn apply(workspace: &Workspace, auto_approve: bool) -> Result<()> {
    let config = workspace.config()?;
    let ctx = workspace.connect(Some(&config)).await?;
    let mut state = workspace.state()?;

    let plan = prepare(workspace, &config, &ctx, &mut state).await?;
    print!("{}", plan::render(&plan, &workspace.provider));
    if !plan.has_changes() {
        return Ok(());
    }

    if !confirm_unless(auto_approve, &confirmation_prompt(&plan))? {
        println!("Apply cancelled.");
        return Ok(());
    }
    execute(workspace, &plan, &ctx, &mut state).await
}

/// Delete every resource in state, newest first
pub async fn destroy(workspace: &Workspace, auto_approve: bool) -> Result<()> {
    let config = workspace.config().ok();
    let ctx = workspace.connect(config.as_ref()).await?;
    let mut state = workspace.state()?;

    let plan = plan::compute_destroy(&state);
    print!("{}", plan::render(&plan, &workspace.provider));
    if !plan.has_changes() {
        return Ok(());
    }

    let approved = auto_approve || !workspace.settings.behavior.confirm_destructive;
    if !confirm_unless(approved, "Destroy all managed resources?")? {
        println!("Destroy cancelled.");
        return Ok(());
    }
    execute(workspace, &plan, &ctx, &mut state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use crate::resources::Provider;

    #[test]
    fn test_confirmation_prompt() {
        let provider = Provider::new();
        let config = ConfigFile::parse(
            "resources:\n  - type: kubernetes_namespace\n    name: team\n    attributes:\n      metadata:\n        name: team\n",
        )
        .unwrap();
        let plan = crate::plan::compute(&provider, &config, &State::default()).unwrap();
        assert_eq!(confirmation_prompt(&plan), "Apply these changes?");

        let mut state = State::default();
        state.upsert(crate::state::ResourceState {
            type_name: "kubernetes_namespace".to_string(),
            name: "old".to_string(),
            id: "old".to_string(),
            schema_version: 0,
            attributes: serde_json::json!({"metadata": [{"name": "old"}]}),
        });
        let plan = crate::plan::compute_destroy(&state);
        assert_eq!(
            confirmation_prompt(&plan),
            "1 resource(s) will be destroyed. Apply these changes?"
        );
    }
}
