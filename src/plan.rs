//! Planning and applying changes between configuration and state

use crate::config::{ConfigFile, ResourceBlock};
use crate::resources::{Provider, ProviderContext, ResourceType};
use crate::schema::{AttributeChange, OperationTimeouts, carry_computed, diff, flatmap};
use crate::state::{Address, ResourceState, State};
use crate::{Error, Result};
use colored::Colorize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt::{self, Write as _};
use std::path::Path;
use tracing::{debug, info, warn};

/// What apply does to one resource address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    /// Delete then create, because an attribute that cannot be updated in
    /// place changed
    Replace,
    Delete,
    NoOp,
}

impl Action {
    fn symbol(&self) -> &'static str {
        match self {
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace => "-/+",
            Action::Delete => "-",
            Action::NoOp => " ",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Action::Create => "will be created",
            Action::Update => "will be updated in-place",
            Action::Replace => "must be replaced",
            Action::Delete => "will be destroyed",
            Action::NoOp => "is up to date",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Planned action for one address
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub address: Address,
    pub action: Action,
    pub prior: Option<ResourceState>,
    /// Normalized configuration with defaults and carried computed values
    pub desired: Option<Value>,
    pub changes: Vec<AttributeChange>,
    /// Attribute paths forcing replacement
    pub replace_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub add: usize,
    pub change: usize,
    pub destroy: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to add, {} to change, {} to destroy.",
            self.add, self.change, self.destroy
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub changes: Vec<PlannedChange>,
}

impl Plan {
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for change in &self.changes {
            match change.action {
                Action::Create => summary.add += 1,
                Action::Update => summary.change += 1,
                Action::Replace => {
                    summary.add += 1;
                    summary.destroy += 1;
                }
                Action::Delete => summary.destroy += 1,
                Action::NoOp => {}
            }
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action != Action::NoOp)
    }

    pub fn has_destructive_changes(&self) -> bool {
        self.changes
            .iter()
            .any(|c| matches!(c.action, Action::Delete | Action::Replace))
    }
}

/// Normalize, default and validate the attributes of one block
pub fn prepare_desired(resource: &dyn ResourceType, block: &ResourceBlock) -> Result<Value> {
    let schema = resource.schema();
    let value = schema.block.normalize(block.attributes.clone());
    let value = schema.block.apply_defaults(value);
    let mut diags = schema.block.validate(&value);
    if !diags.has_errors() {
        diags.extend(resource.validate(&value));
        if let Err(Error::Attribute { path, message }) = OperationTimeouts::from_attrs(&value) {
            diags.error("Invalid timeout", message, Some(&path));
        }
    }
    for warning in diags.warnings() {
        warn!("{}: {}", block.address(), warning);
    }
    diags
        .within(&block.address().to_string())
        .into_result()?;
    Ok(value)
}

/// Validate every block, collecting all diagnostics before failing
pub fn validate_config(provider: &Provider, config: &ConfigFile) -> Result<()> {
    let mut failures = crate::diagnostics::Diagnostics::new();
    for block in &config.resources {
        let resource = match provider.get(&block.type_name) {
            Ok(r) => r,
            Err(err) => {
                failures.error(
                    "Invalid resource type",
                    err.to_string(),
                    Some(&block.address().to_string()),
                );
                continue;
            }
        };
        if let Err(Error::Validation(diags)) = prepare_desired(resource, block) {
            failures.extend(diags);
        }
    }
    failures.into_result()
}

/// Compare configuration with (refreshed) state
pub fn compute(provider: &Provider, config: &ConfigFile, state: &State) -> Result<Plan> {
    validate_config(provider, config)?;
    let mut plan = Plan::default();
    let mut configured = BTreeSet::new();

    for block in &config.resources {
        let address = block.address();
        configured.insert(address.clone());
        let resource = provider.get(&block.type_name)?;
        let desired = prepare_desired(resource, block)?;

        let Some(prior) = state.get(&address) else {
            plan.changes.push(PlannedChange {
                address,
                action: Action::Create,
                prior: None,
                desired: Some(desired),
                changes: Vec::new(),
                replace_paths: Vec::new(),
            });
            continue;
        };

        let schema = resource.schema();
        let carried = carry_computed(&schema.block, &prior.attributes, desired.clone());
        let changes = diff(&schema.block, &prior.attributes, &carried);
        let mut replace_paths: Vec<String> = changes
            .iter()
            .filter(|c| c.force_new)
            .map(|c| c.path.clone())
            .collect();
        replace_paths.extend(resource.replacement_paths(&prior.attributes, &carried));

        // Replacements start from the configuration alone; the old object's
        // server-assigned values do not carry over
        let (action, desired) = if !replace_paths.is_empty() {
            (Action::Replace, desired)
        } else if changes.is_empty() {
            (Action::NoOp, carried)
        } else {
            (Action::Update, carried)
        };
        debug!("{}: {:?} ({} attribute changes)", address, action, changes.len());
        plan.changes.push(PlannedChange {
            address,
            action,
            prior: Some(prior.clone()),
            desired: Some(desired),
            changes,
            replace_paths,
        });
    }

    for prior in state.resources.iter().rev() {
        if configured.contains(&prior.address()) {
            continue;
        }
        plan.changes.push(PlannedChange {
            address: prior.address(),
            action: Action::Delete,
            prior: Some(prior.clone()),
            desired: None,
            changes: Vec::new(),
            replace_paths: Vec::new(),
        });
    }
    Ok(plan)
}

/// Plan deleting everything in state, newest first
pub fn compute_destroy(state: &State) -> Plan {
    Plan {
        changes: state
            .resources
            .iter()
            .rev()
            .map(|prior| PlannedChange {
                address: prior.address(),
                action: Action::Delete,
                prior: Some(prior.clone()),
                desired: None,
                changes: Vec::new(),
                replace_paths: Vec::new(),
            })
            .collect(),
    }
}

fn display_value(value: Option<&Value>, sensitive: bool) -> String {
    match value {
        _ if sensitive && value.is_some() => "(sensitive)".to_string(),
        None => "null".to_string(),
        Some(Value::String(s)) => format!("{:?}", s),
        Some(other) => other.to_string(),
    }
}

/// Human readable plan
pub fn render(plan: &Plan, provider: &Provider) -> String {
    let mut out = String::new();
    for change in plan.changes.iter().filter(|c| c.action != Action::NoOp) {
        let header = format!("{} {}", change.action.symbol(), change.address);
        let header = match change.action {
            Action::Create => header.green(),
            Action::Update => header.yellow(),
            Action::Replace => header.magenta(),
            _ => header.red(),
        };
        let _ = writeln!(out, "  # {} {}", change.address, change.action.verb());
        let _ = writeln!(out, "  {}", header.bold());

        let schema = provider.get(&change.address.type_name).ok().map(|r| r.schema());
        match change.action {
            Action::Create => {
                if let (Some(desired), Some(schema)) = (&change.desired, &schema) {
                    for (key, value) in flatmap::flatten(&schema.block.mask_sensitive(desired)) {
                        let _ = writeln!(out, "      {} {} = {:?}", "+".green(), key, value);
                    }
                }
            }
            Action::Update | Action::Replace => {
                for attr in &change.changes {
                    let forces = if change.replace_paths.contains(&attr.path) {
                        " # forces replacement".red().to_string()
                    } else {
                        String::new()
                    };
                    let _ = writeln!(
                        out,
                        "      {} {}: {} => {}{}",
                        "~".yellow(),
                        attr.path,
                        display_value(attr.old.as_ref(), attr.sensitive),
                        display_value(attr.new.as_ref(), attr.sensitive),
                        forces
                    );
                }
                for path in change
                    .replace_paths
                    .iter()
                    .filter(|p| !change.changes.iter().any(|c| &c.path == *p))
                {
                    let _ = writeln!(out, "      {} {} # forces replacement", "~".yellow(), path);
                }
            }
            _ => {
                if let Some(prior) = &change.prior {
                    let _ = writeln!(out, "      {} id = {:?}", "-".red(), prior.id);
                }
            }
        }
        out.push('\n');
    }
    let summary = plan.summary();
    if plan.has_changes() {
        let _ = writeln!(out, "{}", summary.to_string().bold());
    } else {
        let _ = writeln!(out, "{}", "No changes. Infrastructure matches the configuration.".green());
    }
    out
}

/// Re-read every resource in state; objects gone from the cluster leave the
/// state. Returns the removed addresses.
pub async fn refresh(provider: &Provider, ctx: &ProviderContext, state: &mut State) -> Result<Vec<Address>> {
    let mut removed = Vec::new();
    let mut refreshed = Vec::with_capacity(state.resources.len());
    for entry in &state.resources {
        let resource = provider.get(&entry.type_name)?;
        match resource.read(ctx, &entry.id, &entry.attributes).await? {
            Some(attributes) => refreshed.push(ResourceState {
                attributes,
                ..entry.clone()
            }),
            None => removed.push(entry.address()),
        }
    }
    state.resources = refreshed;
    Ok(removed)
}

/// Outcome counts of an apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyResult {
    pub added: usize,
    pub changed: usize,
    pub destroyed: usize,
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Apply complete! Resources: {} added, {} changed, {} destroyed.",
            self.added, self.changed, self.destroyed
        )
    }
}

async fn create_one(
    resource: &dyn ResourceType,
    ctx: &ProviderContext,
    address: &Address,
    desired: &Value,
) -> Result<ResourceState> {
    let (id, attributes) = resource.create(ctx, desired).await?;
    Ok(ResourceState {
        type_name: address.type_name.clone(),
        name: address.name.clone(),
        id,
        schema_version: resource.schema().version,
        attributes,
    })
}

/// Execute a plan: creates and updates in configuration order, then deletes.
/// State is written after every step so a failure leaves it accurate.
pub async fn apply(
    plan: &Plan,
    provider: &Provider,
    ctx: &ProviderContext,
    state: &mut State,
    state_path: &Path,
) -> Result<ApplyResult> {
    let mut result = ApplyResult::default();
    let (deletes, writes): (Vec<&PlannedChange>, Vec<&PlannedChange>) = plan
        .changes
        .iter()
        .filter(|c| c.action != Action::NoOp)
        .partition(|c| c.action == Action::Delete);

    for change in writes.into_iter().chain(deletes) {
        let resource = provider.get(&change.address.type_name)?;
        let missing = |what: &str| Error::State(format!("{} has no {} to apply", change.address, what));
        match change.action {
            Action::Create => {
                let desired = change.desired.as_ref().ok_or_else(|| missing("configuration"))?;
                info!("{}: creating", change.address);
                let ctx = &ctx.with_resource_timeouts(desired)?;
                let entry = create_one(resource, ctx, &change.address, desired).await?;
                state.upsert(entry);
                result.added += 1;
            }
            Action::Update => {
                let desired = change.desired.as_ref().ok_or_else(|| missing("configuration"))?;
                let prior = change.prior.as_ref().ok_or_else(|| missing("prior state"))?;
                info!("{}: updating {}", change.address, prior.id);
                let ctx = &ctx.with_resource_timeouts(desired)?;
                let attributes = resource.update(ctx, &prior.id, &prior.attributes, desired).await?;
                state.upsert(ResourceState {
                    attributes,
                    ..prior.clone()
                });
                result.changed += 1;
            }
            Action::Replace => {
                let desired = change.desired.as_ref().ok_or_else(|| missing("configuration"))?;
                let prior = change.prior.as_ref().ok_or_else(|| missing("prior state"))?;
                info!("{}: replacing {}", change.address, prior.id);
                resource
                    .delete(&ctx.with_resource_timeouts(&prior.attributes)?, &prior.id)
                    .await?;
                state.remove(&change.address);
                state.save(state_path)?;
                result.destroyed += 1;
                let ctx = &ctx.with_resource_timeouts(desired)?;
                let entry = create_one(resource, ctx, &change.address, desired).await?;
                state.upsert(entry);
                result.added += 1;
            }
            Action::Delete => {
                let prior = change.prior.as_ref().ok_or_else(|| missing("prior state"))?;
                info!("{}: destroying {}", change.address, prior.id);
                let ctx = &ctx.with_resource_timeouts(&prior.attributes)?;
                resource.delete(ctx, &prior.id).await?;
                state.remove(&change.address);
                result.destroyed += 1;
            }
            Action::NoOp => continue,
        }
        state.save(state_path)?;
    }
    Ok(result)
}
