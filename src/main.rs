//! kubeform CLI - plan and apply Kubernetes resources from a declarative configuration

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use kubeform::commands::{self, GlobalOptions, Workspace};
use kubeform::utils::errors::{display_error_and_exit, enhance_error};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubeform")]
#[command(author, version, about = "Declarative Kubernetes resources with plan and apply", long_about = None)]
struct Cli {
    /// Verbose output (can be used multiple times: -v, -vv, -vvv)
    /// -v: INFO, -vv: DEBUG, -vvv: TRACE
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Settings file (default: .kubeform.toml or ~/.config/kubeform/config.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Resource configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State file
    #[arg(short, long, global = true)]
    state: Option<PathBuf>,

    /// Path to kubeconfig file (when unset, KUBE_CONFIG_PATH, then the
    /// KUBECONFIG search list, then ~/.kube/config)
    #[arg(long, global = true)]
    kubeconfig: Option<String>,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    context: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration without contacting the cluster
    Validate,

    /// Show the changes apply would make
    Plan,

    /// Create, update and delete resources to match the configuration
    Apply {
        /// Skip the interactive confirmation
        #[arg(long)]
        auto_approve: bool,
    },

    /// Delete every managed resource
    Destroy {
        /// Skip the interactive confirmation
        #[arg(long)]
        auto_approve: bool,
    },

    /// Bring an existing object under management
    Import {
        /// Resource address, e.g. kubernetes_config_map.app
        address: String,

        /// Object ID, e.g. default/app
        id: String,
    },

    /// Print the managed resources
    Show {
        /// Print flattened key = value pairs
        #[arg(long)]
        flat: bool,
    },

    /// Print resource schemas as JSON
    Schema {
        /// Resource type (all types when omitted)
        type_name: Option<String>,
    },

    /// Re-read every managed resource and update the state
    Refresh,

    /// Manage the settings file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write an example settings file
    Init {
        /// Destination (default: .kubeform.toml)
        #[arg(default_value = ".kubeform.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective settings
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    kubeform::utils::logger::init(cli.verbose);

    if let Err(err) = run(cli).await {
        display_error_and_exit(enhance_error(err));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let options = GlobalOptions {
        settings: cli.settings,
        config: cli.config,
        state: cli.state,
        kubeconfig: cli.kubeconfig,
        context: cli.context,
    };

    match cli.command {
        Commands::Completion { shell } => handle_completion_command(shell),
        Commands::Version => handle_version_command(),
        Commands::Config { command } => handle_config_command(command, &options),
        command => {
            let workspace = Workspace::load(&options)?;
            handle_workspace_command(command, &workspace).await
        }
    }
}

async fn handle_workspace_command(command: Commands, workspace: &Workspace) -> Result<()> {
    match command {
        Commands::Validate => commands::validate::validate(workspace),
        Commands::Plan => commands::plan::plan(workspace).await,
        Commands::Apply { auto_approve } => commands::apply::apply(workspace, auto_approve).await,
        Commands::Destroy { auto_approve } => {
            commands::apply::destroy(workspace, auto_approve).await
        }
        Commands::Import { address, id } => {
            commands::import::import(workspace, &address, &id).await
        }
        Commands::Show { flat } => commands::show::show(workspace, flat),
        Commands::Schema { type_name } => commands::show::schema(workspace, type_name.as_deref()),
        Commands::Refresh => commands::plan::refresh(workspace).await,
        Commands::Config { .. } | Commands::Completion { .. } | Commands::Version => Ok(()),
    }
}

fn handle_config_command(command: ConfigCommands, options: &GlobalOptions) -> Result<()> {
    match command {
        ConfigCommands::Init { path, force } => commands::config::init(&path, force),
        ConfigCommands::Show => {
            let workspace = Workspace::load(options)?;
            commands::config::show(&workspace.settings)
        }
    }
}

fn handle_completion_command(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "kubeform", &mut io::stdout());
    Ok(())
}

fn handle_version_command() -> Result<()> {
    println!("kubeform {}", env!("CARGO_PKG_VERSION"));
    println!("Declarative Kubernetes resources with plan and apply");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kubeconfig_flag_does_not_read_env() {
        // KUBECONFIG may hold a colon-separated list; kube resolves it itself
        let command = Cli::command();
        let flag = command
            .get_arguments()
            .find(|arg| arg.get_id() == "kubeconfig")
            .unwrap();
        assert!(flag.get_env().is_none());

        let cli = Cli::try_parse_from(["kubeform", "plan"]).unwrap();
        assert!(cli.kubeconfig.is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["kubeform", "apply", "--auto-approve", "--context", "kind-dev"]).unwrap();
        assert_eq!(cli.context.as_deref(), Some("kind-dev"));
        assert!(matches!(cli.command, Commands::Apply { auto_approve: true }));
    }
}
