//! Command-line interface for agentfleet.
//!
//! Provides commands for deploying a service, resetting the working
//! directory, previewing the stage plan, and inspecting past runs.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::{self, ResolvedConfig};
use crate::core::{validate_layout, DeployContext, DeploymentRequest, EventStore, Sequencer};
use crate::domain::{KeyMaterial, PackageId, RunState, Stage};

pub mod plan;

/// Exit code for errors outside the stage pipeline (bad arguments, unreadable
/// key, journal I/O). Stage failures exit with the stage index, 1..=11.
pub const EXIT_USAGE: u8 = 64;

/// agentfleet - multi-agent service deployment sequencer
#[derive(Parser, Debug)]
#[command(name = "agentfleet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Packages a command operates on
#[derive(clap::Args, Debug, Clone)]
pub struct TargetArgs {
    /// Service public id (namespace/name:version)
    pub service: String,

    /// Agent package to fetch and key (defaults to the service id)
    #[arg(long)]
    pub agent: Option<String>,

    /// Directory name the service is fetched into (default: <name>_service)
    #[arg(long)]
    pub alias: Option<String>,

    /// Working directory (overrides config and AGENTFLEET_WORKDIR)
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

/// Deploy-build flag overrides
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ModeFlagArgs {
    /// Flag passed to deploy build (default from config: --aev)
    #[arg(long, conflicts_with = "no_mode_flag", allow_hyphen_values = true)]
    pub mode_flag: Option<String>,

    /// Pass no mode flag to deploy build
    #[arg(long)]
    pub no_mode_flag: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full deployment pipeline
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Number of agents
        #[arg(short = 'n', long = "agents", default_value = "4")]
        agents: usize,

        /// File holding the agent private key
        #[arg(long, required_unless_present = "key_env", conflicts_with = "key_env")]
        key_file: Option<PathBuf>,

        /// Environment variable holding the agent private key
        #[arg(long)]
        key_env: Option<String>,

        #[command(flatten)]
        mode: ModeFlagArgs,
    },

    /// Remove all containers and, given a service, its working directories
    Reset {
        /// Service public id; without it only containers are removed
        service: Option<String>,

        /// Agent package whose directory is removed (defaults to the service id)
        #[arg(long)]
        agent: Option<String>,

        /// Service directory name (default: <name>_service)
        #[arg(long)]
        alias: Option<String>,

        /// Working directory (overrides config and AGENTFLEET_WORKDIR)
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// Show the stages and commands a run would execute
    Plan {
        #[command(flatten)]
        target: TargetArgs,

        /// Number of agents
        #[arg(short = 'n', long = "agents", default_value = "4")]
        agents: usize,

        #[command(flatten)]
        mode: ModeFlagArgs,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command, returning the process exit code.
    ///
    /// `Err` is reserved for failures that are not a stage failure.
    pub async fn execute(self) -> Result<ExitCode> {
        match self.command {
            Commands::Run {
                target,
                agents,
                key_file,
                key_env,
                mode,
            } => {
                let key = read_key(key_file, key_env)?;
                run_deployment(target, agents, key, mode).await
            }
            Commands::Reset {
                service,
                agent,
                alias,
                workdir,
            } => reset(service, agent, alias, workdir).await,
            Commands::Plan {
                target,
                agents,
                mode,
            } => show_plan(target, agents, mode).map(|()| ExitCode::SUCCESS),
            Commands::Status { run_id } => {
                show_status(&run_id).await.map(|()| ExitCode::SUCCESS)
            }
            Commands::Runs { limit } => list_runs(limit).await.map(|()| ExitCode::SUCCESS),
            Commands::Config => show_config().map(|()| ExitCode::SUCCESS),
        }
    }
}

/// Configuration with command-line overrides applied
fn effective_config(
    workdir: Option<PathBuf>,
    mode: Option<&ModeFlagArgs>,
) -> Result<ResolvedConfig> {
    let mut cfg = config::config()?.clone();

    if let Some(workdir) = workdir {
        cfg.workdir = workdir;
    }

    if let Some(mode) = mode {
        if mode.no_mode_flag {
            cfg.deploy.mode_flag = None;
        } else if let Some(ref flag) = mode.mode_flag {
            cfg.deploy.mode_flag = Some(flag.clone()).filter(|f| !f.trim().is_empty());
        }
    }

    Ok(cfg)
}

fn parse_id(raw: &str, what: &str) -> Result<PackageId> {
    raw.parse()
        .with_context(|| format!("Invalid {} id: {}", what, raw))
}

/// Parse service and agent ids, falling back to the service for the agent
fn parse_packages(service: &str, agent: Option<&str>) -> Result<(PackageId, PackageId)> {
    let service = parse_id(service, "service")?;
    let agent = match agent {
        Some(raw) => parse_id(raw, "agent")?,
        None => service.clone(),
    };
    Ok((service, agent))
}

fn default_alias(service: &PackageId) -> String {
    format!("{}_service", service.name)
}

/// Load the key from a file or an environment variable. Never printed.
fn read_key(key_file: Option<PathBuf>, key_env: Option<String>) -> Result<KeyMaterial> {
    let raw = match (key_file, key_env) {
        (Some(path), _) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read key file: {}", path.display()))?,
        (None, Some(var)) => std::env::var(&var)
            .with_context(|| format!("Environment variable {} is not set", var))?,
        (None, None) => anyhow::bail!("No key provided. Use --key-file <path> or --key-env <VAR>"),
    };

    let key = KeyMaterial::new(raw);
    if key.is_empty() {
        anyhow::bail!("Key material is empty");
    }
    Ok(key)
}

/// Run the pipeline; a failed run maps to the failing stage index
async fn run_deployment(
    target: TargetArgs,
    agents: usize,
    key: KeyMaterial,
    mode: ModeFlagArgs,
) -> Result<ExitCode> {
    let cfg = effective_config(target.workdir.clone(), Some(&mode))?;
    let (service, agent) = parse_packages(&target.service, target.agent.as_deref())?;

    let mut request = DeploymentRequest::new(service, agents, key).with_agent(agent);
    if let Some(alias) = target.alias {
        request = request.with_service_alias(alias);
    }

    request.validate()?;

    let sequencer = Sequencer::from_config(&cfg);
    let store = EventStore::open_in(&cfg.runs_dir(), Uuid::new_v4()).await?;

    eprintln!("[Run {}]", store.run_id());
    let run = sequencer.run(&request, &store).await?;

    match &run.state {
        RunState::Stopped => {
            eprintln!("\n[Run {} deployment stopped]", run.id);
            Ok(ExitCode::SUCCESS)
        }
        RunState::Failed { stage, error } => {
            eprintln!("\n[Run {} failed at stage {}: {}]", run.id, stage, error);
            Ok(ExitCode::from(stage.index()))
        }
        other => {
            anyhow::bail!("Run {} ended in unexpected state: {}", run.id, other.label())
        }
    }
}

/// Run the reset stage on its own; a reset failure exits as stage 1
async fn reset(
    service: Option<String>,
    agent: Option<String>,
    alias: Option<String>,
    workdir: Option<PathBuf>,
) -> Result<ExitCode> {
    let cfg = effective_config(workdir, None)?;
    let sequencer = Sequencer::from_config(&cfg);

    let ctx = match service {
        Some(ref raw) => {
            let (service, agent) = parse_packages(raw, agent.as_deref())?;
            let alias = alias.unwrap_or_else(|| default_alias(&service));
            Some(DeployContext::for_packages(&cfg.workdir, &agent, &alias, &cfg.deploy))
        }
        None => None,
    };
    let dirs = ctx.as_ref().map(|c| c.owned_dirs().to_vec()).unwrap_or_default();

    let summary = match sequencer.reset(&dirs).await {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Reset failed: {}", e);
            return Ok(ExitCode::from(Stage::Reset.index()));
        }
    };

    println!("Containers removed: {}", summary.containers_removed);
    if summary.dirs_removed.is_empty() {
        println!("Directories removed: (none)");
    } else {
        println!("Directories removed:");
        for dir in &summary.dirs_removed {
            println!("  {}", dir.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Print the plan without running anything
fn show_plan(target: TargetArgs, agents: usize, mode: ModeFlagArgs) -> Result<()> {
    let cfg = effective_config(target.workdir.clone(), Some(&mode))?;
    let (service, agent) = parse_packages(&target.service, target.agent.as_deref())?;
    let alias = target.alias.unwrap_or_else(|| default_alias(&service));
    validate_layout(&agent, agents, &alias)?;

    let stages = plan::build_plan(
        &plan::PlanTarget {
            service: &service,
            agent: &agent,
            service_alias: &alias,
            agent_count: agents,
        },
        &cfg,
    );

    println!("Service: {}  Agent: {}  Agents: {}", service, agent, agents);
    println!("Workdir: {}", cfg.workdir.display());
    println!();
    for planned in stages {
        println!(
            "{:>2}. {:<20} {}",
            planned.stage.index(),
            planned.stage.name(),
            planned.stage.description()
        );
        println!("    in {}", planned.dir.display());
        for action in &planned.actions {
            println!("    $ {}", action);
        }
    }

    Ok(())
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let run = EventStore::find_run(&config::runs_dir()?, run_id).await?;

    println!("Run ID: {}", run.id);
    println!("Service: {}", run.service);
    println!("Agents: {}", run.agent_count);
    println!("State: {}", run.state.label());
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    if let Some(stage) = run.current_stage {
        println!("Current stage: {}", stage);
    }
    if let RunState::Failed { stage, ref error } = run.state {
        println!("Failed at: {}", stage);
        println!("Error: {}", error);
    }
    println!("\nStage statuses:");
    for stage in Stage::ALL {
        if let Some(status) = run.stage_statuses.get(&stage) {
            println!("  {}: {:?}", stage, status);
        }
    }

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let base_dir = config::runs_dir()?;
    let run_ids = EventStore::list_runs(&base_dir).await?;

    let mut runs = Vec::new();
    for run_id in run_ids {
        let store = EventStore::open_in(&base_dir, run_id).await?;
        if let Some(run) = store.load_run().await? {
            runs.push(run);
        }
    }
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(limit);

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!(
        "{:<38} {:<36} {:<7} {:<12} {:<20}",
        "RUN ID", "SERVICE", "AGENTS", "STATE", "STAGE"
    );
    println!("{}", "-".repeat(115));

    for run in runs {
        let stage = match run.state {
            RunState::Failed { stage, .. } => stage.to_string(),
            _ => run
                .current_stage
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
        };
        println!(
            "{:<38} {:<36} {:<7} {:<12} {:<20}",
            run.id,
            run.service,
            run.agent_count,
            run.state.label(),
            stage
        );
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("agentfleet configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (journal): {}", cfg.home.display());
    println!("  Runs:           {}", cfg.runs_dir().display());
    println!("  Workdir:        {}", cfg.workdir.display());
    println!();
    println!("Tools:");
    println!("  Packaging:         {}", cfg.tools.packaging);
    println!("  Container runtime: {}", cfg.tools.container_runtime);
    println!();
    println!("Deploy:");
    println!("  Local fetch:      {}", cfg.deploy.local_fetch);
    println!("  Chain:            {}", cfg.deploy.chain);
    println!("  Key file:         {}", cfg.deploy.key_file_name);
    println!("  Generated keys:   {}", cfg.deploy.keys_file_name);
    println!("  Build dir:        {}", cfg.deploy.build_dir);
    println!("  Participants env: {}", cfg.deploy.participants_env);
    println!(
        "  Mode flag:        {}",
        cfg.deploy.mode_flag.as_deref().unwrap_or("(none)")
    );

    Ok(())
}
