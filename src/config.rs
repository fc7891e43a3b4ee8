//! Configuration for agentfleet.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (AGENTFLEET_HOME, AGENTFLEET_WORKDIR)
//! 2. Config file (.agentfleet/config.yaml)
//! 3. Defaults (~/.agentfleet, current directory)
//!
//! Config file discovery:
//! - Searches current directory and parents for .agentfleet/config.yaml
//! - `paths.home` is relative to the .agentfleet/ directory
//! - `paths.workdir` is relative to the project root (parent of .agentfleet/)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const ENV_HOME: &str = "AGENTFLEET_HOME";
pub const ENV_WORKDIR: &str = "AGENTFLEET_WORKDIR";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tools: Option<ToolsConfig>,
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
    #[serde(default)]
    pub keys: Option<KeysConfig>,
    #[serde(default)]
    pub deploy: Option<DeployConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Journal directory (relative to .agentfleet/)
    pub home: Option<String>,
    /// Working directory packages are fetched into (relative to project root)
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    pub packaging: Option<String>,
    pub container_runtime: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Fetch from the local registry instead of the remote one
    pub local: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeysConfig {
    pub chain: Option<String>,
    pub key_file: Option<String>,
    pub generated_keys_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    pub build_dir: Option<String>,
    pub participants_env: Option<String>,
    /// Extra deploy-build flag; an empty string disables it
    pub mode_flag: Option<String>,
}

/// Binaries for the external collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSettings {
    pub packaging: String,
    pub container_runtime: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            packaging: "autonomy".to_string(),
            container_runtime: "docker".to_string(),
        }
    }
}

/// Knobs the sequencer reads while running stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySettings {
    /// Pass `--local` to fetch
    pub local_fetch: bool,
    /// Chain identity for add-key and generate-key
    pub chain: String,
    /// File the single agent key is written to, inside the package dir
    pub key_file_name: String,
    /// File generate-key writes, inside the service dir
    pub keys_file_name: String,
    /// Deploy-build output, relative to the service dir
    pub build_dir: String,
    /// Environment variable carrying the participant set to deploy-build
    pub participants_env: String,
    /// Log/transaction-management flag passed to deploy-build
    pub mode_flag: Option<String>,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            local_fetch: true,
            chain: "ethereum".to_string(),
            key_file_name: "ethereum_private_key.txt".to_string(),
            keys_file_name: "keys.json".to_string(),
            build_dir: "abci_build".to_string(),
            participants_env: "ALL_PARTICIPANTS".to_string(),
            mode_flag: Some("--aev".to_string()),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Journal root (runs are stored under `home/runs`)
    pub home: PathBuf,
    /// Directory package and service directories are created in
    pub workdir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub tools: ToolSettings,
    pub deploy: DeploySettings,
}

impl ResolvedConfig {
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".agentfleet").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn deploy_settings(config: &ConfigFile) -> DeploySettings {
    let defaults = DeploySettings::default();
    let keys = config.keys.as_ref();
    let deploy = config.deploy.as_ref();

    DeploySettings {
        local_fetch: config
            .registry
            .as_ref()
            .and_then(|r| r.local)
            .unwrap_or(defaults.local_fetch),
        chain: non_empty(keys.and_then(|k| k.chain.clone())).unwrap_or(defaults.chain),
        key_file_name: non_empty(keys.and_then(|k| k.key_file.clone()))
            .unwrap_or(defaults.key_file_name),
        keys_file_name: non_empty(keys.and_then(|k| k.generated_keys_file.clone()))
            .unwrap_or(defaults.keys_file_name),
        build_dir: non_empty(deploy.and_then(|d| d.build_dir.clone()))
            .unwrap_or(defaults.build_dir),
        participants_env: non_empty(deploy.and_then(|d| d.participants_env.clone()))
            .unwrap_or(defaults.participants_env),
        mode_flag: match deploy.and_then(|d| d.mode_flag.clone()) {
            Some(flag) => non_empty(Some(flag)),
            None => defaults.mode_flag,
        },
    }
}

fn tool_settings(config: &ConfigFile) -> ToolSettings {
    let defaults = ToolSettings::default();
    let tools = config.tools.as_ref();

    ToolSettings {
        packaging: non_empty(tools.and_then(|t| t.packaging.clone()))
            .unwrap_or(defaults.packaging),
        container_runtime: non_empty(tools.and_then(|t| t.container_runtime.clone()))
            .unwrap_or(defaults.container_runtime),
    }
}

/// Resolve configuration from an optional config file and an env lookup
fn resolve_config(
    config_file: Option<PathBuf>,
    cwd: &Path,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".agentfleet");

    let (home, workdir, tools, deploy) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        let fleet_dir = config_path.parent().unwrap_or(Path::new("."));
        let project_root = fleet_dir.parent().unwrap_or(Path::new("."));

        let home = if let Some(env_home) = env(ENV_HOME) {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            resolve_path(fleet_dir, home_path)
        } else {
            default_home
        };

        let workdir = if let Some(env_workdir) = env(ENV_WORKDIR) {
            PathBuf::from(env_workdir)
        } else if let Some(ref workdir_path) = config.paths.workdir {
            resolve_path(project_root, workdir_path)
        } else {
            project_root.to_path_buf()
        };

        (home, workdir, tool_settings(&config), deploy_settings(&config))
    } else {
        let home = env(ENV_HOME)
            .map(PathBuf::from)
            .unwrap_or(default_home);
        let workdir = env(ENV_WORKDIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| cwd.to_path_buf());

        (home, workdir, ToolSettings::default(), DeploySettings::default())
    };

    Ok(ResolvedConfig {
        home,
        workdir,
        config_file,
        tools,
        deploy,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let config_file = find_config_file(&cwd);
    resolve_config(config_file, &cwd, &|key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the runs directory ($AGENTFLEET_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.runs_dir())
}
