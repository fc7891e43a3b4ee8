//! Adapter interfaces for external tools.
//!
//! The sequencer never shells out directly. It talks to two collaborators:
//! a container runtime and a packaging/registry CLI. Both are traits so the
//! stage logic can be exercised against fakes.

pub mod docker;
pub mod packaging;
pub mod process;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{PackageId, ParticipantSet};

pub use docker::DockerRuntime;
pub use packaging::PackagingCli;
pub use process::ToolCommand;

/// Failure reported by an external tool invocation
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed with exit code {}: {stderr}", describe_exit(.exit_code))]
    Failed {
        tool: String,
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` was interrupted by a signal")]
    Interrupted { tool: String, command: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl ToolError {
    /// Exit code of the failed process, if it exited normally
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ToolError::Failed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Combined diagnostic text, used to classify permission problems
    pub fn diagnostics(&self) -> String {
        match self {
            ToolError::Failed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

/// Container runtime operations used by the reset stage
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Human-readable runtime name
    fn name(&self) -> &str;

    /// Ids of all containers, running or stopped
    async fn list_all_containers(&self) -> Result<Vec<String>, ToolError>;

    /// Force-remove the given containers
    async fn force_remove(&self, ids: &[String]) -> Result<(), ToolError>;
}

/// A launched deployment.
///
/// `wait` blocks until the deployment stops on its own. Dropping an
/// unfinished `wait` leaves the deployment running; `stop` ends it.
#[async_trait]
pub trait DeploymentHandle: Send {
    /// OS process id, when there is one
    fn pid(&self) -> Option<u32>;

    async fn wait(&mut self) -> Result<(), ToolError>;

    /// Stop the deployment and reap it
    async fn stop(&mut self) -> Result<(), ToolError>;
}

/// Packaging, registry and deployment operations.
///
/// `dir` is always the working directory the tool runs in.
#[async_trait]
pub trait PackagingTool: Send + Sync {
    /// Human-readable tool name
    fn name(&self) -> &str;

    async fn lock(&self, dir: &Path) -> Result<(), ToolError>;

    /// Fetch a package, or a service when `alias` is set, into `dir`
    async fn fetch(
        &self,
        dir: &Path,
        id: &PackageId,
        local: bool,
        alias: Option<&str>,
    ) -> Result<(), ToolError>;

    async fn add_key(&self, dir: &Path, chain: &str, key_file: &Path) -> Result<(), ToolError>;

    async fn analyse_service(&self, dir: &Path, id: &PackageId) -> Result<(), ToolError>;

    async fn push_all(&self, dir: &Path) -> Result<(), ToolError>;

    async fn build_image(&self, dir: &Path) -> Result<(), ToolError>;

    /// Generate `count` keys; returns the path of the written keys file
    async fn generate_keys(
        &self,
        dir: &Path,
        chain: &str,
        count: usize,
    ) -> Result<PathBuf, ToolError>;

    /// Build the deployment; `participants` is exported under `participants_env`
    async fn deploy_build(
        &self,
        dir: &Path,
        keys_file: &Path,
        mode_flag: Option<&str>,
        participants_env: &str,
        participants: &ParticipantSet,
    ) -> Result<(), ToolError>;

    /// Launch the deployment from `build_dir`
    async fn deploy_run(
        &self,
        dir: &Path,
        build_dir: &Path,
    ) -> Result<Box<dyn DeploymentHandle>, ToolError>;
}
