//! Packaging/registry CLI adapter.
//!
//! Drives an `autonomy`-style tool in subprocess mode. Every call runs in an
//! explicit working directory; nothing relies on the process cwd.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::process::ToolCommand;
use super::{DeploymentHandle, PackagingTool, ToolError};
use crate::domain::{PackageId, ParticipantSet};

/// Packaging tool backed by a CLI binary
pub struct PackagingCli {
    /// Path to the packaging binary (default: "autonomy")
    binary_path: String,

    /// File name generate-key writes into its working directory
    keys_file_name: String,
}

impl Default for PackagingCli {
    fn default() -> Self {
        Self::new()
    }
}

impl PackagingCli {
    pub fn new() -> Self {
        Self {
            binary_path: "autonomy".to_string(),
            keys_file_name: "keys.json".to_string(),
        }
    }

    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            ..Self::new()
        }
    }

    pub fn keys_file_name(mut self, name: impl Into<String>) -> Self {
        self.keys_file_name = name.into();
        self
    }

    fn command(&self, dir: &Path) -> ToolCommand {
        ToolCommand::new(&self.binary_path).current_dir(dir)
    }

    // Argument builders are shared with `plan`, so the preview always
    // matches what actually runs.

    pub fn lock_args() -> Vec<String> {
        vec!["packages".to_string(), "lock".to_string()]
    }

    pub fn fetch_args(id: &PackageId, local: bool, alias: Option<&str>) -> Vec<String> {
        let mut args = vec!["fetch".to_string()];
        if local {
            args.push("--local".to_string());
        }
        if let Some(alias) = alias {
            args.push("--service".to_string());
            args.push(id.to_string());
            args.push("--alias".to_string());
            args.push(alias.to_string());
        } else {
            args.push(id.to_string());
        }
        args
    }

    pub fn add_key_args(chain: &str, key_file: &Path) -> Vec<String> {
        vec![
            "add-key".to_string(),
            chain.to_string(),
            key_file.display().to_string(),
        ]
    }

    pub fn analyse_service_args(id: &PackageId) -> Vec<String> {
        vec![
            "analyse".to_string(),
            "service".to_string(),
            "--public-id".to_string(),
            id.to_string(),
        ]
    }

    pub fn push_all_args() -> Vec<String> {
        vec!["push-all".to_string()]
    }

    pub fn build_image_args() -> Vec<String> {
        vec!["build-image".to_string()]
    }

    pub fn generate_keys_args(chain: &str, count: usize) -> Vec<String> {
        vec![
            "generate-key".to_string(),
            chain.to_string(),
            "-n".to_string(),
            count.to_string(),
        ]
    }

    pub fn deploy_build_args(keys_file: &Path, mode_flag: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "deploy".to_string(),
            "build".to_string(),
            keys_file.display().to_string(),
        ];
        if let Some(flag) = mode_flag {
            args.push(flag.to_string());
        }
        args
    }

    pub fn deploy_run_args(build_dir: &Path) -> Vec<String> {
        vec![
            "deploy".to_string(),
            "run".to_string(),
            "--build-dir".to_string(),
            build_dir.display().to_string(),
        ]
    }
}

#[async_trait]
impl PackagingTool for PackagingCli {
    fn name(&self) -> &str {
        &self.binary_path
    }

    async fn lock(&self, dir: &Path) -> Result<(), ToolError> {
        self.command(dir).args(Self::lock_args()).output().await?;
        Ok(())
    }

    async fn fetch(
        &self,
        dir: &Path,
        id: &PackageId,
        local: bool,
        alias: Option<&str>,
    ) -> Result<(), ToolError> {
        self.command(dir)
            .args(Self::fetch_args(id, local, alias))
            .output()
            .await?;
        Ok(())
    }

    async fn add_key(&self, dir: &Path, chain: &str, key_file: &Path) -> Result<(), ToolError> {
        self.command(dir)
            .args(Self::add_key_args(chain, key_file))
            .output()
            .await?;
        Ok(())
    }

    async fn analyse_service(&self, dir: &Path, id: &PackageId) -> Result<(), ToolError> {
        self.command(dir)
            .args(Self::analyse_service_args(id))
            .output()
            .await?;
        Ok(())
    }

    async fn push_all(&self, dir: &Path) -> Result<(), ToolError> {
        self.command(dir).args(Self::push_all_args()).output().await?;
        Ok(())
    }

    async fn build_image(&self, dir: &Path) -> Result<(), ToolError> {
        self.command(dir).args(Self::build_image_args()).output().await?;
        Ok(())
    }

    async fn generate_keys(
        &self,
        dir: &Path,
        chain: &str,
        count: usize,
    ) -> Result<PathBuf, ToolError> {
        self.command(dir)
            .args(Self::generate_keys_args(chain, count))
            .output()
            .await?;
        Ok(dir.join(&self.keys_file_name))
    }

    async fn deploy_build(
        &self,
        dir: &Path,
        keys_file: &Path,
        mode_flag: Option<&str>,
        participants_env: &str,
        participants: &ParticipantSet,
    ) -> Result<(), ToolError> {
        self.command(dir)
            .args(Self::deploy_build_args(keys_file, mode_flag))
            .env(participants_env, participants.to_env_value())
            .output()
            .await?;
        Ok(())
    }

    async fn deploy_run(
        &self,
        dir: &Path,
        build_dir: &Path,
    ) -> Result<Box<dyn DeploymentHandle>, ToolError> {
        let process = self
            .command(dir)
            .args(Self::deploy_run_args(build_dir))
            .spawn_attached()?;
        Ok(Box::new(process))
    }
}
