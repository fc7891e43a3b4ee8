//! Docker CLI adapter for container cleanup.

use async_trait::async_trait;
use tracing::debug;

use super::process::ToolCommand;
use super::{ContainerRuntime, ToolError};

/// Container runtime backed by the `docker` CLI
pub struct DockerRuntime {
    /// Path to the docker binary (default: "docker")
    binary_path: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self::with_binary_path("docker")
    }

    /// Use a custom binary (e.g. `podman`, which accepts the same arguments)
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.binary_path)
    }

    pub fn list_all_args() -> Vec<String> {
        ["ps", "-a", "-q"].map(String::from).to_vec()
    }

    pub fn force_remove_args(ids: &[String]) -> Vec<String> {
        let mut args = vec!["rm".to_string(), "-f".to_string()];
        args.extend(ids.iter().cloned());
        args
    }
}

/// Parse `ps -q` output into container ids
fn parse_container_ids(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        &self.binary_path
    }

    async fn list_all_containers(&self) -> Result<Vec<String>, ToolError> {
        let output = self.command().args(Self::list_all_args()).output().await?;
        let ids = parse_container_ids(&output.stdout);
        debug!(count = ids.len(), "Listed containers");
        Ok(ids)
    }

    async fn force_remove(&self, ids: &[String]) -> Result<(), ToolError> {
        if ids.is_empty() {
            return Ok(());
        }

        self.command()
            .args(Self::force_remove_args(ids))
            .output()
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_container_ids() {
        let ids = parse_container_ids("abc123\n\n  def456  \n");
        assert_eq!(ids, vec!["abc123".to_string(), "def456".to_string()]);
        assert!(parse_container_ids("").is_empty());
    }

    #[test]
    fn test_custom_binary_path() {
        let runtime = DockerRuntime::with_binary_path("/usr/local/bin/podman");
        assert_eq!(runtime.name(), "/usr/local/bin/podman");
        assert_eq!(DockerRuntime::new().name(), "docker");
    }

    #[test]
    fn test_force_remove_args() {
        let ids = vec!["abc".to_string(), "def".to_string()];
        assert_eq!(DockerRuntime::force_remove_args(&ids), vec!["rm", "-f", "abc", "def"]);
        assert_eq!(DockerRuntime::list_all_args(), vec!["ps", "-a", "-q"]);
    }

    #[tokio::test]
    async fn test_force_remove_nothing_is_noop() {
        // Must not even spawn the binary
        let runtime = DockerRuntime::with_binary_path("definitely-not-a-real-binary-xyz");
        assert!(runtime.force_remove(&[]).await.is_ok());
    }
}
