//! Subprocess plumbing shared by the CLI-backed adapters.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{DeploymentHandle, ToolError};

/// Captured output of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A single invocation of an external binary
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Set an environment variable on this child only
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Command line as shown in logs and errors. Env values are not included.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    /// Run to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit becomes `ToolError::Failed` carrying the exit code and
    /// the tool's stderr verbatim.
    pub async fn output(&self) -> Result<CommandOutput, ToolError> {
        debug!(command = %self.display(), "Running tool command");

        let output = self
            .build()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ToolError::Spawn {
                tool: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(self.failure(output.status.code(), stderr));
        }

        Ok(CommandOutput { stdout, stderr })
    }

    /// Spawn with inherited stdio, for long-running foreground processes
    pub fn spawn_attached(&self) -> Result<AttachedProcess, ToolError> {
        debug!(command = %self.display(), "Spawning attached tool command");

        let child = self
            .build()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                tool: self.program.clone(),
                source,
            })?;

        Ok(AttachedProcess {
            command: self.clone(),
            child,
            stop_grace: DEFAULT_STOP_GRACE,
        })
    }

    fn failure(&self, exit_code: Option<i32>, stderr: String) -> ToolError {
        match exit_code {
            Some(code) => ToolError::Failed {
                tool: self.program.clone(),
                command: self.display(),
                exit_code: Some(code),
                stderr: stderr.trim().to_string(),
            },
            None => ToolError::Interrupted {
                tool: self.program.clone(),
                command: self.display(),
            },
        }
    }
}

/// How long a stopping child may take to exit before it is killed
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// A spawned process whose output goes straight to the terminal
pub struct AttachedProcess {
    command: ToolCommand,
    child: Child,
    stop_grace: Duration,
}

impl AttachedProcess {
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    fn reap_error(&self, source: std::io::Error) -> ToolError {
        ToolError::Spawn {
            tool: self.command.program.clone(),
            source,
        }
    }
}

#[async_trait]
impl DeploymentHandle for AttachedProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<(), ToolError> {
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => return Err(self.reap_error(e)),
        };

        if status.success() {
            Ok(())
        } else {
            // stderr went to the terminal, nothing captured
            Err(self.command.failure(status.code(), String::new()))
        }
    }

    async fn stop(&mut self) -> Result<(), ToolError> {
        // A terminal Ctrl+C reaches the whole process group, so the child
        // usually shuts itself down within the grace period.
        match tokio::time::timeout(self.stop_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(?status, "Deployment exited after stop request");
                Ok(())
            }
            Ok(Err(e)) => Err(self.reap_error(e)),
            Err(_) => {
                warn!(
                    pid = ?self.child.id(),
                    grace_secs = self.stop_grace.as_secs(),
                    "Deployment still running after grace period, killing"
                );
                match self.child.kill().await {
                    Ok(()) => Ok(()),
                    Err(e) => Err(self.reap_error(e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_omits_env() {
        let cmd = ToolCommand::new("autonomy")
            .args(["deploy", "build", "keys.json"])
            .arg("--aev")
            .env("ALL_PARTICIPANTS", r#"["0xA"]"#);

        assert_eq!(cmd.display(), "autonomy deploy build keys.json --aev");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_attached_wait_reports_exit_code() {
        let mut process = ToolCommand::new("sh")
            .args(["-c", "exit 4"])
            .spawn_attached()
            .unwrap();

        let err = process.wait().await.unwrap_err();
        assert_eq!(err.exit_code(), Some(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_child_after_grace() {
        let mut process = ToolCommand::new("sleep")
            .arg("30")
            .spawn_attached()
            .unwrap()
            .with_stop_grace(Duration::from_millis(100));
        assert!(process.pid().is_some());

        let started = std::time::Instant::now();
        process.stop().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        // Reaped: the OS id is gone once the child has been waited on
        assert!(process.pid().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_success() {
        let out = ToolCommand::new("sh")
            .args(["-c", "echo hello"])
            .output()
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_failure_keeps_stderr_and_code() {
        let err = ToolCommand::new("sh")
            .args(["-c", "echo 'no such package' >&2; exit 3"])
            .output()
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.diagnostics(), "no such package");
        assert!(err.to_string().contains("exit code 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_reaches_child() {
        let out = ToolCommand::new("sh")
            .args(["-c", "printf %s \"$PARTICIPANTS\""])
            .env("PARTICIPANTS", r#"["0xA","0xB"]"#)
            .output()
            .await
            .unwrap();
        assert_eq!(out.stdout, r#"["0xA","0xB"]"#);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let err = ToolCommand::new("definitely-not-a-real-binary-xyz")
            .output()
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
