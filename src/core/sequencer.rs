//! Deployment sequencer.
//!
//! Runs the fixed stage list against the container runtime and packaging
//! tool, journaling every transition. The first failing stage halts the
//! run; nothing already done is rolled back.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{
    ContainerRuntime, DeploymentHandle, DockerRuntime, PackagingCli, PackagingTool, ToolError,
};
use crate::config::{DeploySettings, ResolvedConfig};
use crate::domain::{Event, EventType, Run, Stage};
use crate::error::{SequencerError, StageFailure, StageResult};

use super::context::{DeployContext, DeploymentRequest};
use super::event_store::{EventStore, RunManifest};
use super::participants::derive_participants;

/// What a stage left behind for the sequencer
pub enum StageOutcome {
    Done,
    /// Deploy-run is live; waiting on the handle blocks until it stops
    Launched(Box<dyn DeploymentHandle>),
}

/// Result of the reset stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetSummary {
    pub containers_removed: usize,
    pub dirs_removed: Vec<PathBuf>,
}

/// Main deployment sequencer
pub struct Sequencer {
    runtime: Arc<dyn ContainerRuntime>,
    tool: Arc<dyn PackagingTool>,
    workdir: PathBuf,
    settings: DeploySettings,
}

impl Sequencer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        tool: Arc<dyn PackagingTool>,
        workdir: impl Into<PathBuf>,
        settings: DeploySettings,
    ) -> Self {
        Self {
            runtime,
            tool,
            workdir: workdir.into(),
            settings,
        }
    }

    /// Sequencer backed by the real CLIs named in the configuration
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let runtime = DockerRuntime::with_binary_path(&config.tools.container_runtime);
        let tool = PackagingCli::with_binary_path(&config.tools.packaging)
            .keys_file_name(&config.deploy.keys_file_name);

        Self::new(
            Arc::new(runtime),
            Arc::new(tool),
            config.workdir.clone(),
            config.deploy.clone(),
        )
    }

    /// Run the whole pipeline for `request`.
    ///
    /// Returns the final run state. Stage failures are reported through
    /// `RunState::Failed`; `Err` means the request was invalid or the
    /// journal could not be written. Ctrl+C or SIGTERM while the deployment
    /// is live stops it and ends the run as stopped.
    pub async fn run(&self, request: &DeploymentRequest, store: &EventStore) -> Result<Run> {
        self.run_until(request, store, shutdown_signal()).await
    }

    /// Like [`Sequencer::run`], with `shutdown` standing in for the OS signals
    #[instrument(
        skip(self, request, store, shutdown),
        fields(service = %request.service, agents = request.agent_count, run_id = %store.run_id())
    )]
    pub async fn run_until<F>(
        &self,
        request: &DeploymentRequest,
        store: &EventStore,
        shutdown: F,
    ) -> Result<Run>
    where
        F: Future<Output = ()> + Send,
    {
        request.validate()?;

        let run_id = store.run_id();
        info!(key = %request.key.fingerprint(), "Starting deployment run");

        store
            .write_manifest(&RunManifest {
                run_id,
                service: request.service.to_string(),
                agent: request.agent.to_string(),
                agent_count: request.agent_count,
                key_fingerprint: request.key.fingerprint(),
                workdir: self.workdir.clone(),
                created_at: Utc::now(),
            })
            .await?;

        let mut run = Run::new(run_id, request.service.to_string(), request.agent_count);
        let mut ctx = DeployContext::new(&self.workdir, request, &self.settings);

        let start_event = Event::new(
            run_id,
            None,
            EventType::RunStarted,
            format!(
                "Deploying '{}' with {} agents",
                request.service, request.agent_count
            ),
        );
        store.append(&start_event).await?;
        run.apply_event(&start_event);

        for stage in Stage::ALL {
            let started = Event::new(
                run_id,
                Some(stage),
                EventType::StageStarted,
                format!("Stage {} started", stage),
            );
            store.append(&started).await?;
            run.apply_event(&started);

            info!(%stage, "Running stage");
            let stage_start = Instant::now();

            let outcome = match self.execute(stage, request, &mut ctx).await {
                Ok(outcome) => outcome,
                Err(source) => {
                    let failure = StageFailure { stage, source };
                    return self
                        .fail(store, &mut run, failure, elapsed_ms(stage_start))
                        .await;
                }
            };

            if let StageOutcome::Launched(handle) = outcome {
                return self
                    .supervise(store, &mut run, handle, stage, stage_start, shutdown)
                    .await;
            }

            let completed = Event::new(
                run_id,
                Some(stage),
                EventType::StageCompleted,
                format!("Stage {} completed", stage),
            )
            .with_duration(elapsed_ms(stage_start));
            store.append(&completed).await?;
            run.apply_event(&completed);
        }

        // Only reachable if the stage list stops launching a deployment
        warn!("Pipeline finished without launching a deployment");
        Ok(run)
    }

    /// Execute a single stage against the context
    pub async fn execute(
        &self,
        stage: Stage,
        request: &DeploymentRequest,
        ctx: &mut DeployContext,
    ) -> StageResult<StageOutcome> {
        match stage {
            Stage::Reset => {
                self.reset(&ctx.owned_dirs()).await?;
            }

            Stage::FetchPackage => {
                tokio::fs::create_dir_all(&ctx.workdir)
                    .await
                    .map_err(|e| SequencerError::io("Failed to create workdir", &ctx.workdir, e))?;

                self.tool.lock(&ctx.workdir).await?;
                self.tool
                    .fetch(&ctx.workdir, &request.agent, self.settings.local_fetch, None)
                    .await
                    .map_err(|source| SequencerError::Resolution {
                        id: request.agent.to_string(),
                        source,
                    })?;
            }

            Stage::ProvisionKey => {
                write_key_file(&ctx.key_file, request.key.expose()).await?;
                debug!(path = %ctx.key_file.display(), "Key file written");

                self.tool
                    .add_key(
                        &ctx.package_dir,
                        &self.settings.chain,
                        Path::new(&self.settings.key_file_name),
                    )
                    .await?;
            }

            Stage::AnalyseService => {
                self.tool
                    .analyse_service(&ctx.workdir, &request.service)
                    .await
                    .map_err(|source| SequencerError::Validation {
                        id: request.service.to_string(),
                        source,
                    })?;
            }

            Stage::PushAll => {
                self.tool.push_all(&ctx.workdir).await?;
            }

            Stage::FetchService => {
                self.tool
                    .fetch(
                        &ctx.workdir,
                        &request.service,
                        self.settings.local_fetch,
                        Some(&request.service_alias),
                    )
                    .await
                    .map_err(|source| SequencerError::Resolution {
                        id: request.service.to_string(),
                        source,
                    })?;
            }

            Stage::BuildImage => {
                self.tool.build_image(&ctx.service_dir).await?;
            }

            Stage::GenerateKeys => {
                let keys_file = self
                    .tool
                    .generate_keys(&ctx.service_dir, &self.settings.chain, request.agent_count)
                    .await?;

                if !keys_file.exists() {
                    return Err(SequencerError::MissingArtifact { path: keys_file });
                }
                ctx.keys_file = Some(keys_file);
            }

            Stage::DeriveParticipants => {
                let keys_file = ctx
                    .keys_file
                    .as_deref()
                    .ok_or(SequencerError::MissingContext("no generated keys file"))?;

                let participants = derive_participants(keys_file, request.agent_count).await?;
                info!(participants = participants.len(), "Participant set derived");
                debug!(addresses = ?participants.addresses(), "Participant addresses");
                ctx.participants = Some(participants);
            }

            Stage::DeployBuild => {
                let keys_file = ctx
                    .keys_file
                    .as_deref()
                    .ok_or(SequencerError::MissingContext("no generated keys file"))?;
                let participants = ctx
                    .participants
                    .as_ref()
                    .filter(|p| !p.is_empty())
                    .ok_or(SequencerError::MissingContext("participant set is empty"))?;

                let relative_keys = keys_file.strip_prefix(&ctx.service_dir).unwrap_or(keys_file);

                self.tool
                    .deploy_build(
                        &ctx.service_dir,
                        relative_keys,
                        self.settings.mode_flag.as_deref(),
                        &self.settings.participants_env,
                        participants,
                    )
                    .await?;

                let build_dir = ctx.expected_build_dir(&self.settings);
                if !build_dir.is_dir() {
                    return Err(SequencerError::MissingArtifact { path: build_dir });
                }
                ctx.build_dir = Some(build_dir);
            }

            Stage::DeployRun => {
                let build_dir = ctx
                    .build_dir
                    .as_deref()
                    .ok_or(SequencerError::MissingContext("no build directory"))?;
                let relative_build = build_dir.strip_prefix(&ctx.service_dir).unwrap_or(build_dir);

                let handle = self.tool.deploy_run(&ctx.service_dir, relative_build).await?;
                return Ok(StageOutcome::Launched(handle));
            }
        }

        Ok(StageOutcome::Done)
    }

    /// Remove all containers and the given directories.
    ///
    /// Idempotent: nothing to remove is success. Removal that the runtime or
    /// filesystem refuses is fatal.
    pub async fn reset(&self, dirs: &[&Path]) -> StageResult<ResetSummary> {
        let mut summary = ResetSummary::default();

        let ids = self
            .runtime
            .list_all_containers()
            .await
            .map_err(|e| classify_removal("containers", e))?;

        if ids.is_empty() {
            debug!("No containers to remove");
        } else {
            info!(count = ids.len(), runtime = self.runtime.name(), "Removing containers");
            self.runtime
                .force_remove(&ids)
                .await
                .map_err(|e| classify_removal("containers", e))?;
            summary.containers_removed = ids.len();
        }

        for dir in dirs {
            if remove_dir_if_present(dir).await? {
                info!(dir = %dir.display(), "Removed working directory");
                summary.dirs_removed.push(dir.to_path_buf());
            }
        }

        Ok(summary)
    }

    /// Record the live deployment, then block until it stops or `shutdown` fires
    async fn supervise<F>(
        &self,
        store: &EventStore,
        run: &mut Run,
        mut handle: Box<dyn DeploymentHandle>,
        stage: Stage,
        stage_start: Instant,
        shutdown: F,
    ) -> Result<Run>
    where
        F: Future<Output = ()> + Send,
    {
        let launched = Event::new(
            run.id,
            Some(stage),
            EventType::DeploymentStarted,
            match handle.pid() {
                Some(pid) => format!("Deployment running (pid {})", pid),
                None => "Deployment running".to_string(),
            },
        );
        store.append(&launched).await?;
        run.apply_event(&launched);
        info!(pid = ?handle.pid(), "Deployment started");

        // None when shutdown won the race
        let exited = tokio::select! {
            result = handle.wait() => Some(result),
            () = shutdown => None,
        };

        let (result, message) = match exited {
            Some(result) => (result, "Deployment stopped"),
            None => {
                info!(pid = ?handle.pid(), "Shutdown requested, stopping deployment");
                (handle.stop().await, "Deployment stopped on shutdown request")
            }
        };

        if let Err(e) = result {
            let failure = StageFailure {
                stage,
                source: SequencerError::Tool(e),
            };
            return self.fail(store, run, failure, elapsed_ms(stage_start)).await;
        }

        let completed = Event::new(
            run.id,
            Some(stage),
            EventType::StageCompleted,
            format!("Stage {} completed", stage),
        )
        .with_duration(elapsed_ms(stage_start));
        store.append(&completed).await?;
        run.apply_event(&completed);

        let stopped = Event::new(run.id, Some(stage), EventType::DeploymentStopped, message);
        store.append(&stopped).await?;
        run.apply_event(&stopped);

        info!(run_id = %run.id, "{}", message);
        Ok(run.clone())
    }

    /// Journal a stage failure and mark the run failed
    async fn fail(
        &self,
        store: &EventStore,
        run: &mut Run,
        failure: StageFailure,
        duration_ms: u64,
    ) -> Result<Run> {
        let stage = failure.stage;
        let error_msg = failure.source.to_string();
        error!(
            %stage,
            exit_code = failure.exit_code(),
            tool_exit_code = ?failure.source.tool_exit_code(),
            error = %error_msg,
            "Stage failed"
        );

        let stage_failed = Event::new(
            run.id,
            Some(stage),
            EventType::StageFailed,
            format!("Stage {} failed", stage),
        )
        .with_duration(duration_ms)
        .with_error(error_msg.clone());
        store.append(&stage_failed).await?;
        run.apply_event(&stage_failed);

        let run_failed = Event::new(
            run.id,
            Some(stage),
            EventType::RunFailed,
            format!("Run halted at stage {}", stage),
        )
        .with_error(error_msg);
        store.append(&run_failed).await?;
        run.apply_event(&run_failed);

        Ok(run.clone())
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Permission problems during cleanup get their own error kind
fn classify_removal(target: &str, error: ToolError) -> SequencerError {
    let diagnostics = error.diagnostics();
    if diagnostics.to_lowercase().contains("permission denied") {
        SequencerError::PermissionDenied {
            target: target.to_string(),
            message: diagnostics,
        }
    } else {
        SequencerError::Tool(error)
    }
}

/// Returns whether anything was removed
async fn remove_dir_if_present(dir: &Path) -> StageResult<bool> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(SequencerError::PermissionDenied {
            target: dir.display().to_string(),
            message: e.to_string(),
        }),
        Err(e) => Err(SequencerError::io("Failed to remove", dir, e)),
    }
}

/// Write the key without a trailing newline, owner-readable only on unix
async fn write_key_file(path: &Path, key: &str) -> StageResult<()> {
    tokio::fs::write(path, key)
        .await
        .map_err(|e| SequencerError::io("Failed to write key file", path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| SequencerError::io("Failed to restrict key file", path, e))?;
    }

    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_remove_dir_if_present() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("oracle");
        std::fs::create_dir_all(dir.join("nested")).unwrap();

        assert!(remove_dir_if_present(&dir).await.unwrap());
        assert!(!dir.exists());
        assert!(!remove_dir_if_present(&dir).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_key_file_has_no_trailing_newline() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ethereum_private_key.txt");

        write_key_file(&path, "0xabc").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0xabc");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_write_key_file_missing_dir_is_io_error() {
        let err = write_key_file(Path::new("/nonexistent/dir/key.txt"), "0xabc")
            .await
            .unwrap_err();
        assert!(matches!(err, SequencerError::Io { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remove_dir_in_read_only_parent_is_permission_denied() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let parent = temp.path().join("work");
        let dir = parent.join("oracle");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::set_permissions(&parent, std::fs::Permissions::from_mode(0o555)).unwrap();

        // root ignores directory modes; nothing to check there
        let writable = std::fs::write(parent.join("canary"), "").is_ok();
        let result = if writable {
            None
        } else {
            Some(remove_dir_if_present(&dir).await)
        };
        std::fs::set_permissions(&parent, std::fs::Permissions::from_mode(0o755)).unwrap();

        if let Some(result) = result {
            match result {
                Err(SequencerError::PermissionDenied { target, .. }) => {
                    assert_eq!(target, dir.display().to_string());
                }
                other => panic!("Expected permission denied, got {:?}", other),
            }
            assert!(dir.exists());
        }
    }

    #[test]
    fn test_classify_removal_permission() {
        let denied = ToolError::Failed {
            tool: "docker".to_string(),
            command: "docker rm -f abc".to_string(),
            exit_code: Some(1),
            stderr: "Got permission denied while trying to connect to the Docker daemon socket"
                .to_string(),
        };
        assert!(matches!(
            classify_removal("containers", denied),
            SequencerError::PermissionDenied { .. }
        ));

        let other = ToolError::Failed {
            tool: "docker".to_string(),
            command: "docker rm -f abc".to_string(),
            exit_code: Some(1),
            stderr: "daemon not running".to_string(),
        };
        assert!(matches!(
            classify_removal("containers", other),
            SequencerError::Tool(_)
        ));
    }
}
