//! Fake toolchain shared by the integration tests.
//!
//! `FakeRuntime` holds an in-memory container list. `FakeTool` records every
//! call and leaves behind the files the real CLI would create.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use agentfleet::adapters::{ContainerRuntime, DeploymentHandle, PackagingTool, ToolError};
use agentfleet::config::DeploySettings;
use agentfleet::core::{DeploymentRequest, Sequencer};
use agentfleet::domain::{KeyMaterial, PackageId, ParticipantSet};
use async_trait::async_trait;

pub const SERVICE: &str = "valory/oracle_hardhat:0.1.0";
pub const AGENT: &str = "valory/oracle:0.1.0";
pub const KEY: &str = "0x4f3edf983ac636a65a842ce7c78d9aa706d3b113bce9c46f30d7d21715b23b1d";

fn failed(tool: &str, op: &str, stderr: &str) -> ToolError {
    ToolError::Failed {
        tool: tool.to_string(),
        command: format!("{} {}", tool, op),
        exit_code: Some(1),
        stderr: stderr.to_string(),
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<Vec<String>>,
    removals: Mutex<Vec<Vec<String>>>,
    deny_removal: Mutex<bool>,
}

impl FakeRuntime {
    pub fn with_containers(ids: &[&str]) -> Self {
        let runtime = Self::default();
        runtime.start(ids.iter().map(|id| id.to_string()));
        runtime
    }

    pub fn start(&self, ids: impl IntoIterator<Item = String>) {
        self.containers.lock().unwrap().extend(ids);
    }

    pub fn containers(&self) -> Vec<String> {
        self.containers.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<Vec<String>> {
        self.removals.lock().unwrap().clone()
    }

    pub fn deny_removal(&self) {
        *self.deny_removal.lock().unwrap() = true;
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake-docker"
    }

    async fn list_all_containers(&self) -> Result<Vec<String>, ToolError> {
        Ok(self.containers())
    }

    async fn force_remove(&self, ids: &[String]) -> Result<(), ToolError> {
        if *self.deny_removal.lock().unwrap() {
            return Err(failed(
                "fake-docker",
                "rm -f",
                "Got permission denied while trying to connect to the Docker daemon socket",
            ));
        }
        self.removals.lock().unwrap().push(ids.to_vec());
        self.containers.lock().unwrap().retain(|c| !ids.contains(c));
        Ok(())
    }
}

/// One recorded packaging call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub dir: PathBuf,
    pub detail: String,
}

pub struct FakeTool {
    runtime: Arc<FakeRuntime>,
    calls: Mutex<Vec<Call>>,
    fail_on: Mutex<Option<&'static str>>,
    keys_json: Mutex<Option<String>>,
    deployment_fails: Mutex<bool>,
    deployment_blocks: Mutex<bool>,
    deployment_stopped: Arc<AtomicBool>,
    participants_env: Mutex<Option<(String, String)>>,
}

impl FakeTool {
    pub fn new(runtime: Arc<FakeRuntime>) -> Self {
        Self {
            runtime,
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            keys_json: Mutex::new(None),
            deployment_fails: Mutex::new(false),
            deployment_blocks: Mutex::new(false),
            deployment_stopped: Arc::new(AtomicBool::new(false)),
            participants_env: Mutex::new(None),
        }
    }

    /// Make the named operation exit non-zero
    pub fn fail_on(&self, op: &'static str) {
        *self.fail_on.lock().unwrap() = Some(op);
    }

    /// Write this content instead of well-formed generated keys
    pub fn keys_json(&self, content: &str) {
        *self.keys_json.lock().unwrap() = Some(content.to_string());
    }

    pub fn deployment_fails(&self) {
        *self.deployment_fails.lock().unwrap() = true;
    }

    /// Keep the deployment running until it is stopped
    pub fn deployment_blocks(&self) {
        *self.deployment_blocks.lock().unwrap() = true;
    }

    pub fn deployment_stopped(&self) -> bool {
        self.deployment_stopped.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|c| c.op).collect()
    }

    /// Env var name and value deploy-build was given
    pub fn participants_env(&self) -> Option<(String, String)> {
        self.participants_env.lock().unwrap().clone()
    }

    fn record(
        &self,
        op: &'static str,
        dir: &Path,
        detail: impl Into<String>,
    ) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push(Call {
            op,
            dir: dir.to_path_buf(),
            detail: detail.into(),
        });
        if *self.fail_on.lock().unwrap() == Some(op) {
            return Err(failed("fake-autonomy", op, &format!("{} exploded", op)));
        }
        Ok(())
    }
}

pub struct FakeDeployment {
    fails: bool,
    blocks: bool,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl DeploymentHandle for FakeDeployment {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> Result<(), ToolError> {
        if self.blocks {
            std::future::pending::<()>().await;
        }
        if self.fails {
            Err(failed("fake-autonomy", "deploy run", "tendermint node crashed"))
        } else {
            Ok(())
        }
    }

    async fn stop(&mut self) -> Result<(), ToolError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PackagingTool for FakeTool {
    fn name(&self) -> &str {
        "fake-autonomy"
    }

    async fn lock(&self, dir: &Path) -> Result<(), ToolError> {
        self.record("lock", dir, "")
    }

    async fn fetch(
        &self,
        dir: &Path,
        id: &PackageId,
        local: bool,
        alias: Option<&str>,
    ) -> Result<(), ToolError> {
        let op = if alias.is_some() { "fetch_service" } else { "fetch" };
        self.record(op, dir, format!("{} local={}", id, local))?;
        let target = dir.join(alias.unwrap_or(id.name.as_str()));
        std::fs::create_dir_all(target).unwrap();
        Ok(())
    }

    async fn add_key(&self, dir: &Path, chain: &str, key_file: &Path) -> Result<(), ToolError> {
        assert!(dir.join(key_file).is_file(), "key file must exist before add-key");
        self.record("add_key", dir, format!("{} {}", chain, key_file.display()))
    }

    async fn analyse_service(&self, dir: &Path, id: &PackageId) -> Result<(), ToolError> {
        self.record("analyse_service", dir, id.to_string())
    }

    async fn push_all(&self, dir: &Path) -> Result<(), ToolError> {
        self.record("push_all", dir, "")
    }

    async fn build_image(&self, dir: &Path) -> Result<(), ToolError> {
        self.record("build_image", dir, "")
    }

    async fn generate_keys(
        &self,
        dir: &Path,
        chain: &str,
        count: usize,
    ) -> Result<PathBuf, ToolError> {
        self.record("generate_keys", dir, format!("{} -n {}", chain, count))?;

        let content = self.keys_json.lock().unwrap().clone().unwrap_or_else(|| {
            let records: Vec<serde_json::Value> = (0..count)
                .map(|i| {
                    serde_json::json!({
                        "address": format!("0x{:040x}", i + 1),
                        "private_key": format!("0x{:064x}", i + 100),
                    })
                })
                .collect();
            serde_json::to_string_pretty(&records).unwrap()
        });

        let path = dir.join("keys.json");
        std::fs::write(&path, content).unwrap();
        Ok(path)
    }

    async fn deploy_build(
        &self,
        dir: &Path,
        keys_file: &Path,
        mode_flag: Option<&str>,
        participants_env: &str,
        participants: &ParticipantSet,
    ) -> Result<(), ToolError> {
        self.record(
            "deploy_build",
            dir,
            format!("{} {}", keys_file.display(), mode_flag.unwrap_or("")),
        )?;
        *self.participants_env.lock().unwrap() =
            Some((participants_env.to_string(), participants.to_env_value()));
        std::fs::create_dir_all(dir.join("abci_build")).unwrap();
        Ok(())
    }

    async fn deploy_run(
        &self,
        dir: &Path,
        build_dir: &Path,
    ) -> Result<Box<dyn DeploymentHandle>, ToolError> {
        self.record("deploy_run", dir, build_dir.display().to_string())?;

        let agents = self
            .participants_env()
            .and_then(|(_, value)| serde_json::from_str::<Vec<String>>(&value).ok())
            .map(|a| a.len())
            .unwrap_or(0);
        let abci = (0..agents).map(|i| format!("abci{}", i));
        let nodes = (0..agents).map(|i| format!("node{}", i));
        self.runtime.start(abci.chain(nodes));

        Ok(Box::new(FakeDeployment {
            fails: *self.deployment_fails.lock().unwrap(),
            blocks: *self.deployment_blocks.lock().unwrap(),
            stopped: self.deployment_stopped.clone(),
        }))
    }
}

/// Sequencer wired to fakes, working in `workdir`
pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub tool: Arc<FakeTool>,
    pub sequencer: Sequencer,
}

impl Harness {
    pub fn new(workdir: &Path) -> Self {
        Self::with_runtime(workdir, FakeRuntime::default())
    }

    pub fn with_runtime(workdir: &Path, runtime: FakeRuntime) -> Self {
        let runtime = Arc::new(runtime);
        let tool = Arc::new(FakeTool::new(runtime.clone()));
        let sequencer = Sequencer::new(
            runtime.clone(),
            tool.clone(),
            workdir,
            DeploySettings::default(),
        );
        Self {
            runtime,
            tool,
            sequencer,
        }
    }
}

pub fn request(agent_count: usize) -> DeploymentRequest {
    DeploymentRequest::new(SERVICE.parse().unwrap(), agent_count, KeyMaterial::new(KEY))
        .with_agent(AGENT.parse().unwrap())
}
