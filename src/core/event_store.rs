//! Append-only run journal with file-based persistence.
//!
//! Layout per run:
//! - `<runs>/<run_id>/run.json`: manifest (service, agent count, key fingerprint)
//! - `<runs>/<run_id>/events.jsonl`: newline-delimited JSON events

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Event, EventType, Run};

/// What a run was asked to do. Never contains key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub service: String,
    pub agent: String,
    pub agent_count: usize,
    pub key_fingerprint: String,
    pub workdir: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// File-based journal for one run
pub struct EventStore {
    run_id: Uuid,

    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Path to the run.json manifest
    manifest_path: PathBuf,
}

impl EventStore {
    /// Create or open the journal for a run under `base_dir`
    pub async fn open_in(base_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = base_dir.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        Ok(Self {
            run_id,
            events_path: run_dir.join("events.jsonl"),
            manifest_path: run_dir.join("run.json"),
            run_dir,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub async fn write_manifest(&self, manifest: &RunManifest) -> Result<()> {
        let json =
            serde_json::to_string_pretty(manifest).context("Failed to serialize run manifest")?;
        fs::write(&self.manifest_path, json)
            .await
            .with_context(|| format!("Failed to write manifest: {}", self.manifest_path.display()))
    }

    pub async fn read_manifest(&self) -> Result<Option<RunManifest>> {
        if !self.manifest_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.manifest_path)
            .await
            .with_context(|| format!("Failed to read manifest: {}", self.manifest_path.display()))?;

        let manifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", self.manifest_path.display()))?;

        Ok(Some(manifest))
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!("Failed to open events file: {}", self.events_path.display())
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Get the last event of a specific type
    pub async fn last_event_of_type(&self, event_type: EventType) -> Result<Option<Event>> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().find(|e| e.event_type == event_type))
    }

    /// Rebuild the run from its manifest and events
    pub async fn load_run(&self) -> Result<Option<Run>> {
        let events = self.replay().await?;
        let Some(mut run) = Run::from_events(&events) else {
            return Ok(None);
        };

        if let Some(manifest) = self.read_manifest().await? {
            run.service = manifest.service;
            run.agent_count = manifest.agent_count;
        }

        Ok(Some(run))
    }

    /// Load a past run from `base_dir`, failing if it was never journaled
    pub async fn find_run(base_dir: &Path, run_id: Uuid) -> Result<Run> {
        if !base_dir.join(run_id.to_string()).is_dir() {
            anyhow::bail!("Run {} not found", run_id);
        }

        let store = Self::open_in(base_dir, run_id).await?;
        store
            .load_run()
            .await?
            .with_context(|| format!("Run {} has no events", run_id))
    }

    /// List all run IDs in `base_dir`
    pub async fn list_runs(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}
