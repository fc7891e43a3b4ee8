//! Run state and reconstruction from journal events.
//!
//! A Run represents one execution of the deployment pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType, StageStatus};
use super::stage::Stage;

/// A deployment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Service being deployed (`namespace/name:version`)
    pub service: String,

    /// Number of agents requested
    pub agent_count: usize,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal state (if it has)
    pub completed_at: Option<DateTime<Utc>>,

    /// Last stage that was started
    pub current_stage: Option<Stage>,

    /// Status of each stage that has been touched
    pub stage_statuses: BTreeMap<Stage, StageStatus>,
}

impl Run {
    pub fn new(id: Uuid, service: String, agent_count: usize) -> Self {
        Self {
            id,
            service,
            agent_count,
            state: RunState::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            current_stage: None,
            stage_statuses: BTreeMap::new(),
        }
    }

    /// Reconstruct run state from a sequence of events.
    ///
    /// Service and agent count are not part of the event stream and come
    /// back empty; the journal stores them in the run manifest instead.
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self::new(first_event.run_id, String::new(), 0);
        run.started_at = first_event.timestamp;

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::InProgress;
                self.started_at = event.timestamp;
            }
            EventType::StageStarted => {
                if let Some(stage) = event.stage {
                    self.current_stage = Some(stage);
                    self.stage_statuses.insert(stage, StageStatus::Running);
                }
            }
            EventType::StageCompleted => {
                if let Some(stage) = event.stage {
                    self.stage_statuses.insert(stage, StageStatus::Completed);
                }
            }
            EventType::StageFailed => {
                if let Some(stage) = event.stage {
                    self.stage_statuses.insert(stage, StageStatus::Failed);
                }
            }
            EventType::DeploymentStarted => {
                self.state = RunState::Deployed;
            }
            EventType::DeploymentStopped => {
                self.state = RunState::Stopped;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    stage: event.stage.or(self.current_stage).unwrap_or(Stage::Reset),
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
        }
    }

    /// Stage that halted the run, if it failed
    pub fn failed_stage(&self) -> Option<Stage> {
        match self.state {
            RunState::Failed { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub fn is_stage_completed(&self, stage: Stage) -> bool {
        self.stage_statuses.get(&stage) == Some(&StageStatus::Completed)
    }
}

/// State of a deployment run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Stages are still executing
    InProgress,

    /// Deploy-run has started; the deployment is live
    Deployed,

    /// Deploy-run exited cleanly after being started
    Stopped,

    /// A stage failed and the pipeline halted
    Failed { stage: Stage, error: String },
}

impl RunState {
    /// Short label for tables
    pub fn label(&self) -> &'static str {
        match self {
            RunState::InProgress => "in-progress",
            RunState::Deployed => "deployed",
            RunState::Stopped => "stopped",
            RunState::Failed { .. } => "failed",
        }
    }
}
