//! agentfleet - multi-agent service deployment sequencer
//!
//! Drives an external packaging/registry CLI and a container runtime
//! through a fixed, strictly ordered list of stages: reset, fetch,
//! provision a key, analyse, push, fetch the service, build its image,
//! generate agent keys, derive the participant set, build and run the
//! deployment.
//!
//! # Architecture
//!
//! - Stages run one at a time; the first failure halts the run
//! - Every transition is journaled as an event; `status` replays them
//! - External tools sit behind traits so stages can run against fakes
//!
//! # Modules
//!
//! - `adapters`: Container runtime and packaging CLI integrations
//! - `core`: Sequencer, deployment context, journal
//! - `domain`: Data structures (PackageId, Stage, Event, Run)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Deploy a service with four agents
//! agentfleet run valory/oracle_hardhat:0.1.0 -n 4 --key-file ./key.txt
//!
//! # Show what would run
//! agentfleet plan valory/oracle_hardhat:0.1.0
//!
//! # Check run status
//! agentfleet status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use core::{DeployContext, DeploymentRequest, EventStore, Sequencer};
pub use domain::{Event, EventType, KeyMaterial, PackageId, ParticipantSet, Run, RunState, Stage};
pub use error::{SequencerError, StageFailure};
