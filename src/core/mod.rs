//! Core deployment logic.
//!
//! This module contains:
//! - Context: the deployment request and the per-run working state
//! - Participants: participant-set derivation from generated keys
//! - EventStore: append-only run journal
//! - Sequencer: the stage pipeline

pub mod context;
pub mod event_store;
pub mod participants;
pub mod sequencer;

pub use context::{validate_layout, DeployContext, DeploymentRequest};
pub use event_store::{EventStore, RunManifest};
pub use participants::{derive_participants, parse_participants};
pub use sequencer::{shutdown_signal, ResetSummary, Sequencer, StageOutcome};
