//! Domain types for the deployment sequencer.
//!
//! This module contains the core data structures:
//! - Stage: The ordered pipeline stages
//! - Events: Immutable journal records of stage transitions
//! - Run: Deployment run state
//! - Package ids, key material and participant sets

pub mod events;
pub mod keys;
pub mod package;
pub mod run;
pub mod stage;

// Re-export commonly used types
pub use events::{Event, EventType, StageStatus};
pub use keys::{KeyMaterial, ParticipantSet};
pub use package::{PackageId, PackageIdError};
pub use run::{Run, RunState};
pub use stage::Stage;
