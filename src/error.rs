//! Error taxonomy for deployment stages.

use std::path::PathBuf;

use thiserror::Error;

use crate::adapters::ToolError;
use crate::domain::Stage;

/// Result alias for stage execution
pub type StageResult<T> = std::result::Result<T, SequencerError>;

/// Why a stage failed.
///
/// Absent resources during cleanup are not represented here; they are
/// treated as success by the reset stage.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// The registry could not resolve a package or service id
    #[error("Could not resolve '{id}': {source}")]
    Resolution {
        id: String,
        #[source]
        source: ToolError,
    },

    /// Static analysis reported problems with the service definition
    #[error("Service '{id}' failed analysis: {source}")]
    Validation {
        id: String,
        #[source]
        source: ToolError,
    },

    /// A local file could not be read or written
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Removal was attempted and refused
    #[error("Permission denied removing {target}: {message}")]
    PermissionDenied { target: String, message: String },

    /// Any other non-zero exit from an external tool, propagated verbatim
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The generated keys file does not yield a usable participant set
    #[error("Malformed participant data in {}: {reason}", .path.display())]
    MalformedParticipants { path: PathBuf, reason: String },

    /// A tool reported success but did not leave its output behind
    #[error("Expected output is missing: {}", .path.display())]
    MissingArtifact { path: PathBuf },

    /// A stage needs something an earlier stage should have produced
    #[error("Stage precondition not met: {0}")]
    MissingContext(&'static str),
}

impl SequencerError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Exit code of the underlying tool, when a tool failed
    pub fn tool_exit_code(&self) -> Option<i32> {
        match self {
            Self::Resolution { source, .. }
            | Self::Validation { source, .. }
            | Self::Tool(source) => source.exit_code(),
            _ => None,
        }
    }
}

/// A stage failure, tagged with the stage that halted the pipeline
#[derive(Debug, Error)]
#[error("Stage {stage} failed: {source}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub source: SequencerError,
}

impl StageFailure {
    /// Process exit code for the CLI: the 1-based stage index
    pub fn exit_code(&self) -> i32 {
        i32::from(self.stage.index())
    }
}
