//! The fixed, ordered stage list of a deployment.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One stage of the deployment pipeline.
///
/// Variants are declared in execution order; `Ord` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Reset,
    FetchPackage,
    ProvisionKey,
    AnalyseService,
    PushAll,
    FetchService,
    BuildImage,
    GenerateKeys,
    DeriveParticipants,
    DeployBuild,
    DeployRun,
}

impl Stage {
    /// Every stage, in execution order
    pub const ALL: [Stage; 11] = [
        Stage::Reset,
        Stage::FetchPackage,
        Stage::ProvisionKey,
        Stage::AnalyseService,
        Stage::PushAll,
        Stage::FetchService,
        Stage::BuildImage,
        Stage::GenerateKeys,
        Stage::DeriveParticipants,
        Stage::DeployBuild,
        Stage::DeployRun,
    ];

    /// 1-based position in the pipeline; also the CLI exit code on failure
    pub fn index(self) -> u8 {
        self as u8 + 1
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Reset => "reset",
            Stage::FetchPackage => "fetch_package",
            Stage::ProvisionKey => "provision_key",
            Stage::AnalyseService => "analyse_service",
            Stage::PushAll => "push_all",
            Stage::FetchService => "fetch_service",
            Stage::BuildImage => "build_image",
            Stage::GenerateKeys => "generate_keys",
            Stage::DeriveParticipants => "derive_participants",
            Stage::DeployBuild => "deploy_build",
            Stage::DeployRun => "deploy_run",
        }
    }

    /// One-line summary used by `agentfleet plan`
    pub fn description(self) -> &'static str {
        match self {
            Stage::Reset => "Force-remove all containers and the local working directories",
            Stage::FetchPackage => "Lock packages and fetch the agent package",
            Stage::ProvisionKey => "Write the agent key file and register it with add-key",
            Stage::AnalyseService => "Run static analysis on the service definition",
            Stage::PushAll => "Push all local packages to the registry",
            Stage::FetchService => "Fetch the service into its aliased directory",
            Stage::BuildImage => "Build the service container image",
            Stage::GenerateKeys => "Generate one key per agent",
            Stage::DeriveParticipants => "Read generated addresses into the participant set",
            Stage::DeployBuild => "Build the deployment with the participant set",
            Stage::DeployRun => "Launch the deployment and wait for it to stop",
        }
    }

    /// Stages after this one, in order
    pub fn remaining(self) -> &'static [Stage] {
        &Self::ALL[self.index() as usize..]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index(), self.name())
    }
}
