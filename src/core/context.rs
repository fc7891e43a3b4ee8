//! Deployment request and the context threaded through every stage.

use std::path::{Path, PathBuf};

use crate::config::DeploySettings;
use crate::domain::{KeyMaterial, PackageId, ParticipantSet};

/// What to deploy
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    /// Service to analyse, fetch, build and deploy
    pub service: PackageId,

    /// Agent package fetched and keyed in stages 2-3
    pub agent: PackageId,

    /// Number of agents (and generated keys)
    pub agent_count: usize,

    /// Signing key for the single-agent provisioning stage
    pub key: KeyMaterial,

    /// Local directory name for the fetched service
    pub service_alias: String,
}

impl DeploymentRequest {
    /// Build a request where the agent package shares the service's id and
    /// the service is fetched into `<name>_service`.
    pub fn new(service: PackageId, agent_count: usize, key: KeyMaterial) -> Self {
        Self {
            agent: service.clone(),
            service_alias: format!("{}_service", service.name),
            service,
            agent_count,
            key,
        }
    }

    pub fn with_agent(mut self, agent: PackageId) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_service_alias(mut self, alias: impl Into<String>) -> Self {
        self.service_alias = alias.into();
        self
    }

    /// Check the request before any stage runs
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_layout(&self.agent, self.agent_count, &self.service_alias)?;
        if self.key.is_empty() {
            anyhow::bail!("Key material is empty");
        }
        Ok(())
    }
}

/// Checks that need no key material, shared by `run` and `plan`
pub fn validate_layout(
    agent: &PackageId,
    agent_count: usize,
    service_alias: &str,
) -> anyhow::Result<()> {
    if agent_count == 0 {
        anyhow::bail!("Agent count must be at least 1");
    }
    let alias = service_alias;
    if alias.is_empty() || alias == "." || alias == ".." || alias.contains(['/', '\\']) {
        anyhow::bail!("Service alias '{}' is not a plain directory name", alias);
    }
    if alias == agent.name {
        anyhow::bail!(
            "Service alias '{}' collides with the agent package directory",
            alias
        );
    }
    Ok(())
}

/// Explicit working state passed from stage to stage.
///
/// Paths are fixed when the context is created; the fields filled in by
/// later stages start out as `None`.
#[derive(Debug, Clone)]
pub struct DeployContext {
    /// Root directory all package directories live in
    pub workdir: PathBuf,

    /// Directory the agent package is fetched into
    pub package_dir: PathBuf,

    /// Directory the service is fetched into
    pub service_dir: PathBuf,

    /// Key file inside the package directory
    pub key_file: PathBuf,

    /// Keys file written by generate-key (stage 8)
    pub keys_file: Option<PathBuf>,

    /// Participant set derived in stage 9
    pub participants: Option<ParticipantSet>,

    /// Build directory produced by deploy-build (stage 10)
    pub build_dir: Option<PathBuf>,
}

impl DeployContext {
    pub fn new(workdir: &Path, request: &DeploymentRequest, settings: &DeploySettings) -> Self {
        Self::for_packages(workdir, &request.agent, &request.service_alias, settings)
    }

    /// Context from the package names alone, for callers without key material
    pub fn for_packages(
        workdir: &Path,
        agent: &PackageId,
        service_alias: &str,
        settings: &DeploySettings,
    ) -> Self {
        let package_dir = workdir.join(&agent.name);
        Self {
            workdir: workdir.to_path_buf(),
            key_file: package_dir.join(&settings.key_file_name),
            service_dir: workdir.join(service_alias),
            package_dir,
            keys_file: None,
            participants: None,
            build_dir: None,
        }
    }

    /// Directories the reset stage owns and removes
    pub fn owned_dirs(&self) -> [&Path; 2] {
        [self.package_dir.as_path(), self.service_dir.as_path()]
    }

    /// Where deploy-build puts its output
    pub fn expected_build_dir(&self, settings: &DeploySettings) -> PathBuf {
        self.service_dir.join(&settings.build_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DeploymentRequest {
        DeploymentRequest::new(
            "valory/oracle_hardhat:0.1.0".parse().unwrap(),
            4,
            KeyMaterial::new("0xkey"),
        )
    }

    #[test]
    fn test_request_defaults() {
        let req = request();
        assert_eq!(req.agent, req.service);
        assert_eq!(req.service_alias, "oracle_hardhat_service");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_request_validation() {
        let mut req = request();
        req.agent_count = 0;
        assert!(req.validate().is_err());

        let req = DeploymentRequest::new(
            "valory/oracle:0.1.0".parse().unwrap(),
            1,
            KeyMaterial::new("   "),
        );
        assert!(req.validate().is_err());

        assert!(request().with_service_alias("../escape").validate().is_err());

        let colliding = request()
            .with_agent("valory/oracle:0.1.0".parse().unwrap())
            .with_service_alias("oracle");
        assert!(colliding.validate().is_err());
    }

    #[test]
    fn test_layout_validation_needs_no_key() {
        let agent: PackageId = "valory/oracle:0.1.0".parse().unwrap();

        assert!(validate_layout(&agent, 4, "oracle_service").is_ok());
        assert!(validate_layout(&agent, 0, "oracle_service").is_err());
        assert!(validate_layout(&agent, 4, "").is_err());
        assert!(validate_layout(&agent, 4, "..").is_err());
        assert!(validate_layout(&agent, 4, "a/b").is_err());

        let err = validate_layout(&agent, 4, "oracle").unwrap_err();
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn test_context_paths() {
        let req = request()
            .with_agent("valory/oracle:0.1.0".parse().unwrap())
            .with_service_alias("oracle_service");
        let settings = DeploySettings::default();
        let ctx = DeployContext::new(Path::new("/work"), &req, &settings);

        assert_eq!(ctx.package_dir, PathBuf::from("/work/oracle"));
        assert_eq!(ctx.service_dir, PathBuf::from("/work/oracle_service"));
        assert_eq!(
            ctx.key_file,
            PathBuf::from("/work/oracle/ethereum_private_key.txt")
        );
        assert_eq!(
            ctx.expected_build_dir(&settings),
            PathBuf::from("/work/oracle_service/abci_build")
        );
        assert_eq!(
            ctx.owned_dirs(),
            [Path::new("/work/oracle"), Path::new("/work/oracle_service")]
        );
    }

    #[test]
    fn test_default_alias_does_not_collide() {
        let ctx = DeployContext::new(Path::new("/work"), &request(), &DeploySettings::default());
        assert_ne!(ctx.package_dir, ctx.service_dir);
        assert_eq!(ctx.service_dir, PathBuf::from("/work/oracle_hardhat_service"));
    }
}
