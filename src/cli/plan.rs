//! Dry-run rendering for `agentfleet plan`.

use std::path::{Path, PathBuf};

use crate::adapters::{DockerRuntime, PackagingCli, ToolCommand};
use crate::config::ResolvedConfig;
use crate::core::DeployContext;
use crate::domain::{PackageId, Stage};

/// What a stage would do, without doing it
#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub stage: Stage,
    /// Working directory the stage's commands run in
    pub dir: PathBuf,
    pub actions: Vec<String>,
}

/// Packages a plan is rendered for
pub struct PlanTarget<'a> {
    pub service: &'a PackageId,
    pub agent: &'a PackageId,
    pub service_alias: &'a str,
    pub agent_count: usize,
}

pub fn build_plan(target: &PlanTarget<'_>, config: &ResolvedConfig) -> Vec<PlannedStage> {
    let deploy = &config.deploy;
    let ctx = DeployContext::for_packages(
        &config.workdir,
        target.agent,
        target.service_alias,
        deploy,
    );
    let docker = |args: Vec<String>| {
        ToolCommand::new(&config.tools.container_runtime)
            .args(args)
            .display()
    };
    let tool = |args: Vec<String>| ToolCommand::new(&config.tools.packaging).args(args).display();

    let keys_file = Path::new(&deploy.keys_file_name);
    let key_file = Path::new(&deploy.key_file_name);
    let build_dir = Path::new(&deploy.build_dir);

    Stage::ALL
        .iter()
        .map(|&stage| {
            let (dir, actions) = match stage {
                Stage::Reset => (
                    &ctx.workdir,
                    vec![
                        docker(DockerRuntime::list_all_args()),
                        docker(DockerRuntime::force_remove_args(&["<ids>".to_string()])),
                        format!("remove {}", ctx.package_dir.display()),
                        format!("remove {}", ctx.service_dir.display()),
                    ],
                ),
                Stage::FetchPackage => (
                    &ctx.workdir,
                    vec![
                        tool(PackagingCli::lock_args()),
                        tool(PackagingCli::fetch_args(target.agent, deploy.local_fetch, None)),
                    ],
                ),
                Stage::ProvisionKey => (
                    &ctx.package_dir,
                    vec![
                        format!("write {} (mode 0600)", ctx.key_file.display()),
                        tool(PackagingCli::add_key_args(&deploy.chain, key_file)),
                    ],
                ),
                Stage::AnalyseService => (
                    &ctx.workdir,
                    vec![tool(PackagingCli::analyse_service_args(target.service))],
                ),
                Stage::PushAll => (&ctx.workdir, vec![tool(PackagingCli::push_all_args())]),
                Stage::FetchService => (
                    &ctx.workdir,
                    vec![tool(PackagingCli::fetch_args(
                        target.service,
                        deploy.local_fetch,
                        Some(target.service_alias),
                    ))],
                ),
                Stage::BuildImage => (&ctx.service_dir, vec![tool(PackagingCli::build_image_args())]),
                Stage::GenerateKeys => (
                    &ctx.service_dir,
                    vec![tool(PackagingCli::generate_keys_args(
                        &deploy.chain,
                        target.agent_count,
                    ))],
                ),
                Stage::DeriveParticipants => (
                    &ctx.service_dir,
                    vec![format!(
                        "read {} addresses from {}",
                        target.agent_count,
                        ctx.service_dir.join(keys_file).display()
                    )],
                ),
                Stage::DeployBuild => (
                    &ctx.service_dir,
                    vec![format!(
                        "{}={{participants}} {}",
                        deploy.participants_env,
                        tool(PackagingCli::deploy_build_args(
                            keys_file,
                            deploy.mode_flag.as_deref()
                        ))
                    )],
                ),
                Stage::DeployRun => (
                    &ctx.service_dir,
                    vec![tool(PackagingCli::deploy_run_args(build_dir))],
                ),
            };

            PlannedStage {
                stage,
                dir: dir.clone(),
                actions,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeploySettings, ToolSettings};

    fn config() -> ResolvedConfig {
        ResolvedConfig {
            home: PathBuf::from("/state"),
            workdir: PathBuf::from("/work"),
            config_file: None,
            tools: ToolSettings::default(),
            deploy: DeploySettings::default(),
        }
    }

    fn render(config: &ResolvedConfig) -> Vec<PlannedStage> {
        let service: PackageId = "valory/oracle_hardhat:0.1.0".parse().unwrap();
        let agent: PackageId = "valory/oracle:0.1.0".parse().unwrap();
        build_plan(
            &PlanTarget {
                service: &service,
                agent: &agent,
                service_alias: "oracle_service",
                agent_count: 4,
            },
            config,
        )
    }

    #[test]
    fn test_plan_covers_every_stage_in_order() {
        let plan = render(&config());
        let stages: Vec<Stage> = plan.iter().map(|p| p.stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert!(plan.iter().all(|p| !p.actions.is_empty()));
    }

    #[test]
    fn test_plan_commands() {
        let plan = render(&config());

        assert_eq!(plan[1].actions[1], "autonomy fetch --local valory/oracle:0.1.0");
        assert_eq!(plan[2].dir, PathBuf::from("/work/oracle"));
        assert_eq!(
            plan[2].actions[1],
            "autonomy add-key ethereum ethereum_private_key.txt"
        );
        assert_eq!(
            plan[5].actions[0],
            "autonomy fetch --local --service valory/oracle_hardhat:0.1.0 --alias oracle_service"
        );
        assert_eq!(plan[7].actions[0], "autonomy generate-key ethereum -n 4");
        assert_eq!(
            plan[9].actions[0],
            "ALL_PARTICIPANTS={participants} autonomy deploy build keys.json --aev"
        );
        assert_eq!(plan[10].dir, PathBuf::from("/work/oracle_service"));
        assert_eq!(plan[10].actions[0], "autonomy deploy run --build-dir abci_build");
    }

    #[test]
    fn test_plan_uses_configured_binaries() {
        let mut config = config();
        config.tools.packaging = "/opt/bin/autonomy".to_string();
        config.tools.container_runtime = "podman".to_string();
        let plan = render(&config);

        assert_eq!(plan[0].actions[0], "podman ps -a -q");
        assert_eq!(plan[0].actions[1], "podman rm -f <ids>");
        assert_eq!(plan[1].actions[0], "/opt/bin/autonomy packages lock");
        assert_eq!(
            plan[3].actions[0],
            "/opt/bin/autonomy analyse service --public-id valory/oracle_hardhat:0.1.0"
        );
        assert_eq!(plan[4].actions[0], "/opt/bin/autonomy push-all");
        assert_eq!(plan[6].actions[0], "/opt/bin/autonomy build-image");
    }

    #[test]
    fn test_plan_without_mode_flag() {
        let mut config = config();
        config.deploy.mode_flag = None;
        let plan = render(&config);
        assert_eq!(
            plan[9].actions[0],
            "ALL_PARTICIPANTS={participants} autonomy deploy build keys.json"
        );
    }
}
