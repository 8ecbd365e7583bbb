//! Platform-side flows: deploying and updating ZaZu's services, and driving
//! a run on the deployed `zazu` service.

use std::path::Path;
use tracing::{error, info, warn};

use zazu_launcher::{
    ensure_session, ExecutionRequest, PackageSpec, Platform, ServiceHandle, TRAINER_SERVICE,
    TRIAL_SERVICE,
};
use zazu_types::{GlobalConfig, PipelineStep, RunConfig, ZazuResult};

/// Service that runs whole pipeline steps on the platform.
pub const ZAZU_SERVICE: &str = "zazu";

/// Name under which the package is pushed.
pub const PACKAGE_NAME: &str = "zazuml";

/// Every service the package deploys, in deployment order.
pub const SERVICES: [&str; 3] = [TRIAL_SERVICE, TRAINER_SERVICE, ZAZU_SERVICE];

/// Push the package from `source_dir` to the global project and deploy all
/// services from it.
///
/// If any deployment fails, the services deployed by this call are deleted
/// again before the error is returned.
pub async fn deploy(
    platform: &dyn Platform,
    global: &GlobalConfig,
    source_dir: &Path,
) -> ZazuResult<Vec<ServiceHandle>> {
    ensure_session(platform, &global.environment).await?;
    let project = platform.project(&global.project).await?;
    let package = platform
        .push_package(
            &project,
            &PackageSpec {
                name: PACKAGE_NAME.to_string(),
                source_dir: source_dir.to_path_buf(),
            },
        )
        .await?;

    let mut deployed = Vec::with_capacity(SERVICES.len());
    for name in SERVICES {
        match platform.deploy_service(&package, name).await {
            Ok(service) => {
                info!(service = %service.name, id = %service.id, "service deployed");
                deployed.push(service);
            }
            Err(e) => {
                error!(service = name, error = %e, "deployment failed, rolling back");
                for service in deployed.iter().rev() {
                    if let Err(cleanup) = platform.delete_service(service).await {
                        warn!(service = %service.name, error = %cleanup, "could not delete service");
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(deployed)
}

/// Redeploy every service of the global project with the latest package.
pub async fn update(platform: &dyn Platform, global: &GlobalConfig) -> ZazuResult<()> {
    ensure_session(platform, &global.environment).await?;
    let project = platform.project(&global.project).await?;
    for name in SERVICES {
        platform.update_service(&project, name).await?;
        info!(service = name, project = %project.name, "service updated");
    }
    Ok(())
}

/// Execute `steps` on the deployed `zazu` service, billed to the project that
/// owns the run's dataset. Returns each step's output in order.
pub async fn execute_remote(
    platform: &dyn Platform,
    global: &GlobalConfig,
    configs: &RunConfig,
    steps: &[PipelineStep],
) -> ZazuResult<Vec<serde_json::Value>> {
    ensure_session(platform, &global.environment).await?;
    let dataset = platform.dataset(&configs.dataset).await?;
    let payload = serde_json::json!({ "configs": configs });

    let mut outputs = Vec::with_capacity(steps.len());
    for step in steps {
        let request = ExecutionRequest {
            service: ZAZU_SERVICE.to_string(),
            function: step.to_string(),
            payload: payload.clone(),
            project_id: dataset.project_id.clone(),
        };
        info!(function = %request.function, project = %request.project_id, "executing on zazu service");
        outputs.push(platform.execute(&request).await?);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use zazu_launcher::{DatasetHandle, PackageHandle, ProjectHandle};
    use zazu_types::{platform_error, ZazuError};

    /// Records every call; deployment of `fail_on` errors out.
    #[derive(Default)]
    struct RecordingPlatform {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingPlatform {
        fn log(&self, call: String) {
            self.calls.lock().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Platform for RecordingPlatform {
        async fn set_environment(&self, environment: &str) -> ZazuResult<()> {
            self.log(format!("env {environment}"));
            Ok(())
        }
        async fn login(&self) -> ZazuResult<()> {
            self.log("login".into());
            Ok(())
        }
        async fn project(&self, name: &str) -> ZazuResult<ProjectHandle> {
            self.log(format!("project {name}"));
            Ok(ProjectHandle {
                id: "p-global".into(),
                name: name.into(),
            })
        }
        async fn push_package(
            &self,
            project: &ProjectHandle,
            package: &PackageSpec,
        ) -> ZazuResult<PackageHandle> {
            self.log(format!("push {}", package.name));
            Ok(PackageHandle {
                id: "pkg".into(),
                name: package.name.clone(),
                project_id: project.id.clone(),
            })
        }
        async fn deploy_service(
            &self,
            _package: &PackageHandle,
            service_name: &str,
        ) -> ZazuResult<ServiceHandle> {
            self.log(format!("deploy {service_name}"));
            if self.fail_on == Some(service_name) {
                return Err(platform_error!("quota exceeded"));
            }
            Ok(ServiceHandle {
                id: format!("svc-{service_name}"),
                name: service_name.into(),
            })
        }
        async fn update_service(&self, project: &ProjectHandle, service_name: &str) -> ZazuResult<()> {
            self.log(format!("update {} {service_name}", project.name));
            Ok(())
        }
        async fn delete_service(&self, service: &ServiceHandle) -> ZazuResult<()> {
            self.log(format!("delete {}", service.name));
            Ok(())
        }
        async fn execute(&self, request: &ExecutionRequest) -> ZazuResult<serde_json::Value> {
            self.log(format!(
                "execute {}.{} @{} task={}",
                request.service, request.function, request.project_id, request.payload["configs"]["task"]
            ));
            Ok(serde_json::json!({ "status": "success" }))
        }
        async fn dataset(&self, reference: &serde_json::Value) -> ZazuResult<DatasetHandle> {
            self.log(format!("dataset {reference}"));
            Ok(DatasetHandle {
                id: "ds".into(),
                project_id: "p-billing".into(),
            })
        }
        async fn download_artifact(&self, _project_id: &str, _path: &str) -> ZazuResult<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn upload_artifact(
            &self,
            _project_id: &str,
            path: &str,
            _bytes: Vec<u8>,
        ) -> ZazuResult<String> {
            Ok(path.to_string())
        }
    }

    fn global() -> GlobalConfig {
        serde_json::from_str(r#"{"project": "zazu-global"}"#).unwrap()
    }

    #[tokio::test]
    async fn deploys_all_services() {
        let platform = RecordingPlatform::default();
        let services = deploy(&platform, &global(), Path::new(".")).await.unwrap();

        let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["trial", "trainer", "zazu"]);
        assert_eq!(
            platform.calls(),
            [
                "env dev",
                "project zazu-global",
                "push zazuml",
                "deploy trial",
                "deploy trainer",
                "deploy zazu"
            ]
        );
    }

    #[tokio::test]
    async fn failed_deployment_removes_only_deployed_services() {
        let platform = RecordingPlatform {
            fail_on: Some("trainer"),
            ..Default::default()
        };
        let error = deploy(&platform, &global(), Path::new(".")).await.unwrap_err();
        assert!(matches!(error, ZazuError::Platform(_)));

        let calls = platform.calls();
        assert!(calls.contains(&"delete trial".to_string()));
        assert!(!calls.contains(&"delete trainer".to_string()));
        assert!(!calls.iter().any(|c| c == "deploy zazu"));
    }

    #[tokio::test]
    async fn update_uses_project_name() {
        let platform = RecordingPlatform::default();
        update(&platform, &global()).await.unwrap();
        assert_eq!(
            &platform.calls()[2..],
            [
                "update zazu-global trial",
                "update zazu-global trainer",
                "update zazu-global zazu"
            ]
        );
    }

    #[tokio::test]
    async fn remote_steps_bill_the_dataset_project() {
        let platform = RecordingPlatform::default();
        let mut configs = RunConfig::new("detection");
        configs.dataset = serde_json::json!({"dataset_id": "ds"});

        let outputs = execute_remote(
            &platform,
            &global(),
            &configs,
            &[PipelineStep::Search, PipelineStep::Train],
        )
        .await
        .unwrap();
        assert_eq!(outputs.len(), 2);

        let calls = platform.calls();
        assert!(calls.contains(&r#"execute zazu.search @p-billing task="detection""#.to_string()));
        assert!(calls.contains(&r#"execute zazu.train @p-billing task="detection""#.to_string()));
    }
}
