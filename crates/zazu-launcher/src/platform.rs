//! The external ML platform: projects, packages, long-running services and
//! remote function execution.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use zazu_types::{platform_error, ZazuResult};

/// Environment variable holding the platform API token.
pub const TOKEN_ENV: &str = "ZAZU_PLATFORM_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageHandle {
    pub id: String,
    pub name: String,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetHandle {
    pub id: String,
    /// Project that owns (and is billed for) the dataset.
    pub project_id: String,
}

/// A deployable package: the local source tree published under `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub source_dir: PathBuf,
}

/// Invocation of one function of a deployed service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub service: String,
    pub function: String,
    pub payload: serde_json::Value,
    /// Project the execution is billed to.
    pub project_id: String,
}

/// Fixed call contract of the external platform.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Select the working environment (e.g. "dev") for the current session.
    async fn set_environment(&self, environment: &str) -> ZazuResult<()>;

    /// Open a new authenticated session.
    async fn login(&self) -> ZazuResult<()>;

    /// Get the project called `name`, creating it if needed.
    async fn project(&self, name: &str) -> ZazuResult<ProjectHandle>;

    async fn push_package(
        &self,
        project: &ProjectHandle,
        package: &PackageSpec,
    ) -> ZazuResult<PackageHandle>;

    async fn deploy_service(
        &self,
        package: &PackageHandle,
        service_name: &str,
    ) -> ZazuResult<ServiceHandle>;

    /// Redeploy a running service with the latest package revision.
    async fn update_service(&self, project: &ProjectHandle, service_name: &str) -> ZazuResult<()>;

    async fn delete_service(&self, service: &ServiceHandle) -> ZazuResult<()>;

    /// Run a service function and wait for its JSON output.
    async fn execute(&self, request: &ExecutionRequest) -> ZazuResult<serde_json::Value>;

    /// Resolve a dataset reference from the run configuration.
    async fn dataset(&self, reference: &serde_json::Value) -> ZazuResult<DatasetHandle>;

    /// Fetch an artifact produced by a remote execution.
    async fn download_artifact(&self, project_id: &str, path: &str) -> ZazuResult<Vec<u8>>;

    /// Store `bytes` as a project artifact at `path` and return the reference
    /// remote services read it back with.
    async fn upload_artifact(&self, project_id: &str, path: &str, bytes: Vec<u8>)
        -> ZazuResult<String>;
}

/// Make sure a session is open in `environment`, logging in only when the
/// current session cannot select it.
pub async fn ensure_session(platform: &dyn Platform, environment: &str) -> ZazuResult<()> {
    match platform.set_environment(environment).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(error = %e, "no usable session, logging in");
            platform.login().await?;
            platform.set_environment(environment).await
        }
    }
}

// ---------------------------------------------------------------------------
// REST gateway client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session: String,
}

#[derive(Debug, Deserialize)]
struct ArtifactResponse {
    path: String,
}

/// [`Platform`] implementation speaking JSON over HTTP to the platform
/// gateway.
#[derive(Debug)]
pub struct RestPlatform {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    session: Mutex<Option<String>>,
}

impl RestPlatform {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: std::env::var(TOKEN_ENV).ok(),
            session: Mutex::new(None),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let session = self.session.lock().clone();
        match session.or_else(|| self.api_token.clone()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ZazuResult<reqwest::Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| platform_error!("request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            let url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            return Err(platform_error!("{url} returned {status}: {body}"));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> ZazuResult<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| platform_error!("unreadable response: {e}"))
    }
}

#[async_trait]
impl Platform for RestPlatform {
    async fn set_environment(&self, environment: &str) -> ZazuResult<()> {
        let request = self
            .client
            .put(self.url("session/environment"))
            .json(&serde_json::json!({ "environment": environment }));
        self.send(request).await?;
        debug!(environment, "environment selected");
        Ok(())
    }

    async fn login(&self) -> ZazuResult<()> {
        let token = self
            .api_token
            .clone()
            .ok_or_else(|| platform_error!("cannot log in: {TOKEN_ENV} is not set"))?;
        let request = self
            .client
            .post(self.url("auth/login"))
            .json(&serde_json::json!({ "token": token }));
        let response: SessionResponse = self.send_json(request).await?;
        *self.session.lock() = Some(response.session);
        info!("logged in to platform");
        Ok(())
    }

    async fn project(&self, name: &str) -> ZazuResult<ProjectHandle> {
        let request = self
            .client
            .post(self.url("projects"))
            .json(&serde_json::json!({ "name": name, "get_or_create": true }));
        self.send_json(request).await
    }

    async fn push_package(
        &self,
        project: &ProjectHandle,
        package: &PackageSpec,
    ) -> ZazuResult<PackageHandle> {
        let request = self
            .client
            .post(self.url(&format!("projects/{}/packages", project.id)))
            .json(package);
        let handle: PackageHandle = self.send_json(request).await?;
        info!(package = %handle.name, project = %project.name, "package pushed");
        Ok(handle)
    }

    async fn deploy_service(
        &self,
        package: &PackageHandle,
        service_name: &str,
    ) -> ZazuResult<ServiceHandle> {
        let request = self
            .client
            .post(self.url(&format!("packages/{}/services", package.id)))
            .json(&serde_json::json!({ "name": service_name }));
        self.send_json(request).await
    }

    async fn update_service(&self, project: &ProjectHandle, service_name: &str) -> ZazuResult<()> {
        let request = self.client.post(self.url(&format!(
            "projects/{}/services/{}/update",
            project.id, service_name
        )));
        self.send(request).await?;
        Ok(())
    }

    async fn delete_service(&self, service: &ServiceHandle) -> ZazuResult<()> {
        let request = self
            .client
            .delete(self.url(&format!("services/{}", service.id)));
        self.send(request).await?;
        Ok(())
    }

    async fn execute(&self, request: &ExecutionRequest) -> ZazuResult<serde_json::Value> {
        let http = self
            .client
            .post(self.url(&format!(
                "services/{}/functions/{}/execute",
                request.service, request.function
            )))
            .json(&serde_json::json!({
                "project_id": request.project_id,
                "input": request.payload,
            }));
        self.send_json(http).await
    }

    async fn dataset(&self, reference: &serde_json::Value) -> ZazuResult<DatasetHandle> {
        let request = self
            .client
            .post(self.url("datasets/resolve"))
            .json(reference);
        self.send_json(request).await
    }

    async fn download_artifact(&self, project_id: &str, path: &str) -> ZazuResult<Vec<u8>> {
        let request = self
            .client
            .get(self.url(&format!("projects/{project_id}/artifacts")))
            .query(&[("path", path)]);
        let bytes = self
            .send(request)
            .await?
            .bytes()
            .await
            .map_err(|e| platform_error!("artifact download failed: {e}"))?;
        Ok(bytes.to_vec())
    }

    async fn upload_artifact(
        &self,
        project_id: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> ZazuResult<String> {
        let size = bytes.len();
        let request = self
            .client
            .put(self.url(&format!("projects/{project_id}/artifacts")))
            .query(&[("path", path)])
            .body(bytes);
        let stored: ArtifactResponse = self.send_json(request).await?;
        debug!(path = %stored.path, bytes = size, "artifact uploaded");
        Ok(stored.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Session that only works after an explicit login.
    #[derive(Default)]
    struct ExpiredSession {
        logins: AtomicUsize,
    }

    #[async_trait]
    impl Platform for ExpiredSession {
        async fn set_environment(&self, _environment: &str) -> ZazuResult<()> {
            if self.logins.load(Ordering::SeqCst) == 0 {
                return Err(platform_error!("401 unauthorized"));
            }
            Ok(())
        }
        async fn login(&self) -> ZazuResult<()> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn project(&self, _name: &str) -> ZazuResult<ProjectHandle> {
            unimplemented!()
        }
        async fn push_package(
            &self,
            _project: &ProjectHandle,
            _package: &PackageSpec,
        ) -> ZazuResult<PackageHandle> {
            unimplemented!()
        }
        async fn deploy_service(
            &self,
            _package: &PackageHandle,
            _service_name: &str,
        ) -> ZazuResult<ServiceHandle> {
            unimplemented!()
        }
        async fn update_service(&self, _project: &ProjectHandle, _name: &str) -> ZazuResult<()> {
            unimplemented!()
        }
        async fn delete_service(&self, _service: &ServiceHandle) -> ZazuResult<()> {
            unimplemented!()
        }
        async fn execute(&self, _request: &ExecutionRequest) -> ZazuResult<serde_json::Value> {
            unimplemented!()
        }
        async fn dataset(&self, _reference: &serde_json::Value) -> ZazuResult<DatasetHandle> {
            unimplemented!()
        }
        async fn download_artifact(&self, _project_id: &str, _path: &str) -> ZazuResult<Vec<u8>> {
            unimplemented!()
        }
        async fn upload_artifact(
            &self,
            _project_id: &str,
            _path: &str,
            _bytes: Vec<u8>,
        ) -> ZazuResult<String> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn ensure_session_logs_in_once_when_needed() {
        let platform = ExpiredSession::default();
        ensure_session(&platform, "dev").await.unwrap();
        assert_eq!(platform.logins.load(Ordering::SeqCst), 1);

        ensure_session(&platform, "dev").await.unwrap();
        assert_eq!(platform.logins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rest_urls_are_normalized() {
        let platform = RestPlatform::new("http://gateway:8080/api/").with_token("t");
        assert_eq!(
            platform.url("/projects"),
            "http://gateway:8080/api/projects"
        );
    }

    #[tokio::test]
    async fn login_without_token_fails() {
        let platform = RestPlatform {
            client: reqwest::Client::new(),
            base_url: "http://127.0.0.1:9".into(),
            api_token: None,
            session: Mutex::new(None),
        };
        assert!(platform.login().await.is_err());
    }

    #[test]
    fn execution_request_round_trip() {
        let request = ExecutionRequest {
            service: "zazu".into(),
            function: "search".into(),
            payload: serde_json::json!({"configs": {"task": "detection"}}),
            project_id: "p-1".into(),
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: ExecutionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request, back);
    }
}
