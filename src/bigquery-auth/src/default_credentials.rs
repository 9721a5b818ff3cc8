// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Discovers credentials from the runtime environment.
//!
//! [ApplicationDefaultResolver] follows the [Application Default Credentials]
//! search order:
//!
//! 1. A credentials file named by `GOOGLE_APPLICATION_CREDENTIALS`.
//! 2. The file written by `gcloud auth application-default login`.
//! 3. The metadata server, when running on Google Cloud.
//!
//! [Application Default Credentials]: https://cloud.google.com/docs/authentication/application-default-credentials

use crate::Result;
use crate::constants::{
    DEFAULT_METADATA_HOST, GCE_METADATA_HOST_VAR, GCLOUD_ADC_FILENAME,
    GOOGLE_APPLICATION_CREDENTIALS_VAR, GOOGLE_CLOUD_PROJECT_VAR, METADATA_PING_TIMEOUT,
    UNIX_HOME_VAR, WINDOWS_APPDATA_VAR,
};
use crate::credentials::Credentials;
use crate::errors::{BoxError, Error};
use crate::metadata::MetadataClient;
use crate::service_account::ServiceAccountKey;
use crate::user_account::AuthorizedUser;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Finds credentials the environment provides without user interaction.
#[async_trait::async_trait]
pub trait DefaultCredentialResolver: std::fmt::Debug + Send + Sync {
    /// Returns credentials holding a token, and the project associated with
    /// the environment, if any.
    ///
    /// Fails with [Error::is_no_ambient_credentials] when nothing usable is
    /// found.
    async fn probe(&self, scopes: &[String]) -> Result<(Credentials, Option<String>)>;
}

/// A [DefaultCredentialResolver] implementing Application Default
/// Credentials.
#[derive(Clone, Debug)]
pub struct ApplicationDefaultResolver {
    client: Client,
    metadata_host: String,
    well_known_path: Option<PathBuf>,
    ping_timeout: Duration,
}

impl ApplicationDefaultResolver {
    /// Creates a resolver using `GCE_METADATA_HOST` and the gcloud
    /// configuration directory of the current user.
    pub fn new(client: Client) -> Self {
        let metadata_host = std::env::var(GCE_METADATA_HOST_VAR)
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        Self {
            client,
            metadata_host,
            well_known_path: adc_well_known_path(),
            ping_timeout: METADATA_PING_TIMEOUT,
        }
    }

    /// Overrides the `host[:port]` of the metadata server.
    pub fn with_metadata_host<S: Into<String>>(mut self, host: S) -> Self {
        self.metadata_host = host.into();
        self
    }

    /// Overrides the location of the gcloud credentials file.
    pub fn with_well_known_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.well_known_path = Some(path.into());
        self
    }

    /// How long to wait for the metadata server to answer.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    async fn from_file(
        &self,
        path: &Path,
        scopes: &[String],
    ) -> std::result::Result<(Credentials, Option<String>), BoxError> {
        let contents = tokio::fs::read(path)
            .await
            .map_err(|e| format!("cannot read credentials file {}: {e}", path.display()))?;
        self.from_contents(&contents, scopes).await.map_err(|e| {
            BoxError::from(format!(
                "cannot use credentials file {}: {e}",
                path.display()
            ))
        })
    }

    async fn from_contents(
        &self,
        contents: &[u8],
        scopes: &[String],
    ) -> std::result::Result<(Credentials, Option<String>), BoxError> {
        let json = serde_json::from_slice::<serde_json::Value>(contents)?;
        match json.get("type").and_then(serde_json::Value::as_str) {
            Some("service_account") => {
                let key = ServiceAccountKey::from_slice(contents)?;
                let project_id = key.project_id.clone();
                let token = key.mint_token(&self.client, scopes).await?;
                Ok((key.into_credentials(token, scopes), project_id))
            }
            Some("authorized_user") => {
                let user = serde_json::from_value::<AuthorizedUser>(json)?;
                let project_id = user.quota_project_id.clone();
                let mut credentials = user.into_credentials(scopes);
                credentials.refresh(&self.client).await?;
                Ok((credentials, project_id))
            }
            Some(t) => Err(format!("unsupported credentials type `{t}`").into()),
            None => Err("missing `type` field".into()),
        }
    }

    async fn from_metadata(
        &self,
        scopes: &[String],
    ) -> Result<Option<(Credentials, Option<String>)>> {
        let metadata = MetadataClient::new(self.client.clone(), self.metadata_host.as_str());
        if !metadata.is_available(self.ping_timeout).await {
            return Ok(None);
        }
        tracing::debug!("using metadata server at {}", metadata.host());
        let credentials = metadata
            .credentials(scopes)
            .await
            .map_err(Error::no_ambient_credentials)?;
        let project_id = match metadata.project_id().await {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::debug!("cannot get project id from the metadata server: {e}");
                None
            }
        };
        Ok(Some((credentials, project_id)))
    }
}

#[async_trait::async_trait]
impl DefaultCredentialResolver for ApplicationDefaultResolver {
    async fn probe(&self, scopes: &[String]) -> Result<(Credentials, Option<String>)> {
        let env_project = std::env::var(GOOGLE_CLOUD_PROJECT_VAR)
            .ok()
            .filter(|p| !p.is_empty());

        // 1: Known environment variable. A broken file stops the search.
        if let Some(path) =
            std::env::var_os(GOOGLE_APPLICATION_CREDENTIALS_VAR).filter(|p| !p.is_empty())
        {
            let path = PathBuf::from(path);
            tracing::debug!("loading credentials from {}", path.display());
            let (credentials, project_id) = self
                .from_file(&path, scopes)
                .await
                .map_err(Error::no_ambient_credentials)?;
            return Ok((credentials, env_project.or(project_id)));
        }

        // 2: Well-known file.
        if let Some(path) = self.well_known_path.as_deref().filter(|p| p.exists()) {
            tracing::debug!("loading credentials from {}", path.display());
            let (credentials, project_id) = self
                .from_file(path, scopes)
                .await
                .map_err(Error::no_ambient_credentials)?;
            return Ok((credentials, env_project.or(project_id)));
        }

        // 3: Running on Google Cloud.
        if let Some((credentials, project_id)) = self.from_metadata(scopes).await? {
            return Ok((credentials, env_project.or(project_id)));
        }

        Err(Error::no_ambient_credentials(
            "no credentials file found and the metadata server is not available",
        ))
    }
}

/// The file written by `gcloud auth application-default login`.
pub(crate) fn adc_well_known_path() -> Option<PathBuf> {
    let mut path = if cfg!(windows) {
        PathBuf::from(std::env::var_os(WINDOWS_APPDATA_VAR)?)
    } else {
        let mut path = PathBuf::from(std::env::var_os(UNIX_HOME_VAR)?);
        path.push(".config");
        path
    };
    path.push("gcloud");
    path.push(GCLOUD_ADC_FILENAME);
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialsKind;
    use crate::metadata::tests::{expect_ping, host};
    use crate::service_account::tests::test_key_json;
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use scoped_env::ScopedEnv;
    use serde_json::json;
    use serial_test::serial;

    type TestResult = anyhow::Result<()>;

    fn scopes() -> Vec<String> {
        vec!["https://www.googleapis.com/auth/bigquery".to_string()]
    }

    fn unreachable_host() -> anyhow::Result<String> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);
        Ok(addr.to_string())
    }

    fn expect_token(server: &Server, path: &'static str) {
        server.expect(
            Expectation::matching(request::method_path("POST", path))
                .times(1)
                .respond_with(json_encoded(json!({
                    "access_token": "test-access-token",
                    "expires_in": 3600,
                    "token_type": "Bearer",
                }))),
        );
    }

    fn resolver(tmp: &Path, metadata_host: String) -> ApplicationDefaultResolver {
        ApplicationDefaultResolver::new(Client::new())
            .with_metadata_host(metadata_host)
            .with_well_known_path(tmp.join("missing.json"))
            .with_ping_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    #[serial]
    async fn env_var_service_account() -> TestResult {
        let server = Server::run();
        expect_token(&server, "/token");
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sa.json");
        std::fs::write(
            &path,
            test_key_json(Some(server.url("/token").to_string())).to_string(),
        )?;
        let _e1 = ScopedEnv::set(GOOGLE_APPLICATION_CREDENTIALS_VAR, path.to_str().unwrap());
        let _e2 = ScopedEnv::remove(GOOGLE_CLOUD_PROJECT_VAR);

        let (credentials, project_id) = resolver(dir.path(), unreachable_host()?)
            .probe(&scopes())
            .await?;
        assert_eq!(credentials.kind(), CredentialsKind::ServiceAccount);
        assert!(credentials.is_valid(), "{credentials:?}");
        assert_eq!(project_id.as_deref(), Some("test-project-id"));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn env_var_project_overrides_file() -> TestResult {
        let server = Server::run();
        expect_token(&server, "/token");
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sa.json");
        std::fs::write(
            &path,
            test_key_json(Some(server.url("/token").to_string())).to_string(),
        )?;
        let _e1 = ScopedEnv::set(GOOGLE_APPLICATION_CREDENTIALS_VAR, path.to_str().unwrap());
        let _e2 = ScopedEnv::set(GOOGLE_CLOUD_PROJECT_VAR, "env-project");

        let (_, project_id) = resolver(dir.path(), unreachable_host()?)
            .probe(&scopes())
            .await?;
        assert_eq!(project_id.as_deref(), Some("env-project"));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn env_var_broken_stops_search() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "not json")?;
        // A valid well-known file must not be used.
        let well_known = dir.path().join("adc.json");
        std::fs::write(
            &well_known,
            json!({
                "type": "authorized_user",
                "client_id": "test-client-id",
                "client_secret": "test-client-secret",
                "refresh_token": "test-refresh-token",
            })
            .to_string(),
        )?;
        let _e1 = ScopedEnv::set(GOOGLE_APPLICATION_CREDENTIALS_VAR, path.to_str().unwrap());

        let e = resolver(dir.path(), unreachable_host()?)
            .with_well_known_path(well_known)
            .probe(&scopes())
            .await
            .unwrap_err();
        assert!(e.is_no_ambient_credentials(), "{e:?}");
        assert!(e.to_string().contains("broken.json"), "{e}");
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn env_var_missing_file() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("does-not-exist.json");
        let _e1 = ScopedEnv::set(GOOGLE_APPLICATION_CREDENTIALS_VAR, path.to_str().unwrap());
        let e = resolver(dir.path(), unreachable_host()?)
            .probe(&scopes())
            .await
            .unwrap_err();
        assert!(e.is_no_ambient_credentials(), "{e:?}");
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn env_var_unsupported_type() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("external.json");
        std::fs::write(&path, json!({"type": "external_account"}).to_string())?;
        let _e1 = ScopedEnv::set(GOOGLE_APPLICATION_CREDENTIALS_VAR, path.to_str().unwrap());
        let e = resolver(dir.path(), unreachable_host()?)
            .probe(&scopes())
            .await
            .unwrap_err();
        assert!(e.is_no_ambient_credentials(), "{e:?}");
        assert!(e.to_string().contains("external_account"), "{e}");
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn well_known_authorized_user() -> TestResult {
        let server = Server::run();
        expect_token(&server, "/token");
        let dir = tempfile::tempdir()?;
        let well_known = dir.path().join("adc.json");
        std::fs::write(
            &well_known,
            json!({
                "type": "authorized_user",
                "client_id": "test-client-id",
                "client_secret": "test-client-secret",
                "refresh_token": "test-refresh-token",
                "token_uri": server.url("/token").to_string(),
                "quota_project_id": "test-quota-project",
            })
            .to_string(),
        )?;
        let _e1 = ScopedEnv::remove(GOOGLE_APPLICATION_CREDENTIALS_VAR);
        let _e2 = ScopedEnv::remove(GOOGLE_CLOUD_PROJECT_VAR);

        let (credentials, project_id) = resolver(dir.path(), unreachable_host()?)
            .with_well_known_path(well_known)
            .probe(&scopes())
            .await?;
        assert_eq!(credentials.kind(), CredentialsKind::AuthorizedUser);
        assert!(credentials.is_valid(), "{credentials:?}");
        assert_eq!(credentials.refresh_token(), Some("test-refresh-token"));
        assert_eq!(project_id.as_deref(), Some("test-quota-project"));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn metadata_server() -> TestResult {
        let server = Server::run();
        expect_ping(&server);
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/computeMetadata/v1/instance/service-accounts/default/token",
            ))
            .respond_with(json_encoded(json!({
                "access_token": "test-access-token",
                "expires_in": 3600,
            }))),
        );
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/computeMetadata/v1/project/project-id",
            ))
            .respond_with(status_code(200).body("metadata-project")),
        );
        let dir = tempfile::tempdir()?;
        let _e1 = ScopedEnv::remove(GOOGLE_APPLICATION_CREDENTIALS_VAR);
        let _e2 = ScopedEnv::remove(GOOGLE_CLOUD_PROJECT_VAR);

        let (credentials, project_id) = resolver(dir.path(), host(&server))
            .probe(&scopes())
            .await?;
        assert_eq!(credentials.kind(), CredentialsKind::ComputeEngine);
        assert!(credentials.is_valid(), "{credentials:?}");
        assert_eq!(project_id.as_deref(), Some("metadata-project"));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn metadata_server_without_project() -> TestResult {
        let server = Server::run();
        expect_ping(&server);
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/computeMetadata/v1/instance/service-accounts/default/token",
            ))
            .respond_with(json_encoded(json!({"access_token": "test-access-token"}))),
        );
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/computeMetadata/v1/project/project-id",
            ))
            .respond_with(status_code(404)),
        );
        let dir = tempfile::tempdir()?;
        let _e1 = ScopedEnv::remove(GOOGLE_APPLICATION_CREDENTIALS_VAR);
        let _e2 = ScopedEnv::remove(GOOGLE_CLOUD_PROJECT_VAR);

        let (_, project_id) = resolver(dir.path(), host(&server))
            .probe(&scopes())
            .await?;
        assert_eq!(project_id, None);
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn nothing_available() -> TestResult {
        let dir = tempfile::tempdir()?;
        let _e1 = ScopedEnv::remove(GOOGLE_APPLICATION_CREDENTIALS_VAR);
        let e = resolver(dir.path(), unreachable_host()?)
            .probe(&scopes())
            .await
            .unwrap_err();
        assert!(e.is_no_ambient_credentials(), "{e:?}");
        Ok(())
    }

    #[test]
    #[serial]
    fn metadata_host_from_env() {
        let _e = ScopedEnv::set(GCE_METADATA_HOST_VAR, "metadata.test-only:8080");
        let resolver = ApplicationDefaultResolver::new(Client::new());
        assert_eq!(resolver.metadata_host, "metadata.test-only:8080");

        let _e = ScopedEnv::remove(GCE_METADATA_HOST_VAR);
        let resolver = ApplicationDefaultResolver::new(Client::new());
        assert_eq!(resolver.metadata_host, DEFAULT_METADATA_HOST);
    }

    #[cfg(not(windows))]
    #[test]
    #[serial]
    fn well_known_path() {
        let _e = ScopedEnv::set(UNIX_HOME_VAR, "/home/test-only");
        assert_eq!(
            adc_well_known_path(),
            Some(PathBuf::from(
                "/home/test-only/.config/gcloud/application_default_credentials.json"
            ))
        );
    }
}
