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

use crate::constants::DEFAULT_BIGQUERY_ENDPOINT;
use crate::credentials::Credentials;
use reqwest::Client;

const QUOTA_PROJECT_KEY: &str = "x-goog-user-project";

/// Checks whether credentials can run queries in a project.
///
/// Implementations answer with a plain yes or no. Transport failures, HTTP
/// errors, and credentials without a token all count as a rejection.
#[async_trait::async_trait]
pub trait CredentialsValidator: std::fmt::Debug + Send + Sync {
    async fn validate(&self, credentials: &Credentials, project_id: &str) -> bool;
}

/// Validates credentials by running a trivial query with the BigQuery API.
#[derive(Clone, Debug)]
pub struct BigQueryValidator {
    client: Client,
    endpoint: String,
}

impl BigQueryValidator {
    /// `endpoint` is the root of the BigQuery API, such as
    /// `https://bigquery.googleapis.com`.
    pub fn new<S: Into<String>>(client: Client, endpoint: S) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn queries_url(&self, project_id: &str) -> String {
        format!(
            "{}/bigquery/v2/projects/{project_id}/queries",
            self.endpoint.trim_end_matches('/')
        )
    }
}

impl Default for BigQueryValidator {
    fn default() -> Self {
        Self::new(Client::new(), DEFAULT_BIGQUERY_ENDPOINT)
    }
}

#[async_trait::async_trait]
impl CredentialsValidator for BigQueryValidator {
    async fn validate(&self, credentials: &Credentials, project_id: &str) -> bool {
        let Some(token) = credentials.token() else {
            tracing::debug!("credentials without an access token cannot be validated");
            return false;
        };
        let body = serde_json::json!({
            "query": "SELECT 1",
            "useLegacySql": false,
        });
        let mut builder = self
            .client
            .post(self.queries_url(project_id))
            .header(reqwest::header::AUTHORIZATION, token.authorization())
            .json(&body);
        if let Some(quota_project_id) = credentials.quota_project_id() {
            builder = builder.header(QUOTA_PROJECT_KEY, quota_project_id);
        }
        match builder.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::debug!(
                    "credentials rejected for project {project_id} with status {status}: {body}"
                );
                false
            }
            Err(e) => {
                tracing::debug!("cannot validate credentials for project {project_id}: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialsKind;
    use crate::token::Token;
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use serde_json::json;
    use test_case::test_case;

    fn test_credentials() -> Credentials {
        Credentials::new(
            CredentialsKind::AuthorizedUser,
            Token::bearer("test-access-token", Some(3600)),
        )
    }

    #[tokio::test]
    async fn accepted() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/bigquery/v2/projects/test-project/queries"),
                request::headers(contains(("authorization", "Bearer test-access-token"))),
                request::body(json_decoded(eq(json!({
                    "query": "SELECT 1",
                    "useLegacySql": false,
                })))),
            ])
            .times(1)
            .respond_with(json_encoded(json!({"jobComplete": true}))),
        );
        let validator = BigQueryValidator::new(Client::new(), server.url_str(""));
        assert!(validator.validate(&test_credentials(), "test-project").await);
    }

    #[tokio::test]
    async fn quota_project_header() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/bigquery/v2/projects/test-project/queries"),
                request::headers(contains(("x-goog-user-project", "test-quota-project"))),
            ])
            .times(1)
            .respond_with(status_code(200)),
        );
        let validator = BigQueryValidator::new(Client::new(), server.url_str("/"));
        let credentials = test_credentials().with_quota_project_id("test-quota-project");
        assert!(validator.validate(&credentials, "test-project").await);
    }

    #[tokio::test]
    #[test_case(400)]
    #[test_case(401)]
    #[test_case(403)]
    #[test_case(404)]
    #[test_case(500)]
    async fn rejected(code: u16) {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method("POST"))
                .respond_with(status_code(code).body("access denied")),
        );
        let validator = BigQueryValidator::new(Client::new(), server.url_str(""));
        assert!(!validator.validate(&test_credentials(), "test-project").await);
    }

    #[tokio::test]
    async fn unreachable() -> anyhow::Result<()> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);
        let validator = BigQueryValidator::new(Client::new(), format!("http://{addr}"));
        assert!(!validator.validate(&test_credentials(), "test-project").await);
        Ok(())
    }

    #[tokio::test]
    async fn no_token() {
        let server = Server::run();
        let validator = BigQueryValidator::new(Client::new(), server.url_str(""));
        let credentials =
            Credentials::from_parts(CredentialsKind::AuthorizedUser, None, None, Vec::new(), None);
        assert!(!validator.validate(&credentials, "test-project").await);
    }

    #[test]
    fn default_endpoint() {
        let validator = BigQueryValidator::default();
        assert_eq!(validator.endpoint(), DEFAULT_BIGQUERY_ENDPOINT);
        assert_eq!(
            validator.queries_url("p"),
            "https://bigquery.googleapis.com/bigquery/v2/projects/p/queries"
        );
    }
}
