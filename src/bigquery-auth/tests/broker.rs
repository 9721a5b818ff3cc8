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

#[cfg(test)]
mod tests {
    use google_cloud_bigquery_auth::broker::Builder;
    use google_cloud_bigquery_auth::config::Config;
    use google_cloud_bigquery_auth::default_credentials::DefaultCredentialResolver;
    use google_cloud_bigquery_auth::errors::Error;
    use google_cloud_bigquery_auth::interactive::{ConsentPrompt, InstalledAppFlow};
    use google_cloud_bigquery_auth::store::{CredentialStore, FileStore};
    use google_cloud_bigquery_auth::token::Token;
    use google_cloud_bigquery_auth::validator::BigQueryValidator;
    use google_cloud_bigquery_auth::{
        CredentialBroker, Credentials, CredentialsKind, CredentialsSource, ResolutionRequest,
    };
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type TestResult = anyhow::Result<()>;

    /// Pastes a fixed authorization code, and counts how often it is asked.
    #[derive(Debug, Default)]
    struct PastingUser {
        prompts: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ConsentPrompt for PastingUser {
        async fn show_url(&self, _url: &str) -> Result<(), Error> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn read_code(&self) -> Result<String, Error> {
            Ok("test-auth-code\n".to_string())
        }
    }

    /// An environment without default credentials.
    #[derive(Debug)]
    struct NoAmbient;

    #[async_trait::async_trait]
    impl DefaultCredentialResolver for NoAmbient {
        async fn probe(&self, _: &[String]) -> Result<(Credentials, Option<String>), Error> {
            Err(Error::no_ambient_credentials("test-only"))
        }
    }

    /// An environment with fixed default credentials.
    #[derive(Debug)]
    struct FixedAmbient;

    #[async_trait::async_trait]
    impl DefaultCredentialResolver for FixedAmbient {
        async fn probe(&self, _: &[String]) -> Result<(Credentials, Option<String>), Error> {
            let token = Token {
                token: "ambient-token".to_string(),
                token_type: "Bearer".to_string(),
                expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
            };
            Ok((
                Credentials::new(CredentialsKind::ComputeEngine, token),
                Some("ambient-project".to_string()),
            ))
        }
    }

    fn expect_query(server: &Server, token: &'static str, times: usize) {
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/bigquery/v2/projects/proj-a/queries"),
                request::headers(contains(("authorization", matches(token)))),
            ])
            .times(times)
            .respond_with(json_encoded(json!({"jobComplete": true}))),
        );
    }

    fn expect_token(server: &Server, grant_type: &'static str, access_token: &'static str) {
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/token"),
                request::body(url_decoded(contains(("grant_type", grant_type)))),
                request::body(url_decoded(contains(("client_id", "test-client-id")))),
            ])
            .times(1)
            .respond_with(json_encoded(json!({
                "access_token": access_token,
                "refresh_token": "user-refresh-token",
                "expires_in": 3600,
                "token_type": "Bearer",
            }))),
        );
    }

    fn broker(server: &Server, cache: &Path, prompt: PastingUser) -> CredentialBroker {
        let flow = InstalledAppFlow::new(reqwest::Client::new())
            .with_client("test-client-id", "test-client-secret")
            .with_token_uri(server.url("/token").to_string())
            .with_prompt(prompt);
        Builder::from_config(Config::default().with_cache_path(cache))
            .with_validator(BigQueryValidator::new(
                reqwest::Client::new(),
                server.url_str(""),
            ))
            .with_resolver(NoAmbient)
            .with_authorizer(flow)
            .build()
    }

    #[tokio::test]
    async fn consent_then_cache() -> TestResult {
        let server = Server::run();
        expect_token(&server, "authorization_code", "user-token");
        expect_query(&server, "user-token", 2);
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("credentials.json");
        let prompts = Arc::new(AtomicUsize::new(0));

        let request = ResolutionRequest::new()
            .with_project_id("proj-a")
            .with_allow_interactive(true);

        let broker = broker(
            &server,
            &cache,
            PastingUser {
                prompts: prompts.clone(),
            },
        );
        let resolution = broker.resolve(&request).await?;
        assert_eq!(resolution.source, Some(CredentialsSource::Interactive));
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
        let record = FileStore::new(&cache).load().await.expect("record was saved");
        assert_eq!(record.refresh_token, "user-refresh-token");
        assert_eq!(record.project_id.as_deref(), Some("proj-a"));

        // A new broker, as in a new process, finds the cached credentials.
        let broker = self::broker(
            &server,
            &cache,
            PastingUser {
                prompts: prompts.clone(),
            },
        );
        let resolution = broker.resolve(&request).await?;
        assert_eq!(resolution.source, Some(CredentialsSource::Cache));
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
        let credentials = resolution.credentials.expect("cached credentials");
        assert_eq!(credentials.kind(), CredentialsKind::AuthorizedUser);
        assert_eq!(credentials.refresh_token(), Some("user-refresh-token"));
        Ok(())
    }

    #[tokio::test]
    async fn expired_cache_is_refreshed() -> TestResult {
        let server = Server::run();
        expect_token(&server, "refresh_token", "refreshed-token");
        expect_query(&server, "refreshed-token", 1);
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("credentials.json");
        std::fs::write(
            &cache,
            json!({
                "access_token": "stale-token",
                "refresh_token": "user-refresh-token",
                "client_id": "test-client-id",
                "client_secret": "test-client-secret",
                "token_uri": server.url("/token").to_string(),
                "expiry": "2020-01-01T00:00:00Z",
                "scopes": ["https://www.googleapis.com/auth/bigquery"],
            })
            .to_string(),
        )?;

        let broker = broker(&server, &cache, PastingUser::default());
        let request = ResolutionRequest::new().with_project_id("proj-a");
        let resolution = broker.resolve(&request).await?;
        assert_eq!(resolution.source, Some(CredentialsSource::Cache));
        assert_eq!(resolution.project_id.as_deref(), Some("proj-a"));

        let record = FileStore::new(&cache).load().await.expect("record was saved");
        assert_eq!(record.access_token.as_deref(), Some("refreshed-token"));
        assert!(record.expiry > Some(chrono::Utc::now()), "{record:?}");
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_cache_falls_through() -> TestResult {
        let server = Server::run();
        expect_query(&server, "ambient-token", 1);
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("credentials.json");
        std::fs::write(&cache, b"\x00\x01garbage")?;

        let broker = Builder::from_config(Config::default().with_cache_path(&cache))
            .with_validator(BigQueryValidator::new(
                reqwest::Client::new(),
                server.url_str(""),
            ))
            .with_resolver(FixedAmbient)
            .build();
        let request = ResolutionRequest::new().with_project_id("proj-a");
        let resolution = broker.resolve(&request).await?;
        assert_eq!(resolution.source, Some(CredentialsSource::Ambient));
        assert_eq!(resolution.project_id.as_deref(), Some("proj-a"));
        // Default credentials are never cached.
        assert_eq!(std::fs::read(&cache)?, b"\x00\x01garbage");
        Ok(())
    }

    #[tokio::test]
    async fn rejected_everywhere() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method("POST"))
                .times(1)
                .respond_with(status_code(403)),
        );
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("credentials.json");

        let broker = Builder::from_config(Config::default().with_cache_path(&cache))
            .with_validator(BigQueryValidator::new(
                reqwest::Client::new(),
                server.url_str(""),
            ))
            .with_resolver(FixedAmbient)
            .build();
        let request = ResolutionRequest::new().with_project_id("proj-a");
        let resolution = broker.resolve(&request).await?;
        assert!(resolution.is_none(), "{resolution:?}");
        assert!(!cache.exists());
        Ok(())
    }

    #[tokio::test]
    async fn cache_with_extreme_expiry_falls_through() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token"))
                .times(1)
                .respond_with(status_code(400)),
        );
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("credentials.json");
        std::fs::write(
            &cache,
            json!({
                "access_token": "a",
                "refresh_token": "r",
                "client_id": "c",
                "client_secret": "s",
                "token_uri": server.url("/token").to_string(),
                "expiry": "-262143-01-01T00:00:05Z",
            })
            .to_string(),
        )?;

        let broker = Builder::from_config(Config::default().with_cache_path(&cache))
            .with_resolver(FixedAmbient)
            .build();
        let resolution = broker.resolve(&ResolutionRequest::new()).await?;
        assert_eq!(resolution.source, Some(CredentialsSource::Ambient));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_with_huge_expires_in() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token"))
                .times(1)
                .respond_with(json_encoded(json!({
                    "access_token": "refreshed-token",
                    "expires_in": 1_000_000_000_000_000_i64,
                    "token_type": "Bearer",
                }))),
        );
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("credentials.json");
        std::fs::write(
            &cache,
            json!({
                "refresh_token": "user-refresh-token",
                "client_id": "test-client-id",
                "client_secret": "test-client-secret",
                "token_uri": server.url("/token").to_string(),
            })
            .to_string(),
        )?;

        let broker = Builder::from_config(Config::default().with_cache_path(&cache))
            .with_resolver(NoAmbient)
            .build();
        let resolution = broker.resolve(&ResolutionRequest::new()).await?;
        assert_eq!(resolution.source, Some(CredentialsSource::Cache));
        let credentials = resolution.credentials.expect("refreshed credentials");
        assert!(credentials.is_valid(), "{credentials:?}");
        Ok(())
    }
}
