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

use crate::Result;
use crate::credentials::{Credentials, CredentialsKind, RefreshMaterial};
use crate::errors::Error;
use crate::token::Token;
use reqwest::Client;
use std::time::Duration;

const METADATA_FLAVOR: &str = "Metadata-Flavor";
const METADATA_FLAVOR_VALUE: &str = "Google";
pub(crate) const DEFAULT_ACCOUNT: &str = "default";

/// A wrapper around a HTTP client used to talk to a Google Cloud metadata service.
#[derive(Clone, Debug)]
pub(crate) struct MetadataClient {
    client: Client,
    host: String,
}

/// The result of requesting a token from the metadata service.
#[derive(serde::Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl MetadataClient {
    /// `host` is a `host[:port]` pair, as in `GCE_METADATA_HOST`.
    pub(crate) fn new<S: Into<String>>(client: Client, host: S) -> Self {
        Self {
            client,
            host: host.into(),
        }
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, suffix: &str) -> String {
        let suffix = suffix.trim_start_matches('/');
        format!("http://{}/computeMetadata/v1/{suffix}", self.host)
    }

    /// Checks if code is executing in a Google Cloud environment.
    ///
    /// Anything other than a response carrying `Metadata-Flavor: Google`
    /// within `timeout` means there is no metadata server.
    pub(crate) async fn is_available(&self, timeout: Duration) -> bool {
        let ping = self
            .client
            .get(format!("http://{}", self.host))
            .header(METADATA_FLAVOR, METADATA_FLAVOR_VALUE)
            .timeout(timeout)
            .send();
        match ping.await {
            Ok(response) => response
                .headers()
                .get(METADATA_FLAVOR)
                .is_some_and(|v| v == METADATA_FLAVOR_VALUE),
            Err(e) => {
                tracing::debug!("metadata server at {} is not reachable: {e}", self.host);
                false
            }
        }
    }

    async fn get(&self, suffix: &str, query: &[(&str, String)]) -> Result<String> {
        let response = self
            .client
            .get(self.url(suffix))
            .header(METADATA_FLAVOR, METADATA_FLAVOR_VALUE)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::token_fetch(true, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::token_fetch_status(
                status,
                format!("metadata request for {suffix} failed with status {status}: {body}"),
            ));
        }
        response
            .text()
            .await
            .map_err(|e| Error::token_fetch(true, e))
    }

    /// The project hosting the current VM or service.
    pub(crate) async fn project_id(&self) -> Result<String> {
        let project = self.get("project/project-id", &[]).await?;
        Ok(project.trim().to_string())
    }

    /// Fetches a [Token] for `account` with the provided scopes.
    pub(crate) async fn access_token(&self, account: &str, scopes: &[String]) -> Result<Token> {
        let suffix = format!("instance/service-accounts/{account}/token");
        let query = if scopes.is_empty() {
            Vec::new()
        } else {
            vec![("scopes", scopes.join(","))]
        };
        let json = self.get(&suffix, &query).await?;
        let response = serde_json::from_str::<MetadataToken>(&json)
            .map_err(|e| Error::token_fetch(false, e))?;
        if response.access_token.is_empty() {
            return Err(Error::token_fetch(
                false,
                "incomplete token received from metadata server",
            ));
        }
        let mut token = Token::bearer(response.access_token, response.expires_in);
        if let Some(token_type) = response.token_type {
            token.token_type = token_type;
        }
        Ok(token)
    }

    /// Credentials for the default service account of the environment.
    pub(crate) async fn credentials(&self, scopes: &[String]) -> Result<Credentials> {
        let token = self.access_token(DEFAULT_ACCOUNT, scopes).await?;
        Ok(Credentials::from_parts(
            CredentialsKind::ComputeEngine,
            Some(token),
            Some(RefreshMaterial::Metadata {
                host: self.host.clone(),
                account: DEFAULT_ACCOUNT.to_string(),
            }),
            scopes.to_vec(),
            None,
        ))
    }
}
