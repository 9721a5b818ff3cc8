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

//! [User Account] credentials, refreshed with an OAuth 2.0 refresh token.
//!
//! Refresh tokens are obtained either through the consent flow in
//! [crate::interactive] or from an `authorized_user` file created by
//! `gcloud auth application-default login`.
//!
//! [User Account]: https://cloud.google.com/docs/authentication#user-accounts

use crate::Result;
use crate::constants::OAUTH2_TOKEN_ENDPOINT;
use crate::credentials::{Credentials, CredentialsKind, RefreshMaterial};
use crate::errors::Error;
use crate::token::Token;
use reqwest::Client;

/// The material needed to exchange a refresh token for an access token.
#[derive(Clone, PartialEq)]
pub(crate) struct UserRefresh {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) refresh_token: String,
    pub(crate) token_uri: String,
}

impl std::fmt::Debug for UserRefresh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRefresh")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[censored]")
            .field("refresh_token", &"[censored]")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl UserRefresh {
    /// Fetches a new access token.
    ///
    /// The token endpoint may rotate the refresh token, in which case
    /// `self.refresh_token` is updated.
    pub(crate) async fn refresh(&mut self, client: &Client, scopes: &[String]) -> Result<Token> {
        let scopes = (!scopes.is_empty()).then(|| scopes.join(" "));
        let req = Oauth2RefreshRequest {
            grant_type: RefreshGrantType::RefreshToken,
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            refresh_token: &self.refresh_token,
            scope: scopes.as_deref(),
        };
        let response = post_token_request(client, &self.token_uri, &req).await?;
        if let Some(rotated) = response.refresh_token.clone() {
            self.refresh_token = rotated;
        }
        Ok(response.into_token())
    }
}

/// Sends a form-encoded request to an OAuth2 token endpoint.
pub(crate) async fn post_token_request<T: serde::Serialize + ?Sized>(
    client: &Client,
    endpoint: &str,
    form: &T,
) -> Result<Oauth2TokenResponse> {
    let resp = client
        .post(endpoint)
        .form(form)
        .send()
        .await
        .map_err(|e| Error::token_fetch(true, e))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::token_fetch_status(status, e))?;
        return Err(Error::token_fetch_status(
            status,
            format!("failed to fetch token from {endpoint}: {body}"),
        ));
    }
    resp.json::<Oauth2TokenResponse>().await.map_err(|e| {
        let retryable = !e.is_decode();
        Error::token_fetch(retryable, e)
    })
}

/// The contents of an `authorized_user` credentials file.
///
/// See: https://cloud.google.com/docs/authentication#user-accounts
#[derive(Debug, PartialEq, serde::Deserialize)]
pub(crate) struct AuthorizedUser {
    #[serde(rename = "type")]
    cred_type: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    pub(crate) quota_project_id: Option<String>,
}

impl AuthorizedUser {
    /// Builds credentials that need a refresh before their first use.
    pub(crate) fn into_credentials(self, scopes: &[String]) -> Credentials {
        let refresh = UserRefresh {
            client_id: self.client_id,
            client_secret: self.client_secret,
            refresh_token: self.refresh_token,
            token_uri: self
                .token_uri
                .unwrap_or_else(|| OAUTH2_TOKEN_ENDPOINT.to_string()),
        };
        Credentials::from_parts(
            CredentialsKind::AuthorizedUser,
            None,
            Some(RefreshMaterial::AuthorizedUser(refresh)),
            scopes.to_vec(),
            self.quota_project_id,
        )
    }
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
enum RefreshGrantType {
    #[serde(rename = "refresh_token")]
    RefreshToken,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
struct Oauth2RefreshRequest<'a> {
    grant_type: RefreshGrantType,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'a str>,
}

/// A successful response from an OAuth2 token endpoint.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub(crate) struct Oauth2TokenResponse {
    pub(crate) access_token: String,
    #[serde(default = "bearer", skip_serializing_if = "String::is_empty")]
    pub(crate) token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) scope: Option<String>,
}

fn bearer() -> String {
    "Bearer".to_string()
}

impl Oauth2TokenResponse {
    pub(crate) fn into_token(self) -> Token {
        let mut token = Token::bearer(self.access_token, self.expires_in);
        token.token_type = self.token_type;
        token
    }
}
