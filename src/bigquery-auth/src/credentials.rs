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

//! Types to work with Google Cloud authentication [Credentials].
//!
//! A [Credentials] value holds the current access token plus whatever is
//! needed to obtain a new one. Its [state](Credentials::state) drives the
//! cache logic in the broker:
//!
//! * [CredentialsState::Valid]: the token can be used now.
//! * [CredentialsState::Expired]: the token is gone or stale, but the
//!   credentials can refresh themselves.
//! * [CredentialsState::Invalid]: the credentials must be obtained again.
//!
//! [Credentials]: https://cloud.google.com/docs/authentication#credentials

use crate::Result;
use crate::errors::Error;
use crate::metadata::MetadataClient;
use crate::service_account::ServiceAccountKey;
use crate::token::Token;
use crate::user_account::UserRefresh;
use reqwest::Client;
use std::sync::Arc;

/// The kind of principal behind some [Credentials].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialsKind {
    /// A service account, authenticated with a private key.
    ServiceAccount,
    /// A user account, authenticated with an OAuth2 refresh token.
    AuthorizedUser,
    /// The service account attached to a Google Cloud VM or service.
    ComputeEngine,
}

/// Where a set of [Credentials] can be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialsState {
    /// The access token is present and not expired.
    Valid,
    /// The access token is missing or expired, but it can be refreshed.
    Expired,
    /// The access token is missing or expired and cannot be refreshed.
    Invalid,
}

/// The material needed to get a new access token.
#[derive(Clone, Debug)]
pub(crate) enum RefreshMaterial {
    AuthorizedUser(UserRefresh),
    ServiceAccount(Arc<ServiceAccountKey>),
    Metadata { host: String, account: String },
}

/// An access token together with the means to renew it.
#[derive(Clone, Debug)]
pub struct Credentials {
    kind: CredentialsKind,
    token: Option<Token>,
    refresh: Option<RefreshMaterial>,
    scopes: Vec<String>,
    quota_project_id: Option<String>,
}

impl Credentials {
    /// Creates credentials from an access token alone.
    ///
    /// Such credentials cannot be refreshed: once the token expires they are
    /// [CredentialsState::Invalid]. Mostly useful to test code consuming this
    /// crate.
    pub fn new(kind: CredentialsKind, token: Token) -> Self {
        Self::from_parts(kind, Some(token), None, Vec::new(), None)
    }

    /// Sets the scopes granted to the token.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Sets the [quota project] for these credentials.
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project_id<S: Into<String>>(mut self, quota_project_id: S) -> Self {
        self.quota_project_id = Some(quota_project_id.into());
        self
    }

    pub(crate) fn from_parts(
        kind: CredentialsKind,
        token: Option<Token>,
        refresh: Option<RefreshMaterial>,
        scopes: Vec<String>,
        quota_project_id: Option<String>,
    ) -> Self {
        Self {
            kind,
            token,
            refresh,
            scopes,
            quota_project_id,
        }
    }

    pub fn kind(&self) -> CredentialsKind {
        self.kind
    }

    /// The current access token, if any.
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn quota_project_id(&self) -> Option<&str> {
        self.quota_project_id.as_deref()
    }

    /// The OAuth2 refresh token, only present for user credentials.
    pub fn refresh_token(&self) -> Option<&str> {
        match &self.refresh {
            Some(RefreshMaterial::AuthorizedUser(r)) => Some(r.refresh_token.as_str()),
            _ => None,
        }
    }

    pub(crate) fn user_refresh(&self) -> Option<&UserRefresh> {
        match &self.refresh {
            Some(RefreshMaterial::AuthorizedUser(r)) => Some(r),
            _ => None,
        }
    }

    pub fn state(&self) -> CredentialsState {
        match (&self.token, &self.refresh) {
            (Some(t), _) if !t.is_expired() => CredentialsState::Valid,
            (_, Some(_)) => CredentialsState::Expired,
            (_, None) => CredentialsState::Invalid,
        }
    }

    /// Shorthand for `state() == CredentialsState::Valid`.
    pub fn is_valid(&self) -> bool {
        self.state() == CredentialsState::Valid
    }

    /// Replaces the access token with a new one.
    ///
    /// Fails if the credentials have no refresh material, or if the token
    /// endpoint rejects the request. On failure the credentials are left
    /// unchanged.
    pub async fn refresh(&mut self, client: &Client) -> Result<()> {
        let token = match &mut self.refresh {
            None => {
                return Err(Error::token_fetch(
                    false,
                    "the credentials cannot be refreshed, they have no refresh material",
                ));
            }
            Some(RefreshMaterial::AuthorizedUser(user)) => {
                user.refresh(client, &self.scopes).await?
            }
            Some(RefreshMaterial::ServiceAccount(key)) => {
                key.mint_token(client, &self.scopes).await?
            }
            Some(RefreshMaterial::Metadata { host, account }) => {
                MetadataClient::new(client.clone(), host.as_str())
                    .access_token(account, &self.scopes)
                    .await?
            }
        };
        self.token = Some(token);
        Ok(())
    }
}
