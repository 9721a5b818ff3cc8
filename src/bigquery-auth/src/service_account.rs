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

//! [Service Account] credentials.
//!
//! Service account keys are used in two places: as the explicit private key
//! a caller hands to the broker, and as an Application Default Credentials
//! file. In both cases the key signs a JWT assertion that is exchanged for an
//! access token at the key's `token_uri`.
//!
//! [Service Account]: https://cloud.google.com/iam/docs/service-account-overview

use crate::Result;
use crate::constants::OAUTH2_TOKEN_ENDPOINT;
use crate::credentials::{Credentials, CredentialsKind, RefreshMaterial};
use crate::errors::{BoxError, Error};
use crate::jws::{JwsClaims, JwsHeader, sign};
use crate::token::Token;
use crate::user_account::post_token_request;
use chrono::Utc;
use reqwest::Client;
use rustls::SignatureScheme;
use rustls::crypto::CryptoProvider;
use rustls::sign::Signer;
use rustls_pki_types::PrivateKeyDer;
use rustls_pki_types::pem::PemObject;
use std::path::Path;
use std::sync::Arc;

const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const SERVICE_ACCOUNT_TYPE: &str = "service_account";

/// A representation of a [Service Account Key].
///
/// [Service Account Key]: https://google.aip.dev/auth/4112
#[derive(Clone, PartialEq, serde::Deserialize)]
pub(crate) struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    cred_type: Option<String>,
    pub(crate) client_email: String,
    #[serde(default)]
    pub(crate) private_key_id: Option<String>,
    pub(crate) private_key: String,
    #[serde(default)]
    pub(crate) project_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"[censored]")
            .field("project_id", &self.project_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Parses the JSON contents of a key file.
    ///
    /// Fails if the JSON is malformed, declares a different credentials type,
    /// or carries a private key that cannot produce an RS256 signer.
    pub(crate) fn from_slice(contents: &[u8]) -> std::result::Result<Self, BoxError> {
        let key = serde_json::from_slice::<ServiceAccountKey>(contents)?;
        match key.cred_type.as_deref() {
            None | Some(SERVICE_ACCOUNT_TYPE) => {}
            Some(other) => {
                return Err(format!(
                    "expected a `{SERVICE_ACCOUNT_TYPE}` key, found `{other}`"
                )
                .into());
            }
        }
        key.signer()?;
        Ok(key)
    }

    /// Loads a key supplied by the caller.
    ///
    /// The input is either the JSON key itself, or the path to a file holding
    /// it. Any failure is an [Error::is_explicit_credential_malformed] error.
    pub(crate) async fn from_private_key(input: &str) -> Result<Self> {
        let trimmed = input.trim_start();
        if trimmed.starts_with('{') {
            return Self::from_slice(trimmed.as_bytes())
                .map_err(Error::explicit_credential_malformed);
        }
        let path = Path::new(input);
        let contents = tokio::fs::read(path).await.map_err(|e| {
            Error::explicit_credential_malformed(format!(
                "cannot read private key file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_slice(&contents).map_err(Error::explicit_credential_malformed)
    }

    fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(OAUTH2_TOKEN_ENDPOINT)
    }

    // Creates a signer using the private key stored in the service account file.
    fn signer(&self) -> std::result::Result<Box<dyn Signer>, BoxError> {
        let key_provider = CryptoProvider::get_default().map_or_else(
            || rustls::crypto::aws_lc_rs::default_provider().key_provider,
            |p| p.key_provider,
        );
        let private_key = PrivateKeyDer::from_pem_slice(self.private_key.as_bytes())
            .map_err(|e| format!("missing or invalid PEM section in service account key: {e}"))?;
        let pk = match private_key {
            PrivateKeyDer::Pkcs8(_) => key_provider.load_private_key(private_key)?,
            other => {
                return Err(format!(
                    "expected key to be in form of PKCS8, found {}",
                    key_format(&other)
                )
                .into());
            }
        };
        pk.choose_scheme(&[SignatureScheme::RSA_PKCS1_SHA256])
            .ok_or_else(|| {
                BoxError::from(
                    "unable to choose RSA_PKCS1_SHA256 signing scheme as it is not supported by current signer",
                )
            })
    }

    /// Exchanges a signed assertion for an access token.
    pub(crate) async fn mint_token(&self, client: &Client, scopes: &[String]) -> Result<Token> {
        let signer = self.signer().map_err(|e| Error::token_fetch(false, e))?;
        let scope = scopes.join(" ");
        let claims = JwsClaims::new(
            &self.client_email,
            (!scope.is_empty()).then_some(scope.as_str()),
            self.token_uri(),
            Utc::now(),
        );
        let header = JwsHeader {
            alg: "RS256",
            typ: "JWT",
            kid: self.private_key_id.as_deref(),
        };
        let assertion =
            sign(&header, &claims, signer.as_ref()).map_err(|e| Error::token_fetch(false, e))?;

        let form = [
            ("grant_type", JWT_BEARER_GRANT_TYPE),
            ("assertion", assertion.as_str()),
        ];
        let response = post_token_request(client, self.token_uri(), &form).await?;
        Ok(response.into_token())
    }

    /// Builds credentials from this key and a freshly minted token.
    pub(crate) fn into_credentials(self, token: Token, scopes: &[String]) -> Credentials {
        Credentials::from_parts(
            CredentialsKind::ServiceAccount,
            Some(token),
            Some(RefreshMaterial::ServiceAccount(Arc::new(self))),
            scopes.to_vec(),
            None,
        )
    }
}

fn key_format(key: &PrivateKeyDer<'_>) -> &'static str {
    match key {
        PrivateKeyDer::Pkcs1(_) => "Pkcs1Key",
        PrivateKeyDer::Sec1(_) => "Sec1Key",
        PrivateKeyDer::Pkcs8(_) => "Pkcs8Key",
        _ => "unknown key format",
    }
}
