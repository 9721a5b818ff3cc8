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

//! Errors produced while resolving, refreshing, or caching credentials.
//!
//! Only two kinds of errors ever escape [CredentialBroker::resolve]: a
//! malformed explicit private key, and an elapsed deadline. Every other kind
//! is consumed by the cascade and logged. They are still public because the
//! collaborator traits return them, and applications implementing those
//! traits need to construct them.
//!
//! [CredentialBroker::resolve]: crate::broker::CredentialBroker::resolve

use http::StatusCode;
use std::time::Duration;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for credential resolution.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    /// The caller supplied a private key that cannot be read, parsed, or used
    /// to sign requests.
    pub fn is_explicit_credential_malformed(&self) -> bool {
        matches!(self.0, ErrorKind::ExplicitCredentialMalformed(_))
    }

    /// A live check rejected the credentials for the requested project.
    pub fn is_validation_rejected(&self) -> bool {
        matches!(self.0, ErrorKind::ValidationRejected(_))
    }

    /// The runtime environment does not offer default credentials.
    pub fn is_no_ambient_credentials(&self) -> bool {
        matches!(self.0, ErrorKind::NoAmbientCredentials(_))
    }

    /// The user declined or abandoned the consent flow.
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self.0, ErrorKind::UserCancelled(_))
    }

    /// The consent flow cannot run, for example because no OAuth client is
    /// configured.
    pub fn is_consent_flow_unavailable(&self) -> bool {
        matches!(self.0, ErrorKind::ConsentFlowUnavailable(_))
    }

    /// The cache file exists but does not contain a credential record.
    pub fn is_cache_corrupt(&self) -> bool {
        matches!(self.0, ErrorKind::CacheCorrupt(_))
    }

    /// The cache file exists but cannot be read.
    pub fn is_cache_unreadable(&self) -> bool {
        matches!(self.0, ErrorKind::CacheUnreadable(_))
    }

    /// Persisting credentials to the cache failed.
    pub fn is_store_write_failed(&self) -> bool {
        matches!(self.0, ErrorKind::StoreWriteFailed(_))
    }

    /// A token endpoint (OAuth2 or metadata server) failed to produce a token.
    pub fn is_token_fetch(&self) -> bool {
        matches!(self.0, ErrorKind::TokenFetch { .. })
    }

    /// The resolution deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self.0, ErrorKind::Timeout(_))
    }

    /// Returns `true` if retrying the failed operation might succeed.
    ///
    /// Only token fetch errors are ever retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.0,
            ErrorKind::TokenFetch {
                retryable: true,
                ..
            }
        )
    }

    pub(crate) fn explicit_credential_malformed<T: Into<BoxError>>(source: T) -> Error {
        Error(ErrorKind::ExplicitCredentialMalformed(source.into()))
    }

    pub(crate) fn validation_rejected<T: Into<String>>(project_id: T) -> Error {
        Error(ErrorKind::ValidationRejected(project_id.into()))
    }

    /// Creates an error for environments without default credentials.
    pub fn no_ambient_credentials<T: Into<BoxError>>(source: T) -> Error {
        Error(ErrorKind::NoAmbientCredentials(source.into()))
    }

    /// Creates an error for a consent flow the user declined.
    pub fn user_cancelled<T: Into<BoxError>>(source: T) -> Error {
        Error(ErrorKind::UserCancelled(source.into()))
    }

    /// Creates an error for a consent flow that cannot start.
    pub fn consent_flow_unavailable<T: Into<BoxError>>(source: T) -> Error {
        Error(ErrorKind::ConsentFlowUnavailable(source.into()))
    }

    pub(crate) fn cache_corrupt<T: Into<BoxError>>(source: T) -> Error {
        Error(ErrorKind::CacheCorrupt(source.into()))
    }

    pub(crate) fn cache_unreadable<T: Into<BoxError>>(source: T) -> Error {
        Error(ErrorKind::CacheUnreadable(source.into()))
    }

    /// Creates an error for a failed cache write.
    pub fn store_write_failed<T: Into<BoxError>>(source: T) -> Error {
        Error(ErrorKind::StoreWriteFailed(source.into()))
    }

    pub(crate) fn token_fetch<T: Into<BoxError>>(retryable: bool, source: T) -> Error {
        Error(ErrorKind::TokenFetch {
            retryable,
            source: source.into(),
        })
    }

    /// A token fetch error whose retry policy follows the HTTP status code.
    pub(crate) fn token_fetch_status<T: Into<BoxError>>(status: StatusCode, source: T) -> Error {
        Error::token_fetch(is_retryable(status), source)
    }

    pub(crate) fn timeout(deadline: Duration) -> Error {
        Error(ErrorKind::Timeout(deadline))
    }
}

#[derive(thiserror::Error, Debug)]
enum ErrorKind {
    #[error("the explicit private key cannot be used: {0}")]
    ExplicitCredentialMalformed(#[source] BoxError),
    #[error("the credentials were rejected for project {0}")]
    ValidationRejected(String),
    #[error("no application default credentials are available: {0}")]
    NoAmbientCredentials(#[source] BoxError),
    #[error("the user cancelled the authorization flow: {0}")]
    UserCancelled(#[source] BoxError),
    #[error("the authorization flow is not available: {0}")]
    ConsentFlowUnavailable(#[source] BoxError),
    #[error("cannot parse the credentials cache {0}")]
    CacheCorrupt(#[source] BoxError),
    #[error("cannot read the credentials cache {0}")]
    CacheUnreadable(#[source] BoxError),
    #[error("cannot write the credentials cache {0}")]
    StoreWriteFailed(#[source] BoxError),
    #[error("cannot fetch access token, retryable={retryable}: {source}")]
    TokenFetch {
        retryable: bool,
        #[source]
        source: BoxError,
    },
    #[error("credential resolution did not complete within {0:?}")]
    Timeout(Duration),
}

pub(crate) fn is_retryable(c: StatusCode) -> bool {
    match c {
        // Internal server errors do not indicate that there is anything wrong
        // with our request, so we retry them.
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => true,
        _ => false,
    }
}
