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

//! Google Cloud Client Libraries for Rust - BigQuery Credentials
//!
//! **WARNING:** this crate is under active development. We expect multiple
//! breaking changes in the upcoming releases. Testing is also incomplete, we do
//! **not** recommend that you use this crate in production. We welcome feedback
//! about the APIs, documentation, missing features, bugs, etc.
//!
//! This crate finds credentials that can run queries in a BigQuery project.
//! Applications such as notebooks and command-line tools can call it once at
//! startup: it uses the service account key supplied by the caller, user
//! credentials cached by a previous run, or the credentials of the
//! environment, and falls back to asking the user for consent in a browser.
//! User credentials obtained this way are cached in a file, and refreshed
//! when they expire.
//!
//! The [broker::CredentialBroker] implements this cascade. The functions in
//! this module cover the common cases:
//!
//! ```no_run
//! # tokio_test::block_on(async {
//! let (credentials, project_id) =
//!     google_cloud_bigquery_auth::get_credentials(Some("my-project"), None).await?;
//! match credentials {
//!     Some(c) => println!("using {:?} credentials for {project_id:?}", c.kind()),
//!     None => println!("no credentials available"),
//! }
//! # Ok::<(), google_cloud_bigquery_auth::errors::Error>(())
//! # });
//! ```

pub mod broker;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod default_credentials;
pub mod errors;
pub mod interactive;
pub mod store;
pub mod token;
pub mod validator;

pub(crate) mod jws;
pub(crate) mod metadata;
pub(crate) mod service_account;
pub(crate) mod user_account;

/// A `Result` alias where the `Err` case is
/// `google_cloud_bigquery_auth::errors::Error`.
pub(crate) type Result<T> = std::result::Result<T, crate::errors::Error>;

pub use broker::{CredentialBroker, CredentialsSource, Resolution, ResolutionRequest};
pub use credentials::{Credentials, CredentialsKind, CredentialsState};

/// Gets credentials and the project to use them with.
///
/// Tries, in order, the `private_key` (a path to a service account key file,
/// or its JSON contents), cached user credentials, the credentials of the
/// environment, and finally asks the user for consent in the console.
///
/// Fails only if `private_key` cannot be loaded. Returns `(None, None)` if
/// no credentials can access `project_id`.
pub async fn get_credentials(
    project_id: Option<&str>,
    private_key: Option<&str>,
) -> Result<(Option<Credentials>, Option<String>)> {
    let broker = CredentialBroker::builder().build();
    let resolution = broker
        .resolve(&credentials_request(project_id, private_key))
        .await?;
    Ok(resolution.into_parts())
}

/// Gets the [Application Default Credentials] and their default project.
///
/// Returns `(None, None)` when the environment provides no credentials.
///
/// [Application Default Credentials]: https://cloud.google.com/docs/authentication/application-default-credentials
pub async fn get_application_default_credentials()
-> Result<(Option<Credentials>, Option<String>)> {
    let broker = CredentialBroker::builder().build();
    let resolution = broker.resolve(&application_default_request()).await?;
    Ok(resolution.into_parts())
}

/// Gets user credentials, from the cache or by asking the user for consent.
///
/// With `auth_local_webserver` the browser hands the authorization code to a
/// temporary server on `127.0.0.1`, otherwise the user pastes it in the
/// console. With `reauth` the cached credentials are ignored and the user is
/// asked for consent again.
pub async fn get_user_account_credentials(
    project_id: Option<&str>,
    auth_local_webserver: bool,
    reauth: bool,
) -> Result<Option<Credentials>> {
    let broker = CredentialBroker::builder().build();
    let request = user_account_request(project_id, auth_local_webserver, reauth);
    let resolution = broker.resolve(&request).await?;
    Ok(resolution.credentials)
}

fn credentials_request(project_id: Option<&str>, private_key: Option<&str>) -> ResolutionRequest {
    let mut request = ResolutionRequest::new().with_allow_interactive(true);
    if let Some(p) = project_id {
        request = request.with_project_id(p);
    }
    if let Some(k) = private_key {
        request = request.with_private_key(k);
    }
    request
}

fn application_default_request() -> ResolutionRequest {
    ResolutionRequest::new()
        .with_force_reauthorization(true)
        .with_allow_interactive(false)
}

fn user_account_request(
    project_id: Option<&str>,
    auth_local_webserver: bool,
    reauth: bool,
) -> ResolutionRequest {
    let mut request = ResolutionRequest::new()
        .with_allow_ambient(false)
        .with_allow_interactive(true)
        .with_use_local_callback_server(auth_local_webserver)
        .with_force_reauthorization(reauth);
    if let Some(p) = project_id {
        request = request.with_project_id(p);
    }
    request
}
