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

use crate::constants::{
    BIGQUERY_ENDPOINT_VAR, BIGQUERY_SCOPE, CLIENT_ID_VAR, CLIENT_SECRET_VAR,
    DEFAULT_BIGQUERY_ENDPOINT, GCE_METADATA_HOST_VAR,
};
use crate::store::FileStore;
use std::path::PathBuf;

/// Settings shared by the components of a [CredentialBroker].
///
/// Start from [Config::from_env] and override individual settings with the
/// `with_*` methods.
///
/// [CredentialBroker]: crate::broker::CredentialBroker
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub(crate) scopes: Vec<String>,
    pub(crate) cache_path: Option<PathBuf>,
    pub(crate) bigquery_endpoint: String,
    pub(crate) client_id: Option<String>,
    pub(crate) client_secret: Option<String>,
    pub(crate) metadata_host: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scopes: vec![BIGQUERY_SCOPE.to_string()],
            cache_path: None,
            bigquery_endpoint: DEFAULT_BIGQUERY_ENDPOINT.to_string(),
            client_id: None,
            client_secret: None,
            metadata_host: None,
        }
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Reads the configuration from the environment.
    ///
    /// * `BIGQUERY_AUTH_CACHE_FILE`, `HOME` or `APPDATA` locate the cache
    ///   file, see [FileStore::default_path].
    /// * `BIGQUERY_AUTH_ENDPOINT` overrides the BigQuery API root used to
    ///   validate credentials.
    /// * `BIGQUERY_AUTH_CLIENT_ID` and `BIGQUERY_AUTH_CLIENT_SECRET` name the
    ///   OAuth client of the consent flow.
    /// * `GCE_METADATA_HOST` overrides the metadata server address.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_path: FileStore::default_path(),
            bigquery_endpoint: env(BIGQUERY_ENDPOINT_VAR).unwrap_or(defaults.bigquery_endpoint),
            client_id: env(CLIENT_ID_VAR),
            client_secret: env(CLIENT_SECRET_VAR),
            metadata_host: env(GCE_METADATA_HOST_VAR),
            ..defaults
        }
    }

    /// Sets the scopes requested for every credential.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn with_cache_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_bigquery_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.bigquery_endpoint = endpoint.into();
        self
    }

    /// Sets the OAuth client used by the consent flow.
    pub fn with_client<I, S>(mut self, client_id: I, client_secret: S) -> Self
    where
        I: Into<String>,
        S: Into<String>,
    {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Sets the `host[:port]` of the metadata server.
    pub fn with_metadata_host<S: Into<String>>(mut self, host: S) -> Self {
        self.metadata_host = Some(host.into());
        self
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn cache_path(&self) -> Option<&std::path::Path> {
        self.cache_path.as_deref()
    }

    pub fn bigquery_endpoint(&self) -> &str {
        &self.bigquery_endpoint
    }
}
