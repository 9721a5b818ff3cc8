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

//! Picks one working credential for a BigQuery project.
//!
//! [CredentialBroker::resolve] tries each source in order, and returns the
//! first one that produces credentials accepted for the project:
//!
//! 1. The private key supplied by the caller, if any. A key that cannot be
//!    loaded fails the call.
//! 2. User credentials cached by a previous consent flow, refreshed if they
//!    expired. Skipped when forcing re-authorization.
//! 3. The credentials of the environment, see [DefaultCredentialResolver].
//! 4. A new consent flow, if allowed. Its result is cached.
//!
//! Running out of sources is not an error: the [Resolution] is empty.

use crate::Result;
use crate::config::Config;
use crate::credentials::{Credentials, CredentialsState};
use crate::default_credentials::{ApplicationDefaultResolver, DefaultCredentialResolver};
use crate::errors::Error;
use crate::interactive::{AuthorizeOptions, InstalledAppFlow, InteractiveAuthorizer};
use crate::service_account::ServiceAccountKey;
use crate::store::{CachedCredentialRecord, CredentialStore, FileStore};
use crate::validator::{BigQueryValidator, CredentialsValidator};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// The inputs of a single [CredentialBroker::resolve] call.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolutionRequest {
    pub(crate) private_key: Option<String>,
    pub(crate) project_id: Option<String>,
    pub(crate) allow_interactive: bool,
    pub(crate) force_reauthorization: bool,
    pub(crate) use_local_callback_server: bool,
    pub(crate) allow_ambient: bool,
    pub(crate) deadline: Option<Duration>,
}

impl Default for ResolutionRequest {
    fn default() -> Self {
        Self {
            private_key: None,
            project_id: None,
            allow_interactive: false,
            force_reauthorization: false,
            use_local_callback_server: false,
            allow_ambient: true,
            deadline: None,
        }
    }
}

impl ResolutionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service account key, either the path of a JSON key file or the
    /// contents of one.
    pub fn with_private_key<S: Into<String>>(mut self, v: S) -> Self {
        self.private_key = Some(v.into());
        self
    }

    /// The project the credentials must be able to query.
    pub fn with_project_id<S: Into<String>>(mut self, v: S) -> Self {
        self.project_id = Some(v.into());
        self
    }

    /// Fall back to a consent flow when no other source works.
    pub fn with_allow_interactive(mut self, v: bool) -> Self {
        self.allow_interactive = v;
        self
    }

    /// Ignore cached user credentials, and ask the user for consent again.
    pub fn with_force_reauthorization(mut self, v: bool) -> Self {
        self.force_reauthorization = v;
        self
    }

    /// Run the consent flow with a local callback server instead of the
    /// console.
    pub fn with_use_local_callback_server(mut self, v: bool) -> Self {
        self.use_local_callback_server = v;
        self
    }

    /// Consider the credentials of the environment. Enabled by default.
    pub fn with_allow_ambient(mut self, v: bool) -> Self {
        self.allow_ambient = v;
        self
    }

    /// Bounds the duration of the whole resolution.
    pub fn with_deadline(mut self, v: Duration) -> Self {
        self.deadline = Some(v);
        self
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }
}

/// Where the credentials in a [Resolution] come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialsSource {
    ExplicitKey,
    Cache,
    Ambient,
    Interactive,
}

/// The outcome of [CredentialBroker::resolve].
#[derive(Clone, Debug)]
pub struct Resolution {
    pub credentials: Option<Credentials>,
    pub project_id: Option<String>,
    pub source: Option<CredentialsSource>,
}

impl Resolution {
    /// No source produced acceptable credentials.
    pub fn none() -> Self {
        Self {
            credentials: None,
            project_id: None,
            source: None,
        }
    }

    fn found(
        credentials: Credentials,
        project_id: Option<String>,
        source: CredentialsSource,
    ) -> Self {
        Self {
            credentials: Some(credentials),
            project_id,
            source: Some(source),
        }
    }

    pub fn is_none(&self) -> bool {
        self.credentials.is_none()
    }

    pub fn into_parts(self) -> (Option<Credentials>, Option<String>) {
        (self.credentials, self.project_id)
    }
}

#[derive(Debug)]
enum AmbientProbe {
    Found {
        credentials: Credentials,
        project_id: Option<String>,
    },
    Unavailable,
}

/// Resolves, validates, and caches credentials for BigQuery.
///
/// A broker remembers the outcome of probing the environment, so repeated
/// calls to [resolve](CredentialBroker::resolve) do not search it again.
#[derive(Debug)]
pub struct CredentialBroker {
    client: Client,
    scopes: Vec<String>,
    store: Option<Arc<dyn CredentialStore>>,
    validator: Arc<dyn CredentialsValidator>,
    resolver: Arc<dyn DefaultCredentialResolver>,
    authorizer: Arc<dyn InteractiveAuthorizer>,
    ambient: Mutex<Option<AmbientProbe>>,
}

impl CredentialBroker {
    /// A [Builder] configured from the environment.
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Returns the first acceptable credentials, if any.
    ///
    /// Only fails if the explicit private key cannot be used, or if the
    /// request deadline elapses.
    pub async fn resolve(&self, request: &ResolutionRequest) -> Result<Resolution> {
        let Some(deadline) = request.deadline else {
            return self.resolve_stages(request).await;
        };
        tokio::time::timeout(deadline, self.resolve_stages(request))
            .await
            .map_err(|_| Error::timeout(deadline))?
    }

    /// Removes the cached user credentials.
    pub async fn clear_cache(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.clear().await,
            None => Ok(()),
        }
    }

    async fn resolve_stages(&self, request: &ResolutionRequest) -> Result<Resolution> {
        if let Some(private_key) = &request.private_key {
            if let Some(r) = self.from_private_key(private_key, request).await? {
                return Ok(r);
            }
        }
        if request.force_reauthorization {
            tracing::debug!("forcing re-authorization, ignoring cached credentials");
        } else if let Some(r) = self.from_cache(request).await {
            return Ok(r);
        }
        if request.allow_ambient {
            if let Some(r) = self.from_ambient(request).await {
                return Ok(r);
            }
        }
        if request.allow_interactive {
            if let Some(r) = self.from_interactive(request).await {
                return Ok(r);
            }
        }
        tracing::debug!("no credentials available");
        Ok(Resolution::none())
    }

    /// Validates `credentials` if there is a project to validate against.
    async fn accept(&self, credentials: &Credentials, project_id: Option<&str>) -> bool {
        let Some(project_id) = project_id else {
            tracing::debug!("no project id, skipping validation");
            return true;
        };
        if self.validator.validate(credentials, project_id).await {
            return true;
        }
        tracing::debug!("{}", Error::validation_rejected(project_id));
        false
    }

    async fn from_private_key(
        &self,
        private_key: &str,
        request: &ResolutionRequest,
    ) -> Result<Option<Resolution>> {
        let key = ServiceAccountKey::from_private_key(private_key).await?;
        let project_id = request
            .project_id
            .clone()
            .or_else(|| key.project_id.clone());
        let token = match key.mint_token(&self.client, &self.scopes).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("cannot get a token with the explicit private key: {e}");
                return Ok(None);
            }
        };
        let credentials = key.into_credentials(token, &self.scopes);
        if !self
            .accept(&credentials, request.project_id.as_deref())
            .await
        {
            tracing::warn!("the explicit private key was rejected, trying other sources");
            return Ok(None);
        }
        tracing::debug!("using the explicit private key");
        Ok(Some(Resolution::found(
            credentials,
            project_id,
            CredentialsSource::ExplicitKey,
        )))
    }

    async fn from_cache(&self, request: &ResolutionRequest) -> Option<Resolution> {
        let store = self.store.as_ref()?;
        let Some(record) = store.load().await else {
            tracing::debug!("no cached credentials");
            return None;
        };
        let mut credentials = record.to_credentials();
        let project_id = request
            .project_id
            .clone()
            .or_else(|| record.project_id.clone());
        let refreshed = match credentials.state() {
            CredentialsState::Valid => false,
            CredentialsState::Expired => {
                if let Err(e) = credentials.refresh(&self.client).await {
                    tracing::debug!("cannot refresh cached credentials: {e}");
                    return None;
                }
                true
            }
            CredentialsState::Invalid => {
                tracing::debug!("cached credentials cannot be used or refreshed");
                return None;
            }
        };
        if !self
            .accept(&credentials, request.project_id.as_deref())
            .await
        {
            return None;
        }
        if refreshed {
            self.save(&credentials, project_id.as_deref()).await;
        }
        tracing::debug!("using cached credentials");
        Some(Resolution::found(
            credentials,
            project_id,
            CredentialsSource::Cache,
        ))
    }

    async fn from_ambient(&self, request: &ResolutionRequest) -> Option<Resolution> {
        let mut probe = self.ambient.lock().await;
        if probe.is_none() {
            *probe = Some(match self.resolver.probe(&self.scopes).await {
                Ok((credentials, project_id)) => AmbientProbe::Found {
                    credentials,
                    project_id,
                },
                Err(e) => {
                    tracing::debug!("{e}");
                    AmbientProbe::Unavailable
                }
            });
        }
        let (credentials, ambient_project_id) = match probe.as_mut()? {
            AmbientProbe::Found {
                credentials,
                project_id,
            } => (credentials, project_id),
            AmbientProbe::Unavailable => return None,
        };
        if !credentials.is_valid() {
            if let Err(e) = credentials.refresh(&self.client).await {
                tracing::debug!("cannot refresh default credentials: {e}");
                return None;
            }
        }
        let credentials = credentials.clone();
        let project_id = request
            .project_id
            .clone()
            .or_else(|| ambient_project_id.clone());
        drop(probe);

        if !self.accept(&credentials, project_id.as_deref()).await {
            return None;
        }
        tracing::debug!("using default credentials");
        Some(Resolution::found(
            credentials,
            project_id,
            CredentialsSource::Ambient,
        ))
    }

    async fn from_interactive(&self, request: &ResolutionRequest) -> Option<Resolution> {
        let options = AuthorizeOptions {
            use_local_callback_server: request.use_local_callback_server,
            force_reauthorization: request.force_reauthorization,
        };
        let credentials = match self.authorizer.authorize(&self.scopes, options).await {
            Ok(c) => c,
            Err(e) => {
                tracing::info!("{e}");
                return None;
            }
        };
        if !self
            .accept(&credentials, request.project_id.as_deref())
            .await
        {
            return None;
        }
        self.save(&credentials, request.project_id.as_deref()).await;
        Some(Resolution::found(
            credentials,
            request.project_id.clone(),
            CredentialsSource::Interactive,
        ))
    }

    /// Caches user credentials. Failures are logged and otherwise ignored.
    async fn save(&self, credentials: &Credentials, project_id: Option<&str>) {
        let Some(store) = &self.store else {
            return;
        };
        let Some(record) = CachedCredentialRecord::from_credentials(credentials, project_id) else {
            return;
        };
        if let Err(e) = store.save(&record).await {
            tracing::warn!("{e}");
        }
    }
}

/// Creates a [CredentialBroker].
///
/// Collaborators not set explicitly are created from the [Config]:
/// a [FileStore] at [Config::cache_path], a [BigQueryValidator], an
/// [ApplicationDefaultResolver], and an [InstalledAppFlow].
#[derive(Debug)]
pub struct Builder {
    config: Config,
    client: Option<Client>,
    store: Option<Arc<dyn CredentialStore>>,
    validator: Option<Arc<dyn CredentialsValidator>>,
    resolver: Option<Arc<dyn DefaultCredentialResolver>>,
    authorizer: Option<Arc<dyn InteractiveAuthorizer>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// A builder using [Config::from_env].
    pub fn new() -> Self {
        Self::from_config(Config::from_env())
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            client: None,
            store: None,
            validator: None,
            resolver: None,
            authorizer: None,
        }
    }

    /// Sets the HTTP client shared by the default collaborators.
    pub fn with_client(mut self, v: Client) -> Self {
        self.client = Some(v);
        self
    }

    pub fn with_store<T: CredentialStore + 'static>(mut self, v: T) -> Self {
        self.store = Some(Arc::new(v));
        self
    }

    pub fn with_validator<T: CredentialsValidator + 'static>(mut self, v: T) -> Self {
        self.validator = Some(Arc::new(v));
        self
    }

    pub fn with_resolver<T: DefaultCredentialResolver + 'static>(mut self, v: T) -> Self {
        self.resolver = Some(Arc::new(v));
        self
    }

    pub fn with_authorizer<T: InteractiveAuthorizer + 'static>(mut self, v: T) -> Self {
        self.authorizer = Some(Arc::new(v));
        self
    }

    pub fn build(self) -> CredentialBroker {
        let Builder {
            config,
            client,
            store,
            validator,
            resolver,
            authorizer,
        } = self;
        let client = client.unwrap_or_default();
        let store = store.or_else(|| {
            config
                .cache_path
                .clone()
                .map(|p| Arc::new(FileStore::new(p)) as Arc<dyn CredentialStore>)
        });
        let validator = validator.unwrap_or_else(|| {
            Arc::new(BigQueryValidator::new(
                client.clone(),
                config.bigquery_endpoint.clone(),
            ))
        });
        let resolver = resolver.unwrap_or_else(|| {
            let mut resolver = ApplicationDefaultResolver::new(client.clone());
            if let Some(host) = &config.metadata_host {
                resolver = resolver.with_metadata_host(host.clone());
            }
            Arc::new(resolver)
        });
        let authorizer = authorizer.unwrap_or_else(|| {
            let mut flow = InstalledAppFlow::new(client.clone());
            if let (Some(id), Some(secret)) = (&config.client_id, &config.client_secret) {
                flow = flow.with_client(id.clone(), secret.clone());
            }
            Arc::new(flow)
        });
        CredentialBroker {
            client,
            scopes: config.scopes,
            store,
            validator,
            resolver,
            authorizer,
            ambient: Mutex::new(None),
        }
    }
}
