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

//! Persistence for user credentials obtained through the consent flow.
//!
//! The cache holds a single [CachedCredentialRecord] in a JSON file. Reads
//! never fail: a missing, unreadable, or corrupt file is a cache miss. Writes
//! go to a sibling temporary file which is then renamed over the target, so
//! a concurrent reader sees either the old record or the new one. There is no
//! locking between processes, the last writer wins.

use crate::Result;
use crate::constants::{
    CACHE_DIRNAME, CACHE_FILE_VAR, CACHE_FILENAME, OAUTH2_TOKEN_ENDPOINT, UNIX_HOME_VAR,
    WINDOWS_APPDATA_VAR,
};
use crate::credentials::{Credentials, CredentialsKind, RefreshMaterial};
use crate::errors::Error;
use crate::token::Token;
use crate::user_account::UserRefresh;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// The on-disk representation of cached user credentials.
///
/// Unknown fields are ignored and optional fields may be missing, so files
/// written by newer or older versions of this crate can still be read.
#[derive(Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CachedCredentialRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_project_id: Option<String>,
}

impl std::fmt::Debug for CachedCredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCredentialRecord")
            .field("access_token", &self.access_token.as_ref().map(|_| "[censored]"))
            .field("refresh_token", &"[censored]")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[censored]")
            .field("token_uri", &self.token_uri)
            .field("expiry", &self.expiry)
            .field("scopes", &self.scopes)
            .field("project_id", &self.project_id)
            .field("quota_project_id", &self.quota_project_id)
            .finish()
    }
}

impl CachedCredentialRecord {
    /// Creates a record from user credentials.
    ///
    /// Returns `None` for any other kind of credentials, those are never
    /// cached.
    pub fn from_credentials(credentials: &Credentials, project_id: Option<&str>) -> Option<Self> {
        let refresh = credentials.user_refresh()?;
        let token = credentials.token();
        Some(Self {
            access_token: token.map(|t| t.token.clone()),
            refresh_token: refresh.refresh_token.clone(),
            client_id: refresh.client_id.clone(),
            client_secret: refresh.client_secret.clone(),
            token_uri: Some(refresh.token_uri.clone()),
            expiry: token.and_then(|t| t.expires_at),
            scopes: credentials.scopes().to_vec(),
            project_id: project_id.map(str::to_string),
            quota_project_id: credentials.quota_project_id().map(str::to_string),
        })
    }

    /// Rebuilds the credentials stored in this record.
    pub fn to_credentials(&self) -> Credentials {
        let token = self.access_token.as_ref().map(|access_token| Token {
            token: access_token.clone(),
            token_type: "Bearer".to_string(),
            expires_at: self.expiry,
        });
        let refresh = UserRefresh {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_token: self.refresh_token.clone(),
            token_uri: self
                .token_uri
                .clone()
                .unwrap_or_else(|| OAUTH2_TOKEN_ENDPOINT.to_string()),
        };
        Credentials::from_parts(
            CredentialsKind::AuthorizedUser,
            token,
            Some(RefreshMaterial::AuthorizedUser(refresh)),
            self.scopes.clone(),
            self.quota_project_id.clone(),
        )
    }
}

/// Persists a single [CachedCredentialRecord].
#[async_trait::async_trait]
pub trait CredentialStore: std::fmt::Debug + Send + Sync {
    /// Returns the cached record, or `None` if it is missing or unusable.
    async fn load(&self) -> Option<CachedCredentialRecord>;

    /// Replaces the cached record.
    async fn save(&self, record: &CachedCredentialRecord) -> Result<()>;

    /// Removes the cached record, if any.
    async fn clear(&self) -> Result<()>;
}

/// A [CredentialStore] backed by a JSON file.
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The user-scoped location of the cache file.
    ///
    /// `$BIGQUERY_AUTH_CACHE_FILE` if set, otherwise
    /// `%APPDATA%\bigquery-auth\credentials.json` on Windows and
    /// `$HOME/.config/bigquery-auth/credentials.json` elsewhere.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CACHE_FILE_VAR).filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let mut path = if cfg!(windows) {
            PathBuf::from(std::env::var_os(WINDOWS_APPDATA_VAR)?)
        } else {
            let mut path = PathBuf::from(std::env::var_os(UNIX_HOME_VAR)?);
            path.push(".config");
            path
        };
        path.push(CACHE_DIRNAME);
        path.push(CACHE_FILENAME);
        Some(path)
    }

    /// Reads the record, distinguishing the ways this can fail.
    pub(crate) async fn read(&self) -> Result<Option<CachedCredentialRecord>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::cache_unreadable(format!(
                    "{}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_slice::<CachedCredentialRecord>(&contents)
            .map(Some)
            .map_err(|e| Error::cache_corrupt(format!("{}: {e}", self.path.display())))
    }

    async fn write(&self, record: &CachedCredentialRecord) -> std::io::Result<()> {
        let contents = serde_json::to_vec_pretty(record)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.tmp_path();
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            let written = async {
                file.write_all(&contents).await?;
                file.sync_all().await
            }
            .await;
            if let Err(e) = written {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl CredentialStore for FileStore {
    async fn load(&self) -> Option<CachedCredentialRecord> {
        match self.read().await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("ignoring credentials cache: {e}");
                None
            }
        }
    }

    async fn save(&self, record: &CachedCredentialRecord) -> Result<()> {
        self.write(record)
            .await
            .map_err(|e| Error::store_write_failed(format!("{}: {e}", self.path.display())))?;
        tracing::debug!("saved credentials to {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::store_write_failed(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }
}
