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

use std::time::Duration;

/// The scope requested by default for BigQuery access.
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

pub(crate) const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com";
pub(crate) const OAUTH2_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub(crate) const OAUTH2_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Default redirect URI for the copy/paste (console) flow. Nothing listens
/// there, the user copies the code from the browser's address bar.
pub(crate) const CONSOLE_REDIRECT_URI: &str = "http://localhost:1";
pub(crate) const DEFAULT_METADATA_HOST: &str = "169.254.169.254";

// Environment variables
pub(crate) const GOOGLE_APPLICATION_CREDENTIALS_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub(crate) const GOOGLE_CLOUD_PROJECT_VAR: &str = "GOOGLE_CLOUD_PROJECT";
pub(crate) const GCE_METADATA_HOST_VAR: &str = "GCE_METADATA_HOST";
pub(crate) const CACHE_FILE_VAR: &str = "BIGQUERY_AUTH_CACHE_FILE";
pub(crate) const CLIENT_ID_VAR: &str = "BIGQUERY_AUTH_CLIENT_ID";
pub(crate) const CLIENT_SECRET_VAR: &str = "BIGQUERY_AUTH_CLIENT_SECRET";
pub(crate) const BIGQUERY_ENDPOINT_VAR: &str = "BIGQUERY_AUTH_ENDPOINT";
pub(crate) const WINDOWS_APPDATA_VAR: &str = "APPDATA";
pub(crate) const UNIX_HOME_VAR: &str = "HOME";

pub(crate) const CACHE_DIRNAME: &str = "bigquery-auth";
pub(crate) const CACHE_FILENAME: &str = "credentials.json";
pub(crate) const GCLOUD_ADC_FILENAME: &str = "application_default_credentials.json";

/// Tokens this close to their expiration are treated as expired.
pub(crate) const CLOCK_SKEW_FUDGE: Duration = Duration::from_secs(10);
/// Lifetime requested for tokens minted from service account keys.
pub(crate) const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(3600);
/// How long to wait for the metadata server before concluding we are not on
/// Google Cloud.
pub(crate) const METADATA_PING_TIMEOUT: Duration = Duration::from_secs(3);
/// How long the local callback server waits for the request of a connected
/// browser.
pub(crate) const CALLBACK_READ_TIMEOUT: Duration = Duration::from_secs(5);
