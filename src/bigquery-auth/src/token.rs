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

//! Types and functions to work with auth [Tokens].
//!
//! [Tokens]: https://cloud.google.com/docs/authentication#token

use crate::constants::CLOCK_SKEW_FUDGE;
use chrono::{DateTime, Utc};

/// Represents an OAuth2 access token.
#[derive(Clone, PartialEq)]
pub struct Token {
    /// The actual token string.
    ///
    /// This is the value used in `Authorization:` header.
    pub token: String,

    /// The type of the token, almost always `"Bearer"`.
    pub token_type: String,

    /// The time at which the token expires.
    ///
    /// If `None`, the token does not expire. Unlike a monotonic instant this
    /// value is meaningful across processes, which is what allows tokens to be
    /// cached on disk.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Creates a bearer token that expires `expires_in` seconds from now.
    ///
    /// An `expires_in` beyond the range of [DateTime] means the token does
    /// not expire.
    pub(crate) fn bearer<S: Into<String>>(token: S, expires_in: Option<i64>) -> Self {
        let expires_at = expires_in
            .and_then(chrono::Duration::try_seconds)
            .and_then(|d| Utc::now().checked_add_signed(d));
        Self {
            token: token.into(),
            token_type: "Bearer".to_string(),
            expires_at,
        }
    }

    /// Returns `true` if the token expired, or will expire within a few
    /// seconds.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| {
            // Tokens about to expire are treated as already expired, this
            // absorbs small clock differences with the server.
            let skew = chrono::Duration::from_std(CLOCK_SKEW_FUDGE).unwrap_or_default();
            expires_at
                .checked_sub_signed(skew)
                .is_none_or(|t| t <= Utc::now())
        })
    }

    /// The value for an `Authorization:` header.
    pub(crate) fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("token", &"[censored]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
