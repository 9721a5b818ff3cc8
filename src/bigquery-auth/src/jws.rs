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

use crate::constants::{CLOCK_SKEW_FUDGE, DEFAULT_TOKEN_TIMEOUT};
use crate::errors::BoxError;
use base64::prelude::{BASE64_URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rustls::sign::Signer;
use serde::Serialize;

/// JSON Web Signature claims for a service account token request.
#[derive(Debug, Serialize)]
pub(crate) struct JwsClaims<'a> {
    pub(crate) iss: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) scope: Option<&'a str>,
    pub(crate) aud: &'a str,
    pub(crate) exp: i64,
    pub(crate) iat: i64,
}

impl<'a> JwsClaims<'a> {
    /// Claims issued (slightly in the past) at `now`, valid for one hour.
    pub(crate) fn new(iss: &'a str, scope: Option<&'a str>, aud: &'a str, now: DateTime<Utc>) -> Self {
        let skew = Duration::from_std(CLOCK_SKEW_FUDGE).unwrap_or_default();
        let lifetime = Duration::from_std(DEFAULT_TOKEN_TIMEOUT).unwrap_or_default();
        let iat = now - skew;
        Self {
            iss,
            scope,
            aud,
            iat: iat.timestamp(),
            exp: (iat + lifetime).timestamp(),
        }
    }

    fn encode(&self) -> Result<String, BoxError> {
        if self.exp < self.iat {
            return Err(BoxError::from("exp must be later than iat"));
        }
        let json = serde_json::to_string(&self)?;
        Ok(BASE64_URL_SAFE_NO_PAD.encode(json.as_bytes()))
    }
}

/// The header that describes who, what, how a token was created.
#[derive(Debug, Serialize)]
pub(crate) struct JwsHeader<'a> {
    pub(crate) alg: &'a str,
    pub(crate) typ: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) kid: Option<&'a str>,
}

impl JwsHeader<'_> {
    fn encode(&self) -> Result<String, BoxError> {
        let json = serde_json::to_string(&self)?;
        Ok(BASE64_URL_SAFE_NO_PAD.encode(json.as_bytes()))
    }
}

/// Returns the compact serialization `header.claims.signature`.
pub(crate) fn sign(
    header: &JwsHeader<'_>,
    claims: &JwsClaims<'_>,
    signer: &dyn Signer,
) -> Result<String, BoxError> {
    let encoded = format!("{}.{}", header.encode()?, claims.encode()?);
    let sig = signer.sign(encoded.as_bytes())?;
    Ok(format!("{encoded}.{}", BASE64_URL_SAFE_NO_PAD.encode(sig)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn b64_decode_to_json(s: &str) -> serde_json::Value {
        let decoded = BASE64_URL_SAFE_NO_PAD.decode(s).unwrap();
        serde_json::from_slice(&decoded).unwrap()
    }

    #[test]
    fn claims() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let claims = JwsClaims::new("test-iss", Some("scope1 scope2"), "test-aud", now);
        assert_eq!(claims.iat, now.timestamp() - 10);
        assert_eq!(claims.exp, now.timestamp() - 10 + 3600);

        let encoded = claims.encode().unwrap();
        let json = b64_decode_to_json(&encoded);
        assert_eq!(json["iss"], "test-iss");
        assert_eq!(json["scope"], "scope1 scope2");
        assert_eq!(json["aud"], "test-aud");
    }

    #[test]
    fn claims_without_scope() {
        let claims = JwsClaims::new("test-iss", None, "test-aud", Utc::now());
        let json = b64_decode_to_json(&claims.encode().unwrap());
        assert!(json.get("scope").is_none(), "{json}");
    }

    #[test]
    fn claims_exp_before_iat() {
        let mut claims = JwsClaims::new("test-iss", None, "test-aud", Utc::now());
        claims.exp = claims.iat - 1;
        let e = claims.encode().unwrap_err();
        assert!(e.to_string().contains("exp must be later than iat"), "{e}");
    }

    #[test]
    fn header() {
        let header = JwsHeader {
            alg: "RS256",
            typ: "JWT",
            kid: Some("test-kid"),
        };
        let json = b64_decode_to_json(&header.encode().unwrap());
        assert_eq!(
            json,
            serde_json::json!({"alg": "RS256", "typ": "JWT", "kid": "test-kid"})
        );
    }
}
