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

//! Obtains user credentials through the OAuth2 [installed application] flow.
//!
//! The user opens a consent URL in a browser and grants access. Google then
//! hands an authorization code back to this process, either by redirecting
//! the browser to a short-lived local HTTP server, or by showing the code to
//! the user who pastes it in the console. The code is exchanged for an access
//! token and a refresh token.
//!
//! [installed application]: https://developers.google.com/identity/protocols/oauth2/native-app

use crate::Result;
use crate::constants::{
    CALLBACK_READ_TIMEOUT, CLIENT_ID_VAR, CLIENT_SECRET_VAR, CONSOLE_REDIRECT_URI,
    OAUTH2_AUTH_ENDPOINT, OAUTH2_TOKEN_ENDPOINT,
};
use crate::credentials::{Credentials, CredentialsKind, RefreshMaterial};
use crate::errors::Error;
use crate::user_account::{UserRefresh, post_token_request};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const MAX_REQUEST_HEAD: usize = 16 * 1024;

const SUCCESS_PAGE: &str = "<html><head><title>Authorization complete</title></head>\
<body><p>The authentication flow has completed. You may close this window.</p></body></html>";
const DENIED_PAGE: &str = "<html><head><title>Authorization denied</title></head>\
<body><p>Access was not granted. You may close this window.</p></body></html>";
const INVALID_PAGE: &str = "<html><head><title>Invalid request</title></head>\
<body><p>The authorization response could not be verified.</p></body></html>";

/// How the consent flow should run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuthorizeOptions {
    /// Receive the authorization code through a local HTTP server instead of
    /// asking the user to paste it.
    pub use_local_callback_server: bool,
    /// Ask the user to grant consent again, even if they did before.
    pub force_reauthorization: bool,
}

/// Runs a consent flow that requires a human.
#[async_trait::async_trait]
pub trait InteractiveAuthorizer: std::fmt::Debug + Send + Sync {
    /// Returns user credentials holding an access and a refresh token.
    ///
    /// Fails with [Error::is_user_cancelled] when the user declines, and with
    /// [Error::is_consent_flow_unavailable] when the flow cannot run at all.
    async fn authorize(
        &self,
        scopes: &[String],
        options: AuthorizeOptions,
    ) -> Result<Credentials>;
}

/// The user-facing half of the consent flow.
#[async_trait::async_trait]
pub trait ConsentPrompt: std::fmt::Debug + Send + Sync {
    /// Presents the consent URL to the user.
    async fn show_url(&self, url: &str) -> Result<()>;

    /// Reads the authorization code the user copied from the browser.
    ///
    /// The user may paste the whole URL the browser was redirected to, the
    /// flow extracts the `code` parameter from it. Only called when the flow
    /// runs without a local callback server.
    async fn read_code(&self) -> Result<String>;
}

/// A [ConsentPrompt] using the process' standard error and input.
#[derive(Clone, Debug, Default)]
pub struct ConsolePrompt;

#[async_trait::async_trait]
impl ConsentPrompt for ConsolePrompt {
    async fn show_url(&self, url: &str) -> Result<()> {
        let message = format!(
            "Please visit this URL to authorize this application:\n\n    {url}\n\n"
        );
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(message.as_bytes())
            .await
            .map_err(Error::consent_flow_unavailable)?;
        stderr.flush().await.map_err(Error::consent_flow_unavailable)
    }

    async fn read_code(&self) -> Result<String> {
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(b"Enter the authorization code, or the URL of the page it is on: ")
            .await
            .map_err(Error::consent_flow_unavailable)?;
        stderr.flush().await.map_err(Error::consent_flow_unavailable)?;
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(Error::consent_flow_unavailable)?;
        Ok(line.trim().to_string())
    }
}

/// An [InteractiveAuthorizer] for applications running on the user's machine.
///
/// The OAuth client comes from `BIGQUERY_AUTH_CLIENT_ID` and
/// `BIGQUERY_AUTH_CLIENT_SECRET` unless set with [InstalledAppFlow::with_client].
#[derive(Clone, Debug)]
pub struct InstalledAppFlow {
    client: Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    auth_uri: String,
    token_uri: String,
    console_redirect_uri: String,
    callback_read_timeout: Duration,
    prompt: Arc<dyn ConsentPrompt>,
}

impl InstalledAppFlow {
    pub fn new(client: Client) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            client,
            client_id: var(CLIENT_ID_VAR),
            client_secret: var(CLIENT_SECRET_VAR),
            auth_uri: OAUTH2_AUTH_ENDPOINT.to_string(),
            token_uri: OAUTH2_TOKEN_ENDPOINT.to_string(),
            console_redirect_uri: CONSOLE_REDIRECT_URI.to_string(),
            callback_read_timeout: CALLBACK_READ_TIMEOUT,
            prompt: Arc::new(ConsolePrompt),
        }
    }

    /// Sets the OAuth client used to request consent.
    pub fn with_client<I, S>(mut self, client_id: I, client_secret: S) -> Self
    where
        I: Into<String>,
        S: Into<String>,
    {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn with_auth_uri<S: Into<String>>(mut self, uri: S) -> Self {
        self.auth_uri = uri.into();
        self
    }

    pub fn with_token_uri<S: Into<String>>(mut self, uri: S) -> Self {
        self.token_uri = uri.into();
        self
    }

    /// Sets the redirect URI used when the user pastes the code in the
    /// console.
    ///
    /// The default is a loopback address nothing listens on: the browser
    /// shows an error page, and the user copies the code from its address
    /// bar. A hosted page that displays the code works too, if it is
    /// registered for the OAuth client.
    pub fn with_console_redirect_uri<S: Into<String>>(mut self, uri: S) -> Self {
        self.console_redirect_uri = uri.into();
        self
    }

    /// How long the local callback server waits for a connected browser to
    /// send its request before moving on to the next connection.
    pub fn with_callback_read_timeout(mut self, timeout: Duration) -> Self {
        self.callback_read_timeout = timeout;
        self
    }

    /// Replaces the default [ConsolePrompt].
    pub fn with_prompt<P: ConsentPrompt + 'static>(mut self, prompt: P) -> Self {
        self.prompt = Arc::new(prompt);
        self
    }

    fn consent_url(&self, request: &ConsentRequest<'_>) -> Result<String> {
        let scope = request.scopes.join(" ");
        let mut params = vec![
            ("response_type", "code"),
            ("client_id", request.client_id),
            ("redirect_uri", request.redirect_uri),
            ("scope", scope.as_str()),
            ("state", request.state),
            ("code_challenge", request.code_challenge),
            ("code_challenge_method", "S256"),
            ("access_type", "offline"),
        ];
        if request.force_reauthorization {
            params.push(("prompt", "consent"));
        }
        let url = url::Url::parse_with_params(&self.auth_uri, &params).map_err(|e| {
            Error::consent_flow_unavailable(format!("invalid authorization endpoint: {e}"))
        })?;
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        scopes: &[String],
        client_id: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<Credentials> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ];
        let mut response = post_token_request(&self.client, &self.token_uri, &form).await?;
        let Some(refresh_token) = response.refresh_token.take() else {
            return Err(Error::token_fetch(
                false,
                "the token endpoint did not return a refresh token",
            ));
        };
        let granted = response
            .scope
            .take()
            .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_else(|| scopes.to_vec());
        let refresh = UserRefresh {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            refresh_token,
            token_uri: self.token_uri.clone(),
        };
        Ok(Credentials::from_parts(
            CredentialsKind::AuthorizedUser,
            Some(response.into_token()),
            Some(RefreshMaterial::AuthorizedUser(refresh)),
            granted,
            None,
        ))
    }
}

#[async_trait::async_trait]
impl InteractiveAuthorizer for InstalledAppFlow {
    async fn authorize(
        &self,
        scopes: &[String],
        options: AuthorizeOptions,
    ) -> Result<Credentials> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(Error::consent_flow_unavailable(format!(
                "no OAuth client configured, set {CLIENT_ID_VAR} and {CLIENT_SECRET_VAR}"
            )));
        };
        let code_verifier = random_token();
        let code_challenge = pkce_challenge(&code_verifier);
        let state = random_token();

        let (code, redirect_uri) = if options.use_local_callback_server {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .map_err(Error::consent_flow_unavailable)?;
            let addr = listener
                .local_addr()
                .map_err(Error::consent_flow_unavailable)?;
            let redirect_uri = format!("http://{addr}/");
            let url = self.consent_url(&ConsentRequest {
                client_id,
                redirect_uri: &redirect_uri,
                scopes,
                state: &state,
                code_challenge: &code_challenge,
                force_reauthorization: options.force_reauthorization,
            })?;
            self.prompt.show_url(&url).await?;
            tracing::debug!("waiting for the authorization callback on {addr}");
            let code = accept_callback(&listener, &state, self.callback_read_timeout).await?;
            (code, redirect_uri)
        } else {
            let url = self.consent_url(&ConsentRequest {
                client_id,
                redirect_uri: &self.console_redirect_uri,
                scopes,
                state: &state,
                code_challenge: &code_challenge,
                force_reauthorization: options.force_reauthorization,
            })?;
            self.prompt.show_url(&url).await?;
            let input = self.prompt.read_code().await?;
            let Some(code) = pasted_code(&input) else {
                return Err(Error::user_cancelled("no authorization code was entered"));
            };
            (code, self.console_redirect_uri.clone())
        };

        let credentials = self
            .exchange_code(
                scopes,
                client_id,
                client_secret,
                &code,
                &redirect_uri,
                &code_verifier,
            )
            .await?;
        tracing::info!("obtained user credentials through the consent flow");
        Ok(credentials)
    }
}

struct ConsentRequest<'a> {
    client_id: &'a str,
    redirect_uri: &'a str,
    scopes: &'a [String],
    state: &'a str,
    code_challenge: &'a str,
    force_reauthorization: bool,
}

/// A random, URL-safe string used as PKCE verifier and as `state`.
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Extracts the authorization code from what the user pasted: either the code
/// itself, or the URL the browser was redirected to.
fn pasted_code(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let Ok(url) = url::Url::parse(input) else {
        return Some(input.to_string());
    };
    if !matches!(url.scheme(), "http" | "https") {
        return Some(input.to_string());
    }
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// The query parameters of a redirect to the local callback server.
#[derive(Debug, Default, PartialEq)]
struct Callback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl Callback {
    fn parse(request_head: &str) -> Option<Self> {
        let target = request_head.lines().next()?.split_whitespace().nth(1)?;
        let url = url::Url::parse(&format!("http://localhost{target}")).ok()?;
        let mut callback = Callback::default();
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "code" => callback.code = Some(v.into_owned()),
                "state" => callback.state = Some(v.into_owned()),
                "error" => callback.error = Some(v.into_owned()),
                _ => {}
            }
        }
        Some(callback)
    }
}

/// Serves the local callback until a redirect carrying a code or an error
/// arrives. Unrelated requests, such as `/favicon.ico`, get a 404. Connections
/// that send nothing within `read_timeout`, such as browser preconnects, are
/// dropped.
async fn accept_callback(
    listener: &TcpListener,
    expected_state: &str,
    read_timeout: Duration,
) -> Result<String> {
    loop {
        let (mut stream, peer) = listener
            .accept()
            .await
            .map_err(Error::consent_flow_unavailable)?;
        let head = match tokio::time::timeout(read_timeout, read_request_head(&mut stream)).await
        {
            Ok(Ok(h)) => h,
            Ok(Err(e)) => {
                tracing::debug!("ignoring unreadable callback request from {peer}: {e}");
                continue;
            }
            Err(_) => {
                tracing::debug!("ignoring idle callback connection from {peer}");
                continue;
            }
        };
        let callback = Callback::parse(&head).unwrap_or_default();
        if callback.code.is_none() && callback.error.is_none() {
            respond(&mut stream, "404 Not Found", "").await;
            continue;
        }
        if callback.state.as_deref() != Some(expected_state) {
            respond(&mut stream, "400 Bad Request", INVALID_PAGE).await;
            return Err(Error::consent_flow_unavailable(
                "the authorization callback has a mismatched state parameter",
            ));
        }
        if let Some(error) = callback.error {
            respond(&mut stream, "200 OK", DENIED_PAGE).await;
            if error == "access_denied" {
                return Err(Error::user_cancelled("the user denied access"));
            }
            return Err(Error::consent_flow_unavailable(format!(
                "the authorization server returned an error: {error}"
            )));
        }
        respond(&mut stream, "200 OK", SUCCESS_PAGE).await;
        if let Some(code) = callback.code {
            return Ok(code);
        }
    }
}

async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut head = Vec::new();
    let mut buffer = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") && head.len() < MAX_REQUEST_HEAD {
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buffer[..n]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        tracing::debug!("cannot answer the authorization callback: {e}");
    }
    let _ = stream.shutdown().await;
}
