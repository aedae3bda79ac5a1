//! Authenticated client for the Crafty Controller v2 API.
//!
//! [`CraftySession`] holds at most one bearer token. It logs in lazily on the
//! first call, and when the API answers 401 it logs in once more and retries
//! the call once. Every failure is turned into an [`ActionOutcome`] or `None`
//! here, so callers never see an error type.
//!
//! Logins are serialised through the token mutex. A call that hits a 401
//! only re-authenticates if the stored token is still the one it sent.

mod server;
mod transport;

pub use server::{version_from_executable, ServerInfo};
pub use transport::{
    ApiRequest, ApiResponse, Method, ReqwestTransport, Transport, TransportError,
    REQUEST_TIMEOUT,
};

#[cfg(test)]
pub(crate) use transport::scripted;

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::CraftyConfig;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CraftyError {
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{status} returned by {url}")]
    Status { status: u16, url: String },
    #[error("401 Unauthorized returned by {url} after logging in again")]
    Unauthorized { url: String },
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("login response carried no token: {0}")]
    MissingToken(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of a control action, already phrased for the end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    fn sent(verb: &str) -> Self {
        Self {
            success: true,
            message: format!("✅ {} command sent successfully!", describe_verb(verb)),
        }
    }

    fn failed(verb: &str, err: &CraftyError) -> Self {
        Self {
            success: false,
            message: format!("❌ Error sending {} command: {}", verb, err),
        }
    }
}

/// `restart_server` → `Restart server`.
fn describe_verb(verb: &str) -> String {
    let words = verb.replace('_', " ").to_lowercase();
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Login payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(default)]
    token: Option<String>,
}

impl LoginResponse {
    fn into_token(self) -> Option<String> {
        if self.status.as_deref() != Some("ok") {
            return None;
        }
        self.data?.token.filter(|t| !t.is_empty())
    }
}

// ---------------------------------------------------------------------------
// CraftySession
// ---------------------------------------------------------------------------

pub struct CraftySession {
    transport: Arc<dyn Transport>,
    base_url: String,
    username: String,
    password: String,
    server_id: String,
    token: Mutex<Option<String>>,
}

impl CraftySession {
    /// Build a session backed by a reqwest client.
    pub fn new(config: &CraftyConfig) -> Result<Self, CraftyError> {
        let transport = ReqwestTransport::new(config.accept_invalid_certs)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: &CraftyConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: config.base_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            server_id: config.server_id.clone(),
            token: Mutex::new(None),
        }
    }

    /// The token currently held, if any.
    pub async fn token(&self) -> Option<String> {
        self.token.lock().await.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, path)
    }

    // ------------------------------------------------------------------
    // Login
    // ------------------------------------------------------------------

    /// Log in with the stored credentials.
    ///
    /// Always overwrites the held token: the new one on success, nothing on
    /// failure. Returns whether a token is now held.
    pub async fn login(&self) -> bool {
        let mut slot = self.token.lock().await;
        self.login_into(&mut slot).await
    }

    async fn login_into(&self, slot: &mut Option<String>) -> bool {
        match self.request_token().await {
            Ok(token) => {
                info!("logged in to Crafty Controller");
                *slot = Some(token);
                true
            }
            Err(e) => {
                error!(error = %e, "Crafty Controller login failed");
                *slot = None;
                false
            }
        }
    }

    async fn request_token(&self) -> Result<String, CraftyError> {
        let url = self.url("auth/login");
        let body = json!({ "username": self.username, "password": self.password });
        let resp = self
            .transport
            .execute(ApiRequest::new(Method::Post, &url).json(body))
            .await?;

        if !resp.is_success() {
            return Err(CraftyError::Status {
                status: resp.status,
                url,
            });
        }

        let parsed: LoginResponse =
            serde_json::from_slice(&resp.body).map_err(|e| CraftyError::Decode(e.to_string()))?;
        parsed
            .into_token()
            .ok_or_else(|| CraftyError::MissingToken(String::from_utf8_lossy(&resp.body).into()))
    }

    /// The held token, logging in first when there is none.
    async fn current_token(&self) -> Option<String> {
        let mut slot = self.token.lock().await;
        if slot.is_none() {
            self.login_into(&mut slot).await;
        }
        slot.clone()
    }

    /// Replace a token the API just rejected.
    ///
    /// If another call already swapped it out, that replacement is used
    /// without logging in again.
    async fn refresh_token(&self, rejected: Option<&str>) -> Option<String> {
        let mut slot = self.token.lock().await;
        if slot.is_some() && slot.as_deref() != rejected {
            debug!("token was refreshed concurrently, reusing it");
            return slot.clone();
        }
        self.login_into(&mut slot).await;
        slot.clone()
    }

    // ------------------------------------------------------------------
    // Authenticated calls
    // ------------------------------------------------------------------

    /// Send an authenticated request, re-authenticating and retrying once
    /// on 401.
    async fn authorized(&self, method: Method, url: &str) -> Result<ApiResponse, CraftyError> {
        let token = self.current_token().await;
        let resp = self
            .transport
            .execute(ApiRequest::new(method, url).bearer(token.clone()))
            .await?;
        if resp.status != 401 {
            return check_status(resp, url);
        }

        warn!(url, "Crafty token rejected, logging in again");
        let token = self.refresh_token(token.as_deref()).await;
        let resp = self
            .transport
            .execute(ApiRequest::new(method, url).bearer(token))
            .await?;
        if resp.status == 401 {
            return Err(CraftyError::Unauthorized { url: url.to_string() });
        }
        check_status(resp, url)
    }

    /// Ask Crafty to run `verb` (`start_server`, `stop_server`,
    /// `restart_server`) on the configured server.
    ///
    /// The verb is forwarded as-is; Crafty rejects ones it does not know.
    pub async fn send_action(&self, verb: &str) -> ActionOutcome {
        let url = self.url(&format!("servers/{}/action/{}", self.server_id, verb));
        match self.authorized(Method::Post, &url).await {
            Ok(_) => {
                info!(verb, "Crafty action sent");
                ActionOutcome::sent(verb)
            }
            Err(e) => {
                error!(verb, error = %e, "Crafty action failed");
                ActionOutcome::failed(verb, &e)
            }
        }
    }

    /// Fetch the configured server's details, or `None` if anything fails.
    pub async fn get_server_info(&self) -> Option<serde_json::Value> {
        let url = self.url(&format!("servers/{}", self.server_id));
        let result = self.authorized(Method::Get, &url).await.and_then(|resp| {
            serde_json::from_slice::<serde_json::Value>(&resp.body)
                .map_err(|e| CraftyError::Decode(e.to_string()))
        });

        match result {
            Ok(body) => {
                info!(response = %body, "Crafty API response");
                Some(body)
            }
            Err(e) => {
                error!(error = %e, "failed to fetch server info from Crafty Controller");
                None
            }
        }
    }
}

fn check_status(resp: ApiResponse, url: &str) -> Result<ApiResponse, CraftyError> {
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(CraftyError::Status {
            status: resp.status,
            url: url.to_string(),
        })
    }
}

impl std::fmt::Debug for CraftySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CraftySession")
            .field("base_url", &self.base_url)
            .field("server_id", &self.server_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
