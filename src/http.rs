//! HTTP client for the Discord REST API.
//!
//! The relay answers interactions and registers its slash commands; nothing
//! else. Auth headers and error mapping live here. Interaction replies go
//! through [`InteractionReplies`] so handlers can be driven without Discord.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::types::*;

const BASE_URL: &str = "https://discord.com/api/v10";
const USER_AGENT: &str = concat!(
    "DiscordBot (",
    env!("CARGO_PKG_NAME"),
    ", ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

#[derive(Debug, Error)]
pub enum HttpError {
    /// Non-success status from Discord.
    #[error("Discord API error {status} on {route}: {body}")]
    Api {
        status: u16,
        body: String,
        route: String,
    },
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Cheap to clone; reqwest pools connections internally.
#[derive(Clone)]
pub struct DiscordHttp {
    client: reqwest::Client,
    token: String,
}

impl DiscordHttp {
    pub fn new(token: impl Into<String>) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            token: token.into(),
        })
    }

    /// Send a request to `{BASE_URL}/{path}` and return the raw body.
    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        route: &str,
        body: Option<&B>,
    ) -> Result<Vec<u8>, HttpError> {
        let url = format!("{}/{}", BASE_URL, path.trim_start_matches('/'));
        let mut req = self
            .client
            .request(method, &url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token));
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        debug!(route, status = status.as_u16(), "discord request finished");

        if status.is_success() {
            return Ok(bytes.to_vec());
        }
        Err(api_error(status, &bytes, route))
    }

    async fn request_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        route: &str,
        body: Option<&B>,
    ) -> Result<T, HttpError> {
        let bytes = self.request(method, path, route, body).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Register (or overwrite) the application's global slash commands.
    pub async fn bulk_overwrite_global_commands(
        &self,
        application_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        let path = format!("applications/{}/commands", application_id);
        let route = format!("PUT /applications/{}/commands", application_id);
        self.request_json(Method::PUT, &path, &route, Some(commands))
            .await
    }
}

/// The interaction endpoints a handler replies through.
#[async_trait]
pub trait InteractionReplies: Send + Sync {
    /// Initial callback; must land within three seconds of the interaction.
    async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<(), HttpError>;

    /// Replace the content of a deferred (or already sent) reply.
    async fn edit_original_interaction_response(
        &self,
        application_id: &str,
        interaction_token: &str,
        data: &InteractionCallbackData,
    ) -> Result<(), HttpError>;

    async fn delete_original_interaction_response(
        &self,
        application_id: &str,
        interaction_token: &str,
    ) -> Result<(), HttpError>;

    /// Extra message on the interaction. Unlike an edit, it can set its own
    /// ephemeral flag.
    async fn create_followup_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        data: &InteractionCallbackData,
    ) -> Result<(), HttpError>;
}

#[async_trait]
impl InteractionReplies for DiscordHttp {
    async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<(), HttpError> {
        // 204 No Content on success.
        let path = format!("interactions/{}/{}/callback", interaction_id, interaction_token);
        self.request(Method::POST, &path, "POST /interactions/callback", Some(response))
            .await?;
        Ok(())
    }

    async fn edit_original_interaction_response(
        &self,
        application_id: &str,
        interaction_token: &str,
        data: &InteractionCallbackData,
    ) -> Result<(), HttpError> {
        let path = format!("webhooks/{}/{}/messages/@original", application_id, interaction_token);
        self.request(
            Method::PATCH,
            &path,
            "PATCH /webhooks/interaction/messages/@original",
            Some(data),
        )
        .await?;
        Ok(())
    }

    async fn delete_original_interaction_response(
        &self,
        application_id: &str,
        interaction_token: &str,
    ) -> Result<(), HttpError> {
        let path = format!("webhooks/{}/{}/messages/@original", application_id, interaction_token);
        self.request::<()>(
            Method::DELETE,
            &path,
            "DELETE /webhooks/interaction/messages/@original",
            None,
        )
        .await?;
        Ok(())
    }

    async fn create_followup_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        data: &InteractionCallbackData,
    ) -> Result<(), HttpError> {
        let path = format!("webhooks/{}/{}", application_id, interaction_token);
        self.request(Method::POST, &path, "POST /webhooks/interaction", Some(data))
            .await?;
        Ok(())
    }
}

fn api_error(status: StatusCode, body: &[u8], route: &str) -> HttpError {
    HttpError::Api {
        status: status.as_u16(),
        body: String::from_utf8_lossy(body).into_owned(),
        route: route.to_string(),
    }
}

impl std::fmt::Debug for DiscordHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttp")
            .field("token", &"<redacted>")
            .finish()
    }
}
