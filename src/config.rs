//! Environment-sourced configuration.
//!
//! Every required value is validated once at startup; a missing one stops
//! the process before any connection is attempted.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Variable names
// ---------------------------------------------------------------------------

pub const API_BASE_URL: &str = "CRAFTY_API_BASE_URL";
pub const USERNAME: &str = "CRAFTY_USERNAME";
pub const PASSWORD: &str = "CRAFTY_PASSWORD";
pub const BOT_TOKEN: &str = "BOT_TOKEN";
pub const SERVER_ID: &str = "CRAFTY_SERVER_ID";
pub const SERVER_URL: &str = "CRAFTY_SERVER_URL";
pub const SERVER_TYPE: &str = "CRAFTY_SERVER_TYPE";
pub const ACCEPT_INVALID_CERTS: &str = "CRAFTY_ACCEPT_INVALID_CERTS";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Connection details for the Crafty API.
#[derive(Clone)]
pub struct CraftyConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub server_id: String,
    /// Skip TLS certificate validation. Off unless explicitly enabled.
    pub accept_invalid_certs: bool,
}

/// Labels shown on the status panel that the API does not report.
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub server_url: String,
    pub server_type: String,
}

#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    pub crafty: CraftyConfig,
    pub display: DisplayConfig,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let accept_invalid_certs = match lookup(ACCEPT_INVALID_CERTS) {
            Some(value) => parse_flag(ACCEPT_INVALID_CERTS, &value)?,
            None => false,
        };

        Ok(Self {
            bot_token: required(BOT_TOKEN)?,
            crafty: CraftyConfig {
                base_url: required(API_BASE_URL)?.trim_end_matches('/').to_string(),
                username: required(USERNAME)?,
                password: required(PASSWORD)?,
                server_id: required(SERVER_ID)?,
                accept_invalid_certs,
            },
            display: DisplayConfig {
                server_url: required(SERVER_URL)?,
                server_type: required(SERVER_TYPE)?,
            },
        })
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
        }),
    }
}

impl std::fmt::Debug for CraftyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CraftyConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server_id", &self.server_id)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &"<redacted>")
            .field("crafty", &self.crafty)
            .field("display", &self.display)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
