//! Bot service: shared state and the gateway event loop.
//!
//! One [`Bot`] lives for the whole process. It owns the Crafty session, so
//! every handler sees the same token, and each interaction runs on its own
//! task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, trace, warn};

use crate::config::Config;
use crate::crafty::{CraftyError, CraftySession};
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig, INTENTS_GUILDS};
use crate::handlers;
use crate::http::{DiscordHttp, HttpError};

#[derive(Debug, Error)]
pub enum BotError {
    #[error("failed to set up Crafty client: {0}")]
    Crafty(#[from] CraftyError),
    #[error("failed to set up Discord client: {0}")]
    Discord(#[from] HttpError),
}

#[derive(Debug)]
pub struct Bot {
    pub config: Config,
    pub crafty: CraftySession,
    pub http: DiscordHttp,
    commands_registered: AtomicBool,
}

impl Bot {
    pub fn new(config: Config) -> Result<Self, BotError> {
        let crafty = CraftySession::new(&config.crafty)?;
        let http = DiscordHttp::new(&config.bot_token)?;
        Ok(Self::with_clients(config, crafty, http))
    }

    pub fn with_clients(config: Config, crafty: CraftySession, http: DiscordHttp) -> Self {
        Self {
            config,
            crafty,
            http,
            commands_registered: AtomicBool::new(false),
        }
    }

    /// Returns `true` for exactly one caller until released.
    pub fn claim_command_registration(&self) -> bool {
        !self.commands_registered.swap(true, Ordering::SeqCst)
    }

    pub fn release_command_registration(&self) {
        self.commands_registered.store(false, Ordering::SeqCst);
    }

    /// Connect to the gateway and handle events until the stream ends.
    pub async fn run(self: Arc<Self>) {
        let mut gw = gateway::connect(GatewayConfig {
            token: self.config.bot_token.clone(),
            intents: INTENTS_GUILDS,
        });
        info!("gateway started, entering event loop");

        while let Some(event) = gw.events.recv().await {
            match event {
                GatewayEvent::Ready(ready) => {
                    let bot = Arc::clone(&self);
                    tokio::spawn(async move { handlers::on_ready(&bot, ready).await });
                }

                GatewayEvent::InteractionCreate(interaction) => {
                    let bot = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = handlers::on_interaction(&bot, &interaction).await {
                            error!(error = %e, interaction_id = %interaction.id, "failed to handle interaction");
                        }
                    });
                }

                GatewayEvent::Unknown {
                    event_name: Some(ref name),
                    ..
                } => trace!(event = %name, "unhandled gateway event"),

                _ => {}
            }
        }

        match gw.driver.await {
            Ok(()) => warn!("gateway driver stopped, bot shutting down"),
            Err(e) if e.is_panic() => error!(error = %e, "gateway driver panicked, bot shutting down"),
            Err(e) => warn!(error = %e, "gateway driver was cancelled, bot shutting down"),
        }
    }
}
