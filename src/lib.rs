//! Discord relay for a Crafty Controller game server.
//!
//! `/serverinfo` shows a status panel with Start / Stop / Restart buttons;
//! the buttons forward to the Crafty API through [`crafty::CraftySession`].

pub mod bot;
pub mod config;
pub mod crafty;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod http;
pub mod types;

use std::sync::Arc;

use bot::{Bot, BotError};
use config::Config;

/// Build the bot from `config` and run it until the gateway gives up.
pub async fn run(config: Config) -> Result<(), BotError> {
    let bot = Arc::new(Bot::new(config)?);
    bot.run().await;
    Ok(())
}
