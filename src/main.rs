//! Process entry point: logging, `.env`, configuration, then the bot.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crafty_relay::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env first so it can also carry RUST_LOG.
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("missing environment variables, check your .env file")?;
    info!(server_id = %config.crafty.server_id, "starting Discord bot");

    crafty_relay::run(config).await?;
    Ok(())
}
