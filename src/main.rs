use std::sync::Arc;

use bot::Bot;
use config::{Config, Environment, File};

mod booking;
mod bot;
mod cfg;
mod commands;
mod handler;
mod scheduler;

/// Loads the configuration using the `config` crate
/// The file is `config` next to the binary unless `COURTBOT_CONFIG` says otherwise.
fn load_config() -> Result<cfg::Config, anyhow::Error> {
    let path = std::env::var("COURTBOT_CONFIG").unwrap_or_else(|_| "config".to_string());
    let path = shellexpand::full_with_context_no_errors(
        &path,
        || dirs::home_dir().and_then(|p| p.to_str().map(|s| s.to_string())),
        |f| std::env::var(f).ok(),
    )
    .to_string();

    let settings = Config::builder()
        .add_source(File::with_name(&path).required(false))
        .add_source(
            Environment::with_prefix("COURTBOT")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[tokio::main]
/// Entrypoint for the court scheduling discord bot.
/// Members announce sessions with `schedule`, sign up to slots by reacting
/// to the posted schedule, and record the court they booked with 🔖.
async fn main() -> Result<(), anyhow::Error> {
    // Initialize the logger
    pretty_env_logger::init();

    // load the config
    let config = Arc::from(load_config()?);

    let bot = Bot::new(config).await?;
    bot.start().await
}
