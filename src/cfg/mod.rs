use std::time::Duration;

use anyhow::{ensure, Context};
use serde::Deserialize;

fn default_prefix() -> String {
    "$".to_string()
}

#[derive(Deserialize, Debug, Clone, Default)]
/// Configuration regarding the discord bot configuration
/// this includes the token and the prefix of text commands.
pub struct DiscordConfig {
    pub token: String,
    /// Prefix of text commands. Mentioning the bot works too.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
/// How sessions are laid out and where they are posted.
pub struct ScheduleConfig {
    /// Skill levels; a new session gets one slot per level.
    pub levels: Vec<String>,
    /// Schedules created from `#team-chat` are posted in `#team-<suffix>`,
    /// and reactions are only tracked in channels named that way.
    pub channel_suffix: String,
    /// How long each booking question waits for an answer,
    /// in the humantime format (`30s`, `1m`...).
    pub booking_timeout: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            levels: vec![
                "Rookie / Amateur".to_string(),
                "Intermediate / Advanced".to_string(),
            ],
            channel_suffix: "schedule".to_string(),
            booking_timeout: "30s".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn booking_timeout(&self) -> Result<Duration, anyhow::Error> {
        humantime::parse_duration(&self.booking_timeout)
            .context("invalid format in the booking_timeout duration")
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        ensure!(!self.levels.is_empty(), "at least one level must be configured");
        ensure!(
            self.levels.iter().all(|level| !level.contains('\n')),
            "levels must fit on a single line"
        );
        ensure!(!self.channel_suffix.is_empty(), "the channel suffix can't be empty");
        self.booking_timeout()?;
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
/// Main configuration structure
/// This does not have any particular meaning; It just contains
/// all the configuration blocks.
pub struct Config {
    pub discord: DiscordConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}
