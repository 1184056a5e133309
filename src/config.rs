use std::time::Duration;

use envconfig::Envconfig;
use thiserror::Error;

use crate::db::PoolSettings;

/// Upper bound for `ALERT_LEAD_DAYS`, about ten years.
pub const MAX_ALERT_LEAD_DAYS: i64 = 3650;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("ALERT_LEAD_DAYS must be between 0 and 3650, got {0}")]
    AlertLeadOutOfRange(i64),
}

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,

    #[envconfig(from = "DB_MAX_CONNECTIONS", default = "5")]
    pub db_max_connections: u32,

    #[envconfig(from = "DB_ACQUIRE_TIMEOUT_SECS", default = "30")]
    pub db_acquire_timeout_secs: u64,

    /// Six-field cron expression, seconds first.
    #[envconfig(from = "ALERT_CRON", default = "0 0 8 * * *")]
    pub alert_cron: String,

    /// Drugs expiring within this many days of a run are alerted.
    #[envconfig(from = "ALERT_LEAD_DAYS", default = "30")]
    pub alert_lead_days: i64,

    #[envconfig(from = "TELEGRAM_BOT_TOKEN")]
    pub telegram_bot_token: Option<String>,

    #[envconfig(from = "ALERT_CHAT_ID")]
    pub alert_chat_id: Option<i64>,
}

impl Config {
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.db_max_connections,
            acquire_timeout: Duration::from_secs(self.db_acquire_timeout_secs),
        }
    }

    /// How far ahead of a run a drug counts as expiring.
    ///
    /// Returns:
    /// - `Ok(chrono::Duration)` for `0..=MAX_ALERT_LEAD_DAYS` days.
    /// - `Err(ConfigError::AlertLeadOutOfRange)` otherwise.
    pub fn alert_lead(&self) -> Result<chrono::Duration, ConfigError> {
        if !(0..=MAX_ALERT_LEAD_DAYS).contains(&self.alert_lead_days) {
            return Err(ConfigError::AlertLeadOutOfRange(self.alert_lead_days));
        }
        Ok(chrono::Duration::days(self.alert_lead_days))
    }

    /// Bot token and chat id, when both are set.
    pub fn telegram(&self) -> Option<(&str, i64)> {
        match (&self.telegram_bot_token, self.alert_chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() => Some((token.as_str(), chat_id)),
            _ => None,
        }
    }
}
