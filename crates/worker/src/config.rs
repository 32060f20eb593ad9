//! Worker configuration

use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    /// Minutes a DRAFT booking may hold its room with an unsettled deposit.
    pub deposit_ttl_minutes: i64,

    // Sweep schedules (6-field cron: sec min hour day month weekday)
    pub deposit_expiry_cron: String,
    pub monthly_billing_cron: String,
    pub room_occupancy_cron: String,
    pub room_release_cron: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,

            deposit_ttl_minutes: env::var("DEPOSIT_TTL_MINUTES")
                .unwrap_or_else(|_| "1440".to_string())
                .parse()
                .unwrap_or(1440),

            deposit_expiry_cron: env::var("DEPOSIT_EXPIRY_CRON")
                .unwrap_or_else(|_| "0 * * * * *".to_string()),
            monthly_billing_cron: env::var("MONTHLY_BILLING_CRON")
                .unwrap_or_else(|_| "0 0 1 * * *".to_string()),
            room_occupancy_cron: env::var("ROOM_OCCUPANCY_CRON")
                .unwrap_or_else(|_| "0 30 0 * * *".to_string()),
            room_release_cron: env::var("ROOM_RELEASE_CRON")
                .unwrap_or_else(|_| "0 45 0 * * *".to_string()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/roomledger_test");
        std::env::remove_var("DEPOSIT_TTL_MINUTES");
        let config = Config::from_env().unwrap();
        assert_eq!(config.deposit_ttl_minutes, 1440);
        assert_eq!(config.deposit_expiry_cron, "0 * * * * *");
    }
}
