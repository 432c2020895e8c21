use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scraper: ScraperConfig,
    pub monitor: MonitorConfig,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub max_redirects: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub check_interval_minutes: u64,
    pub warmup_delay_secs: u64,
    pub max_products_per_cycle: u32,
    pub sub_batch_size: usize,
    pub sub_batch_delay_ms: u64,
    pub force_check_delay_ms: u64,
    pub history_retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub webhook_url: Option<String>,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "PRICEWATCH_"
            .add_source(Environment::with_prefix("PRICEWATCH").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "Database max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message(
                "Database min_connections cannot exceed max_connections".into(),
            ));
        }

        if self.scraper.user_agent.trim().is_empty() {
            return Err(ConfigError::Message(
                "Scraper user_agent must not be empty".into(),
            ));
        }

        if self.scraper.retry_attempts == 0 {
            return Err(ConfigError::Message(
                "Scraper retry_attempts must be greater than 0".into(),
            ));
        }

        if self.scraper.batch_size == 0 {
            return Err(ConfigError::Message(
                "Scraper batch_size must be greater than 0".into(),
            ));
        }

        if self.monitor.check_interval_minutes == 0 {
            return Err(ConfigError::Message(
                "Monitor check_interval_minutes must be greater than 0".into(),
            ));
        }

        if self.monitor.sub_batch_size == 0 {
            return Err(ConfigError::Message(
                "Monitor sub_batch_size must be greater than 0".into(),
            ));
        }

        if self.monitor.max_products_per_cycle == 0 {
            return Err(ConfigError::Message(
                "Monitor max_products_per_cycle must be greater than 0".into(),
            ));
        }

        if let Some(webhook_url) = &self.notifications.discord.webhook_url {
            if !webhook_url.starts_with("https://discord.com/api/webhooks/") {
                return Err(ConfigError::Message(
                    "Invalid Discord webhook URL format".into(),
                ));
            }
        }

        Ok(())
    }
}
