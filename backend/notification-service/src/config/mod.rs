use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::services::maintenance::MAX_RETENTION_DAYS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub apns: ApnsSettings,
    pub stream: StreamConfig,
    pub dispatch: DispatchConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// None runs the service on the in-memory directory
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApnsSettings {
    /// None disables APNs delivery
    pub certificate_path: Option<String>,
    #[serde(skip_serializing)]
    pub certificate_passphrase: Option<String>,
    pub topic: String,
    pub is_production: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub keepalive_secs: u64,
    pub bus_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub batch_size: usize,
    pub push_relevance_floor: f64,
    pub bulk_pause_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub days: i64,
    pub interval_secs: u64,
}

impl StreamConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl DispatchConfig {
    pub fn bulk_pause(&self) -> Duration {
        Duration::from_millis(self.bulk_pause_ms)
    }
}

impl RetentionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(name, default)
        .parse()
        .with_context(|| format!("invalid value for {}", name))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Config {
            app: AppConfig {
                env: var_or("APP_ENV", "development"),
                port: parse_var("APP_PORT", "8000")?,
            },
            database: DatabaseConfig {
                url: optional_var("DATABASE_URL"),
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", "10")?,
            },
            apns: ApnsSettings {
                certificate_path: optional_var("APNS_CERTIFICATE_PATH"),
                certificate_passphrase: optional_var("APNS_CERTIFICATE_PASSPHRASE"),
                topic: var_or("APNS_TOPIC", "com.pulse.app"),
                is_production: parse_var("APNS_PRODUCTION", "false")?,
            },
            stream: StreamConfig {
                keepalive_secs: parse_var("STREAM_KEEPALIVE_SECS", "25")?,
                bus_capacity: parse_var("STREAM_BUS_CAPACITY", "1024")?,
            },
            dispatch: DispatchConfig {
                batch_size: parse_var("PUSH_BATCH_SIZE", "100")?,
                push_relevance_floor: parse_var("PUSH_RELEVANCE_FLOOR", "8.0")?,
                bulk_pause_ms: parse_var("BULK_PAUSE_MS", "100")?,
            },
            retention: RetentionConfig {
                days: parse_var("RETENTION_DAYS", "30")?,
                interval_secs: parse_var("MAINTENANCE_INTERVAL_SECS", "3600")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the stream or wipe the directory
    pub fn validate(&self) -> anyhow::Result<()> {
        let config = self;
        anyhow::ensure!(config.stream.keepalive_secs > 0, "STREAM_KEEPALIVE_SECS must be positive");
        anyhow::ensure!(config.stream.bus_capacity > 0, "STREAM_BUS_CAPACITY must be positive");
        anyhow::ensure!(config.dispatch.batch_size > 0, "PUSH_BATCH_SIZE must be positive");
        anyhow::ensure!(
            config.retention.interval_secs > 0,
            "MAINTENANCE_INTERVAL_SECS must be positive"
        );
        anyhow::ensure!(
            (1..=MAX_RETENTION_DAYS).contains(&config.retention.days),
            "RETENTION_DAYS must be between 1 and {}",
            MAX_RETENTION_DAYS
        );

        Ok(())
    }
}
