// src/config.rs

//! Manages server configuration: loading from the process environment,
//! defaulting, and per-environment validation.

use anyhow::{Result, bail};
use serde::Deserialize;
use std::time::Duration;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    Dev,
    Test,
    Perf,
    Prod,
    Staging,
}

/// Which HTTP route groups a process exposes, so read and write paths can
/// scale independently against the same database.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceMode {
    #[default]
    All,
    Admin,
    Signals,
    SignalsRead,
    SignalsWrite,
}

impl ServiceMode {
    pub fn serves_admin(&self) -> bool {
        matches!(self, ServiceMode::All | ServiceMode::Admin)
    }

    pub fn serves_signals_read(&self) -> bool {
        matches!(
            self,
            ServiceMode::All | ServiceMode::Signals | ServiceMode::SignalsRead
        )
    }

    pub fn serves_signals_write(&self) -> bool {
        matches!(
            self,
            ServiceMode::All | ServiceMode::Signals | ServiceMode::SignalsWrite
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_environment")]
    pub environment: Environment,

    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Symmetric signing secret for access tokens. At least 32 characters in
    /// production.
    pub secret_key: String,

    pub database_url: String,
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(default = "default_write_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Comma-separated origin list. Empty means every origin (dev only).
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_max_signal_payload_size")]
    pub max_signal_payload_size: usize,
    #[serde(default = "default_max_api_request_size")]
    pub max_api_request_size: usize,

    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,

    #[serde(default)]
    pub service_mode: ServiceMode,
}

fn default_environment() -> Environment {
    Environment::Dev
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_database_max_connections() -> u32 {
    20
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_read_timeout() -> Duration {
    Duration::from_secs(15)
}
fn default_write_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_max_signal_payload_size() -> usize {
    5 * 1024 * 1024 // 5 MiB
}
fn default_max_api_request_size() -> usize {
    64 * 1024 // 64 KiB
}
fn default_rate_limit_rps() -> u32 {
    100
}
fn default_rate_limit_burst() -> u32 {
    20
}

impl Config {
    /// Loads configuration from the process environment (`ENVIRONMENT`,
    /// `HOST`, `PORT`, `SECRET_KEY`, `DATABASE_URL`, ...).
    pub fn from_env() -> Result<Self> {
        let raw = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_origins"),
            )
            .build()?;
        let config: Config = raw.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Production-grade deployments: secure cookies, TLS-enforced database.
    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Prod | Environment::Staging)
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret_key.is_empty() {
            bail!("SECRET_KEY must be set");
        }
        if self.is_production() {
            if self.secret_key.len() < 32 {
                bail!("SECRET_KEY must be at least 32 characters in {}", self.environment);
            }
            if !self.database_url.contains("sslmode=require")
                && !self.database_url.contains("sslmode=verify")
            {
                bail!("DATABASE_URL must enforce TLS in {}", self.environment);
            }
        }
        if self.rate_limit_rps == 0 {
            bail!("RATE_LIMIT_RPS must be greater than zero");
        }
        Ok(())
    }
}
