//! Layered configuration: built-in defaults, an optional config file, then
//! `USENET_` prefixed environment variables (loaded from `.env` via `dotenvy`
//! if present), using the `config` crate the teacher declared but never
//! wired up into a real loader.

use std::time::Duration;

use config::{Config as RawConfig, Environment, File};
use serde::Deserialize;

use crate::error::StreamerError;

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_tls")]
    pub tls: bool,
    pub username: String,
    pub password: String,
    pub max_connections: usize,
    /// Ascending priority: lower tries first. Also the deterministic
    /// validator tie-break (see DESIGN.md Open Question decisions).
    #[serde(default)]
    pub priority: u32,
}

fn default_tls() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub providers: Vec<ProviderConfig>,

    #[serde(default = "default_validation_sample_size")]
    pub validation_sample_size: usize,

    #[serde(default = "default_max_concurrent_validations")]
    pub max_concurrent_validations: usize,

    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_validation_sample_size() -> usize {
    12
}

fn default_max_concurrent_validations() -> usize {
    5
}

fn default_session_ttl_secs() -> u64 {
    30 * 60
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Load defaults, an optional `config.toml` (or path from `--config`),
    /// then environment overrides prefixed `USENET_` (double-underscore
    /// nested, e.g. `USENET_PROVIDERS__0__HOST`).
    pub fn load(config_path: Option<&str>) -> Result<Self, StreamerError> {
        let _ = dotenvy::dotenv();

        let mut builder = RawConfig::builder()
            .set_default("validation_sample_size", default_validation_sample_size() as i64)?
            .set_default(
                "max_concurrent_validations",
                default_max_concurrent_validations() as i64,
            )?
            .set_default("session_ttl_secs", default_session_ttl_secs() as i64)?
            .set_default("bind_addr", default_bind_addr())?
            .set_default("log_level", default_log_level())?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(false));
        } else {
            builder = builder.add_source(File::with_name("config").required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("USENET")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder.build()?;
        let config: AppConfig = raw.try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_any_source() {
        // SAFETY: tests run single-threaded within this module's lock-free env var usage.
        unsafe {
            std::env::set_var("USENET_PROVIDERS__0__NAME", "primary");
            std::env::set_var("USENET_PROVIDERS__0__HOST", "news.example.com");
            std::env::set_var("USENET_PROVIDERS__0__PORT", "563");
            std::env::set_var("USENET_PROVIDERS__0__USERNAME", "u");
            std::env::set_var("USENET_PROVIDERS__0__PASSWORD", "p");
            std::env::set_var("USENET_PROVIDERS__0__MAX_CONNECTIONS", "10");
        }

        let config = AppConfig::load(Some("__nonexistent__")).expect("should load from env");
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.validation_sample_size, 12);
        assert_eq!(config.session_ttl(), Duration::from_secs(1800));
    }
}
