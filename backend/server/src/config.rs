use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use clerk::{MICROS_PER_MILLI, StoreConfig};
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_CLIENT_ID: &str =
    "502024288218-4h8it97gqlkmc0ttnr9ju3hpke8gcatj.apps.googleusercontent.com";
pub const DEFAULT_ORIGINS: &str =
    "http://localhost:8080,http://localhost:3000,https://mineralsprings.github.io";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub token_ttl_ms: i64,
    pub token_entropy_bytes: usize,
    pub token_audit_capacity: usize,
    pub token_sweep_secs: u64,
    pub gapi_client_id: String,
    pub allowed_origins: Vec<String>,
    pub json_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self {
            port: try_load("RUST_PORT", "8080")?,
            token_ttl_ms: try_load("TOKEN_TTL_MS", "3600000")?,
            token_entropy_bytes: try_load("TOKEN_ENTROPY_BYTES", "42")?,
            token_audit_capacity: try_load("TOKEN_AUDIT_CAPACITY", "30")?,
            token_sweep_secs: try_load("TOKEN_SWEEP_SECS", "60")?,
            gapi_client_id: try_load("GAPI_CLIENT_ID", DEFAULT_CLIENT_ID)?,
            allowed_origins: parse_origins(&try_load::<String>("ALLOWED_ORIGINS", DEFAULT_ORIGINS)?),
            json_dir: try_load("JSON_DIR", "json")?,
        }
        .checked()
    }

    /// Refuses values the token store cannot work with.
    pub fn checked(self) -> Result<Self, ConfigError> {
        if self.token_entropy_bytes == 0 {
            return Err(invalid(
                "TOKEN_ENTROPY_BYTES",
                self.token_entropy_bytes,
                "must be at least 1",
            ));
        }

        if self.token_ttl_ms < 0 {
            return Err(invalid(
                "TOKEN_TTL_MS",
                self.token_ttl_ms,
                "must not be negative",
            ));
        }

        Ok(self)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            ttl_micros: self.token_ttl_ms.saturating_mul(MICROS_PER_MILLI),
            entropy_bytes: self.token_entropy_bytes,
            audit_capacity: self.token_audit_capacity,
            ..StoreConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            token_ttl_ms: 3_600_000,
            token_entropy_bytes: 42,
            token_audit_capacity: 30,
            token_sweep_secs: 60,
            gapi_client_id: DEFAULT_CLIENT_ID.to_string(),
            allowed_origins: parse_origins(DEFAULT_ORIGINS),
            json_dir: PathBuf::from("json"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        info!("{key} not set");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|_| {
        info!("{key} using default: {default}");
        default.to_string()
    });

    parse(key, &value)
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");

        ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        }
    })
}

fn invalid(key: &str, value: impl Display, reason: &str) -> ConfigError {
    warn!("Invalid {key} value: {reason}");

    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_origins(origins: &str) -> Vec<String> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
