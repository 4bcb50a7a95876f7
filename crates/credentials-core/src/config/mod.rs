//! Configuration for credentials-core
//!
//! Read once at process start and handed down explicitly. Nothing in the
//! crate reads configuration from ambient global state.

use std::path::Path;

use serde::Deserialize;

use crate::jwt::JwtConfig;
use crate::Result;

/// Prefix for environment overrides, e.g. `CREDENTIALS__JWT__SIGNING_KEY`
pub const ENV_PREFIX: &str = "CREDENTIALS";

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub database_url: String,
    pub api_bind_address: String,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub logging: LoggingSettings,
}

/// Password policy applied at registration, plus Argon2 cost parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_numbers: bool,
    pub require_special: bool,
    pub min_unique_chars: usize,
    pub argon2_memory_cost: u32,
    pub argon2_time_cost: u32,
    pub argon2_parallelism: u32,
}

/// Log output settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence when set
    pub level: String,
    pub json: bool,
}

impl CredentialsConfig {
    /// Load configuration from an optional file, then `CREDENTIALS__*` variables.
    ///
    /// The file format follows the extension (TOML, YAML or JSON). Missing
    /// keys fall back to the defaults below.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://credentials.db?mode=rwc".to_string(),
            api_bind_address: "127.0.0.1:8081".to_string(),
            jwt: JwtConfig::default(),
            password: PasswordConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 6,
            require_uppercase: true,
            require_lowercase: true,
            require_numbers: true,
            require_special: true,
            min_unique_chars: 1,
            argon2_memory_cost: 19456,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
