//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `LICHESS_BRIDGE` prefix and nested values use double underscores as separators.
//! Every value has a default, so an empty environment yields a usable config.
//!
//! # Example
//!
//! ```no_run
//! use lichess_board_bridge::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Talking to {}", config.lichess.base_url);
//! ```

mod error;
mod lichess;
mod logging;
mod workers;

pub use error::{ConfigError, ValidationError};
pub use lichess::LichessConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use workers::WorkersConfig;

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Lichess API endpoint and timeouts
    #[serde(default)]
    pub lichess: LichessConfig,

    /// Worker join timeouts and poll interval
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Log filter and output format
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `LICHESS_BRIDGE` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `LICHESS_BRIDGE__LICHESS__BASE_URL=...` -> `lichess.base_url = ...`
    /// - `LICHESS_BRIDGE__WORKERS__CALL_POLL_INTERVAL_MS=500` -> `workers.call_poll_interval_ms = 500`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("LICHESS_BRIDGE")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.lichess.validate()?;
        self.workers.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}
