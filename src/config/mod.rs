//! The `config` module handles the application's configuration management.
//!
//! It defines the structure of the application settings, provides default
//! values, and implements the logic for loading configuration from files
//! and environment variables. CLI arguments override whatever is loaded
//! here for the values they name (ports, directory address, bootstrap
//! list).
//!
//! This module uses the `config` crate for flexible and layered configuration.

pub mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::Settings;

pub use settings::{LogSettings, ServerSettings};

/// Loads application settings from file, environment, and defaults.
///
/// This function reads configuration values from:
/// 1. An optional `config/default` file (TOML/YAML/JSON).
/// 2. Environment variables with `_` separators (e.g., `SERVER_PORT`).
///
/// Missing fields are filled using default values defined in `Settings::default()`.
///
/// # Errors
///
/// Returns an error if the config file cannot be parsed or deserialized.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        log: LogSettings {
            level: partial
                .log
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.log.level),
        },
    })
}
