use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// This struct aggregates the configuration every role shares: the network
/// identity of a node and the logging verbosity. Per-role specifics (which
/// port to listen on, which directory to register with) arrive as CLI
/// arguments and override these values.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Network settings: the host a node binds to and advertises, and the
    /// default port used when the CLI does not name one.
    pub server: ServerSettings,
    /// Logging configuration.
    pub log: LogSettings,
}

/// Network settings for a node.
///
/// The host doubles as the bind address and the address announced to the
/// directory and to peer brokers, so it must be reachable by them.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    /// The host address the node binds to and advertises.
    pub host: String,
    /// The default port, used when no port argument is given.
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    /// Maximum tracing level: error, warn, info, debug, or trace.
    pub level: String,
}

impl LogSettings {
    /// Maps the configured level name onto a tracing level. Anything
    /// unrecognized lands on `info` rather than failing startup.
    pub fn max_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub log: Option<PartialLogSettings>,
}

/// Partial server settings.
#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Partial logging settings.
#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 6666,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
