use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Discord gateway configuration.
///
/// The token is sensitive; it is normally supplied through the environment
/// (`VAULTKEEPER_DISCORD__TOKEN`) or a git-ignored `config/local.toml`.
#[derive(Deserialize, Clone, Default)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: String,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Symmetric key for credential payloads (base64-encoded, 32 bytes).
///
/// The key must never appear in logs or in any outbound message.
#[derive(Deserialize, Clone, Default)]
pub struct CryptoConfig {
    #[serde(default)]
    pub key: String,
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Dialogue engine tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Seconds of inactivity before a session lapses.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    /// Interval of the background sweep that force-expires idle sessions.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Lifetime of secret-bearing private messages before auto-deletion.
    #[serde(default = "default_secret_ttl")]
    pub secret_ttl_secs: u64,
    /// Prefix that marks a top-level command.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

fn default_session_timeout() -> u64 {
    120
}

fn default_sweep_interval() -> u64 {
    15
}

fn default_secret_ttl() -> u64 {
    60
}

fn default_command_prefix() -> String {
    "!".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            secret_ttl_secs: default_secret_ttl(),
            command_prefix: default_command_prefix(),
        }
    }
}

/// Health endpoint configuration (deployment liveness checks).
#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_health_host")]
    pub host: String,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_health_host() -> String {
    "0.0.0.0".to_string()
}

fn default_health_port() -> u16 {
    8080
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: default_health_host(),
            port: default_health_port(),
        }
    }
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub discord: DiscordConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables.
    ///
    /// The result is passed explicitly to the components that need it; there
    /// is deliberately no global config singleton.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default config file
            .add_source(File::with_name("config/default").required(false))
            // Override with local config if present
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (prefix: VAULTKEEPER_)
            // e.g., VAULTKEEPER_DISCORD__TOKEN, VAULTKEEPER_CRYPTO__KEY
            .add_source(
                Environment::with_prefix("VAULTKEEPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.session_timeout_secs, 120);
        assert_eq!(engine.sweep_interval_secs, 15);
        assert_eq!(engine.secret_ttl_secs, 60);
        assert_eq!(engine.command_prefix, "!");
    }

    #[test]
    fn test_sensitive_fields_redacted_in_debug() {
        let discord = DiscordConfig {
            token: "super-secret-token".to_string(),
        };
        let rendered = format!("{:?}", discord);
        assert!(!rendered.contains("super-secret-token"));

        let crypto = CryptoConfig {
            key: "base64-key-material".to_string(),
        };
        let rendered = format!("{:?}", crypto);
        assert!(!rendered.contains("base64-key-material"));
    }
}
