//! Configuration Module
//!
//! Handles gateway configuration loading, validation, and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP API gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// WhatsApp-specific options
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

/// HTTP API gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway port (default: 3000)
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default: "0.0.0.0")
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Directory served at `/` (the pairing form). Skipped when missing.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("./public")
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            public_dir: default_public_dir(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Root directory for per-session credential state
    #[serde(default = "default_sessions_root")]
    pub root: PathBuf,

    /// Maximum concurrently tracked sessions (default: 50).
    /// Every tracked session counts, pending ones included.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Consecutive reconnect attempts before a session is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between reconnect attempts, in seconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Delay before requesting a pairing code, in seconds. The transport
    /// needs time to reach a stable pre-registration state first.
    #[serde(default = "default_pairing_delay")]
    pub pairing_delay_secs: u64,

    /// How long `/api/pair` waits for a code, in seconds
    #[serde(default = "default_pairing_timeout")]
    pub pairing_timeout_secs: u64,

    /// Interval between stale-directory sweeps, in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Age threshold for the stale sweep, in hours
    #[serde(default = "default_stale_age")]
    pub stale_age_hours: u64,
}

fn default_sessions_root() -> PathBuf {
    PathBuf::from("./sessions")
}

fn default_max_sessions() -> usize {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_pairing_delay() -> u64 {
    3
}

fn default_pairing_timeout() -> u64 {
    15
}

fn default_cleanup_interval() -> u64 {
    60 * 60
}

fn default_stale_age() -> u64 {
    24
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            root: default_sessions_root(),
            max_sessions: default_max_sessions(),
            max_retries: default_max_retries(),
            reconnect_delay_secs: default_reconnect_delay(),
            pairing_delay_secs: default_pairing_delay(),
            pairing_timeout_secs: default_pairing_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            stale_age_hours: default_stale_age(),
        }
    }
}

impl SessionsConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn pairing_delay(&self) -> Duration {
        Duration::from_secs(self.pairing_delay_secs)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn stale_age(&self) -> Duration {
        Duration::from_secs(self.stale_age_hours * 60 * 60)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// WhatsApp-specific options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Newsletter JIDs every freshly connected session follows
    #[serde(default)]
    pub newsletters: Vec<String>,

    /// Send a confirmation message to the linked number once connected
    #[serde(default = "default_connect_notice")]
    pub connect_notice: bool,
}

fn default_connect_notice() -> bool {
    true
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            newsletters: Vec::new(),
            connect_notice: default_connect_notice(),
        }
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Priority (lowest to highest):
    /// 1. Default values
    /// 2. System config: ~/.config/wagate/config.toml
    /// 3. Local config: ./wagate.toml
    /// 4. Environment variables
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_config_path) = Self::system_config_path()
            && system_config_path.exists()
        {
            tracing::debug!("loading system config from {:?}", system_config_path);
            config = Self::from_file(&system_config_path)?;
        }

        let local_config_path = Self::local_config_path();
        if local_config_path.exists() {
            tracing::debug!("loading local config from {:?}", local_config_path);
            config = Self::from_file(&local_config_path)?;
        }

        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply environment
    /// variable overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {:?}", path);
        }
        let mut config = Self::from_file(path)?;
        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Get the system config path: ~/.config/wagate/config.toml
    fn system_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wagate").join("config.toml"))
    }

    /// Get the local config path: ./wagate.toml
    fn local_config_path() -> PathBuf {
        PathBuf::from("./wagate.toml")
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file: {path:?}"))
    }

    fn apply_env_overrides(config: &mut Self) -> Result<()> {
        // PORT is what platform hosts inject; WAGATE_* wins when both are set.
        if let Ok(port) = std::env::var("PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            config.gateway.port = port;
        }
        if let Ok(port) = std::env::var("WAGATE_PORT") {
            config.gateway.port = port
                .parse()
                .with_context(|| format!("invalid WAGATE_PORT: {port}"))?;
        }
        if let Ok(bind) = std::env::var("WAGATE_BIND") {
            config.gateway.bind = bind;
        }
        if let Ok(root) = std::env::var("WAGATE_SESSIONS_ROOT") {
            config.sessions.root = PathBuf::from(root);
        }
        if let Ok(max) = std::env::var("WAGATE_MAX_SESSIONS") {
            config.sessions.max_sessions = max
                .parse()
                .with_context(|| format!("invalid WAGATE_MAX_SESSIONS: {max}"))?;
        }
        Ok(())
    }
}

/// Per-user data directory: `~/.local/share/wagate` (platform equivalent).
pub fn wagate_home() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wagate")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.sessions.max_sessions, 50);
        assert_eq!(config.sessions.max_retries, 3);
        assert_eq!(config.sessions.reconnect_delay_secs, 5);
        assert_eq!(config.sessions.pairing_delay_secs, 3);
        assert_eq!(config.sessions.pairing_timeout_secs, 15);
        assert!(config.whatsapp.connect_notice);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            port = 8080

            [sessions]
            max_sessions = 5
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.bind, "0.0.0.0");
        assert_eq!(config.sessions.max_sessions, 5);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.sessions.max_retries, 3);
    }

    #[test]
    fn test_duration_accessors() {
        let sessions = SessionsConfig::default();
        assert_eq!(sessions.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(sessions.pairing_delay(), Duration::from_secs(3));
        assert_eq!(sessions.stale_age(), Duration::from_secs(24 * 60 * 60));
    }
}
