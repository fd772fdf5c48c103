use crate::core::codec::DEFAULT_MAX_PACKET_ALLOCATION;
use crate::reconnect::DelayTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Port used when an address carries none
pub const DEFAULT_PORT: u16 = 1359;

/// Default relay endpoint
pub const DEFAULT_RELAY_URL: &str = "wss://connect.airmessage.org";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Which transport carries the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Direct,
    Relay,
}

/// A dialable `host:port` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host` or `host:port`; the port defaults to [`DEFAULT_PORT`]
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ConfigError::ValidationError("address is empty".to_string()));
        }

        if let Some((host, port)) = address.rsplit_once(':') {
            let is_port = !port.is_empty()
                && port.len() <= 5
                && port.bytes().all(|b| b.is_ascii_digit());
            if is_port && !host.is_empty() && !host.contains(':') {
                let port = port.parse::<u16>().map_err(|_| {
                    ConfigError::ValidationError(format!("port out of range in '{}'", address))
                })?;
                return Ok(Self::new(host, port));
            }
        }

        Ok(Self::new(address, DEFAULT_PORT))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Direct TCP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    /// Primary address, `host[:port]`
    pub primary: String,
    /// Optional fallback address, `host[:port]`
    pub fallback: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            primary: String::new(),
            fallback: None,
            connect_timeout_ms: 10_000,
        }
    }
}

impl DirectConfig {
    pub fn primary_endpoint(&self) -> Result<Endpoint> {
        Endpoint::parse(&self.primary)
    }

    pub fn fallback_endpoint(&self) -> Result<Option<Endpoint>> {
        match self.fallback.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => Endpoint::parse(address).map(Some),
            _ => Ok(None),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Relay WebSocket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub url: String,
    pub installation_id: String,
    pub communications_version: u32,
    pub handshake_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.to_string(),
            installation_id: String::new(),
            communications_version: 1,
            handshake_timeout_ms: 8_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl RelayConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Reconnection timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub drop_delays_ms: Vec<u64>,
    pub passive_interval_ms: u64,
    pub passive_window_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            drop_delays_ms: vec![1_000, 10_000, 30_000],
            passive_interval_ms: 20 * 60 * 1_000,
            passive_window_ms: 5 * 60 * 1_000,
        }
    }
}

impl ReconnectConfig {
    pub fn delay_table(&self) -> DelayTable {
        DelayTable::from_millis(&self.drop_delays_ms)
    }

    pub fn passive_interval(&self) -> Duration {
        Duration::from_millis(self.passive_interval_ms)
    }

    pub fn passive_window(&self) -> Duration {
        Duration::from_millis(self.passive_window_ms)
    }
}

/// Complete connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub mode: TransportMode,
    pub direct: DirectConfig,
    pub relay: RelayConfig,
    /// Ceiling for a single inbound payload, in bytes
    pub max_packet_allocation: usize,
    /// Frame type sent by `ping()`
    pub keepalive_message_type: i32,
    pub reconnect: ReconnectConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Direct,
            direct: DirectConfig::default(),
            relay: RelayConfig::default(),
            max_packet_allocation: DEFAULT_MAX_PACKET_ALLOCATION,
            keepalive_message_type: -2,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Direct-mode configuration for `address`
    pub fn direct(address: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.direct.primary = address.into();
        config
    }

    /// Relay-mode configuration for `installation_id`
    pub fn relay(installation_id: impl Into<String>) -> Self {
        let mut config = Self {
            mode: TransportMode::Relay,
            ..Self::default()
        };
        config.relay.installation_id = installation_id.into();
        config
    }

    /// Load configuration from a YAML file
    ///
    /// Environment variables override the file:
    /// `BRIDGE_PRIMARY_HOST`, `BRIDGE_FALLBACK_HOST`, `BRIDGE_RELAY_URL`,
    /// `BRIDGE_INSTALLATION_ID`.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config = Self::from_yaml(&yaml_content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without applying overrides or validating
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(primary) = std::env::var("BRIDGE_PRIMARY_HOST") {
            info!("Overriding primary address from environment variable");
            self.direct.primary = primary;
        }
        if let Ok(fallback) = std::env::var("BRIDGE_FALLBACK_HOST") {
            info!("Overriding fallback address from environment variable");
            self.direct.fallback = Some(fallback);
        }
        if let Ok(url) = std::env::var("BRIDGE_RELAY_URL") {
            info!("Overriding relay URL from environment variable");
            self.relay.url = url;
        }
        if let Ok(installation_id) = std::env::var("BRIDGE_INSTALLATION_ID") {
            info!("Overriding installation ID from environment variable");
            self.relay.installation_id = installation_id;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            TransportMode::Direct => {
                if self.direct.primary.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "direct.primary must be set in direct mode".to_string(),
                    ));
                }
                self.direct.primary_endpoint()?;
                self.direct.fallback_endpoint()?;
                if self.direct.connect_timeout_ms == 0 {
                    return Err(ConfigError::ValidationError(
                        "direct.connect_timeout_ms must be greater than 0".to_string(),
                    ));
                }
            }
            TransportMode::Relay => {
                if self.relay.installation_id.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "relay.installation_id must be set in relay mode".to_string(),
                    ));
                }
                if !(self.relay.url.starts_with("ws://") || self.relay.url.starts_with("wss://")) {
                    return Err(ConfigError::ValidationError(format!(
                        "relay.url must use ws:// or wss:// (got '{}')",
                        self.relay.url
                    )));
                }
                if self.relay.handshake_timeout_ms == 0 || self.relay.connect_timeout_ms == 0 {
                    return Err(ConfigError::ValidationError(
                        "relay timeouts must be greater than 0".to_string(),
                    ));
                }
            }
        }

        if self.max_packet_allocation == 0 {
            return Err(ConfigError::ValidationError(
                "max_packet_allocation must be greater than 0".to_string(),
            ));
        }

        // Frame headers carry the length as a u32
        if u32::try_from(self.max_packet_allocation).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "max_packet_allocation must not exceed {} (got {})",
                u32::MAX,
                self.max_packet_allocation
            )));
        }

        if self.reconnect.drop_delays_ms.is_empty() {
            return Err(ConfigError::ValidationError(
                "reconnect.drop_delays_ms must not be empty".to_string(),
            ));
        }

        if self.reconnect.passive_window_ms >= self.reconnect.passive_interval_ms {
            return Err(ConfigError::ValidationError(
                "reconnect.passive_window_ms must be less than passive_interval_ms".to_string(),
            ));
        }

        Ok(())
    }
}
