//! CLI utilities for binaries
//!
//! Handles configuration loading, environment variables and logging setup
//! for all binary executables.

use anyhow::Context;
use bridgelink::BridgeConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Type of configuration to load
#[derive(Debug, Clone)]
pub enum ConfigType {
    /// Bridge connection configuration (config/bridge.yaml)
    Bridge,
    /// Custom path
    Custom(String),
}

impl ConfigType {
    /// Get the default path for this config type
    pub fn default_path(&self) -> &str {
        match self {
            ConfigType::Bridge => "config/bridge.yaml",
            ConfigType::Custom(path) => path,
        }
    }

    /// Get the environment variable name for this config type
    pub fn env_var_name(&self) -> &str {
        match self {
            ConfigType::Bridge => "BRIDGE_CONFIG_PATH",
            ConfigType::Custom(_) => "BRIDGE_CONFIG_PATH",
        }
    }
}

/// Load configuration path from environment or use default
///
/// Custom paths always win over the environment.
///
/// # Examples
/// ```
/// use bridgelink_tools::bin_common::{load_config_from_env, ConfigType};
///
/// let path = load_config_from_env(ConfigType::Custom("probe.yaml".to_string()));
/// assert_eq!(path.to_str(), Some("probe.yaml"));
/// ```
pub fn load_config_from_env(config_type: ConfigType) -> PathBuf {
    if let ConfigType::Custom(path) = &config_type {
        return PathBuf::from(path);
    }
    std::env::var(config_type.env_var_name())
        .unwrap_or_else(|_| config_type.default_path().to_string())
        .into()
}

/// Resolve, read and validate the bridge configuration
///
/// Loads `.env` first so its variables can both point at the file and
/// override individual settings.
pub fn load_bridge_config(config_type: ConfigType) -> anyhow::Result<BridgeConfig> {
    dotenv::dotenv().ok();
    let path = load_config_from_env(config_type);
    BridgeConfig::load(&path)
        .with_context(|| format!("failed to load bridge config from {}", path.display()))
}

/// Install the global tracing subscriber
///
/// Honors `RUST_LOG`; defaults to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .init();
}

/// Parse command line arguments for a binary
///
/// Returns a vector of arguments (excluding the program name)
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_type_paths() {
        assert_eq!(ConfigType::Bridge.default_path(), "config/bridge.yaml");

        let custom = ConfigType::Custom("custom/path.yaml".to_string());
        assert_eq!(custom.default_path(), "custom/path.yaml");
    }

    #[test]
    fn test_config_type_env_vars() {
        assert_eq!(ConfigType::Bridge.env_var_name(), "BRIDGE_CONFIG_PATH");
    }
}
