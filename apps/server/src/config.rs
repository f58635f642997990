//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `PARLOR_BIND_PORT`
    pub bind_port: u16,

    /// Television IP address.
    /// Override: `PARLOR_TV_IP`
    pub tv_ip: Option<String>,

    /// Television MAC address for wake-on-LAN.
    /// Override: `PARLOR_TV_MAC`
    pub tv_mac: Option<String>,

    /// Television WebSocket control port.
    pub tv_port: u16,

    /// Television pairing key, if already known.
    /// Override: `PARLOR_TV_CLIENT_KEY`
    pub tv_client_key: Option<String>,

    /// Soundbar IP address.
    /// Override: `PARLOR_SONOS_IP`
    pub sonos_ip: Option<String>,

    /// Soundbar device identifier (`RINCON_xxx`).
    /// Override: `PARLOR_SONOS_RINCON`
    pub sonos_rincon: Option<String>,

    /// Smart plug IP address.
    /// Override: `PARLOR_PLUG_IP`
    pub plug_ip: Option<String>,

    /// Directory for persistent data (the television pairing key).
    /// Override: `PARLOR_DATA_DIR`
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 3000,
            tv_ip: None,
            tv_mac: None,
            tv_port: 3001,
            tv_client_key: None,
            sonos_ip: None,
            sonos_rincon: None,
            plug_ip: None,
            data_dir: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PARLOR_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }
        if let Ok(val) = std::env::var("PARLOR_TV_IP") {
            self.tv_ip = Some(val);
        }
        if let Ok(val) = std::env::var("PARLOR_TV_MAC") {
            self.tv_mac = Some(val);
        }
        if let Ok(val) = std::env::var("PARLOR_TV_CLIENT_KEY") {
            self.tv_client_key = Some(val);
        }
        if let Ok(val) = std::env::var("PARLOR_SONOS_IP") {
            self.sonos_ip = Some(val);
        }
        if let Ok(val) = std::env::var("PARLOR_SONOS_RINCON") {
            self.sonos_rincon = Some(val);
        }
        if let Ok(val) = std::env::var("PARLOR_PLUG_IP") {
            self.plug_ip = Some(val);
        }

        // Note: PARLOR_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to parlor-core's Config type.
    pub fn to_core_config(&self) -> parlor_core::Config {
        let mut config = parlor_core::Config {
            preferred_port: self.bind_port,
            ..Default::default()
        };
        config.tv.ip = self.tv_ip.clone();
        config.tv.mac = self.tv_mac.clone();
        config.tv.port = self.tv_port;
        config.tv.client_key = self.tv_client_key.clone();
        config.tv.key_file = self
            .data_dir
            .as_ref()
            .map(|dir| dir.join("tv-client-key"));
        config.sonos.ip = self.sonos_ip.clone();
        config.sonos.rincon = self.sonos_rincon.clone();
        config.plug.ip = self.plug_ip.clone();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_the_original_port() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_port, 3000);
        assert_eq!(config.tv_port, 3001);
    }

    #[test]
    fn yaml_round_trips_into_core_config() {
        let config: ServerConfig = serde_yaml::from_str(
            r#"
bind_port: 8080
tv_ip: 192.168.1.238
tv_mac: "44:27:45:06:d6:e2"
sonos_ip: 192.168.1.77
sonos_rincon: RINCON_5CAAFD0123456
plug_ip: 192.168.1.50
data_dir: /var/lib/parlor
"#,
        )
        .unwrap();

        let core = config.to_core_config();
        assert_eq!(core.preferred_port, 8080);
        assert_eq!(core.tv.ip.as_deref(), Some("192.168.1.238"));
        assert_eq!(core.sonos.rincon.as_deref(), Some("RINCON_5CAAFD0123456"));
        assert_eq!(
            core.tv.key_file.as_deref(),
            Some(Path::new("/var/lib/parlor/tv-client-key"))
        );
    }
}
