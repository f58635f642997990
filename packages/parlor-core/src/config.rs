//! Core configuration types.
//!
//! Addresses and identifiers normally come from the discovery collaborator at
//! runtime; the configuration here is the static fallback and the source of
//! the timing policy. All fields have sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the Parlor server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Preferred port for the HTTP/SSE server.
    pub preferred_port: u16,

    /// Television connection settings.
    pub tv: TvConfig,

    /// Soundbar connection settings.
    pub sonos: SonosConfig,

    /// Smart plug connection settings.
    pub plug: PlugConfig,

    /// Timing policy for connects, probes, and settle delays.
    pub timings: Timings,
}

/// Television connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TvConfig {
    /// IP address of the television, if statically configured.
    pub ip: Option<String>,

    /// MAC address for wake-on-LAN, colon- or dash-separated.
    pub mac: Option<String>,

    /// Port of the WebSocket remote-control endpoint.
    pub port: u16,

    /// Use TLS for the control connection. Recent firmware only exposes the
    /// secure endpoint (port 3001); older models speak plain `ws://` on
    /// port 3000.
    pub secure: bool,

    /// Pairing key issued by the television on first registration.
    /// When absent, the first connection triggers an on-screen pairing
    /// prompt and the issued key is stored at [`TvConfig::key_file`].
    pub client_key: Option<String>,

    /// Where to persist the pairing key across restarts.
    pub key_file: Option<PathBuf>,
}

impl Default for TvConfig {
    fn default() -> Self {
        Self {
            ip: None,
            mac: None,
            port: 3001,
            secure: true,
            client_key: None,
            key_file: None,
        }
    }
}

/// Soundbar connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SonosConfig {
    /// IP address of the soundbar, if statically configured.
    pub ip: Option<String>,

    /// Sonos device identifier (`RINCON_xxx`), required for switching the
    /// soundbar to its TV input.
    pub rincon: Option<String>,
}

/// Smart plug connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlugConfig {
    /// IP address of the plug, if statically configured.
    pub ip: Option<String>,
}

/// Timing policy for device communication.
///
/// The boot-wait and settle values are tuned for real hardware (the soundbar
/// accepts TCP well before its transport service is ready) and are
/// configurable rather than hard-coded: their role as a bounded-retry policy
/// is what matters, not the exact numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Television WebSocket handshake bound, seconds.
    pub connect_timeout_secs: u64,

    /// Per-request reply bound on the television link, seconds.
    pub request_timeout_secs: u64,

    /// TCP reachability probe bound, milliseconds.
    pub probe_timeout_ms: u64,

    /// Delay between soundbar boot-wait probes, milliseconds.
    pub boot_poll_interval_ms: u64,

    /// Maximum number of soundbar boot-wait probes.
    pub boot_poll_attempts: u32,

    /// Delay between first successful probe and the first soundbar command,
    /// milliseconds.
    pub boot_settle_ms: u64,

    /// Delay between switching the television to the optical output and
    /// muting its speakers, milliseconds.
    pub optical_settle_ms: u64,

    /// Delay between television wake-wait probes, milliseconds.
    pub wake_poll_interval_ms: u64,

    /// Maximum number of television wake-wait probes.
    pub wake_poll_attempts: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 10,
            probe_timeout_ms: 2_000,
            boot_poll_interval_ms: 2_000,
            boot_poll_attempts: 30,
            boot_settle_ms: 3_000,
            optical_settle_ms: 500,
            wake_poll_interval_ms: 2_000,
            wake_poll_attempts: 30,
        }
    }
}

impl Timings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn boot_poll_interval(&self) -> Duration {
        Duration::from_millis(self.boot_poll_interval_ms)
    }

    pub fn boot_settle(&self) -> Duration {
        Duration::from_millis(self.boot_settle_ms)
    }

    pub fn optical_settle(&self) -> Duration {
        Duration::from_millis(self.optical_settle_ms)
    }

    pub fn wake_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wake_poll_interval_ms)
    }

    /// Total time the boot wait can take before giving up, seconds.
    pub fn boot_wait_bound_secs(&self) -> u64 {
        u64::from(self.boot_poll_attempts) * self.boot_poll_interval_ms / 1_000
    }

    /// Validates the timing values.
    pub fn validate(&self) -> Result<(), String> {
        if self.boot_poll_attempts == 0 {
            return Err("boot_poll_attempts must be >= 1".to_string());
        }
        if self.wake_poll_attempts == 0 {
            return Err("wake_poll_attempts must be >= 1".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be >= 1".to_string());
        }
        Ok(())
    }
}
