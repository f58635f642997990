//! Device control seams.
//!
//! The routing services depend on these traits rather than the concrete
//! device clients, so routing behavior can be exercised against
//! call-recording doubles. Concrete implementations live with their
//! transports: [`crate::webos::WebosLink`], [`crate::sonos::SonosTransport`],
//! and [`crate::kasa::KasaPlug`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ParlorResult;

// ─────────────────────────────────────────────────────────────────────────────
// Device Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// The three devices in the fixed topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Tv,
    Soundbar,
    Plug,
}

impl DeviceKind {
    /// Route-segment form used by the address-update endpoint.
    pub fn from_route(segment: &str) -> Option<Self> {
        match segment {
            "tv" => Some(Self::Tv),
            "soundbar" => Some(Self::Soundbar),
            "plug" => Some(Self::Plug),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tv => "television",
            Self::Soundbar => "soundbar",
            Self::Plug => "smart plug",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sound Outputs
// ─────────────────────────────────────────────────────────────────────────────

/// Television sound output sinks, by their webOS identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundOutput {
    /// The television's own speakers.
    TvSpeaker,
    /// HDMI ARC, feeding the soundbar.
    ExternalArc,
    /// The optical output, feeding the headphone adapter.
    ExternalOptical,
}

impl SoundOutput {
    /// The identifier the television uses on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TvSpeaker => "tv_speaker",
            Self::ExternalArc => "external_arc",
            Self::ExternalOptical => "external_optical",
        }
    }
}

impl fmt::Display for SoundOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Control Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Television operations used by the routing services.
#[async_trait]
pub trait TvControl: Send + Sync {
    /// Switches the television's sound output.
    async fn set_sound_output(&self, output: SoundOutput) -> ParlorResult<()>;

    /// Queries the currently active sound output identifier.
    async fn sound_output(&self) -> ParlorResult<String>;

    /// Nudges the television volume up by one step.
    async fn volume_up(&self) -> ParlorResult<()>;

    /// Nudges the television volume down by one step.
    async fn volume_down(&self) -> ParlorResult<()>;

    /// Sets the television volume (0-100).
    async fn set_volume(&self, volume: u8) -> ParlorResult<()>;

    /// Mutes or unmutes the television's own output.
    async fn set_mute(&self, mute: bool) -> ParlorResult<()>;
}

/// Soundbar operations used by the routing services.
#[async_trait]
pub trait SoundbarControl: Send + Sync {
    /// Stops playback. Resolves on the device's acknowledgement, which is
    /// not a guarantee the action audibly completed.
    async fn stop(&self) -> ParlorResult<()>;

    /// Switches the soundbar to its TV input and starts playback, strictly
    /// in that order. If the input switch fails, play is not attempted.
    async fn play_from_tv_input(&self) -> ParlorResult<()>;

    /// Mutes or unmutes the soundbar.
    async fn set_mute(&self, mute: bool) -> ParlorResult<()>;

    /// Sets the soundbar volume (0-100).
    async fn set_volume(&self, volume: u8) -> ParlorResult<()>;

    /// Adjusts the soundbar volume by a signed step; returns the new volume.
    async fn set_relative_volume(&self, delta: i8) -> ParlorResult<u8>;

    /// Lightweight connectivity probe. Never errors.
    async fn is_reachable(&self, timeout: Duration) -> bool;
}

/// Smart plug operations used by the routing services.
#[async_trait]
pub trait PlugControl: Send + Sync {
    /// Switches the plug relay on.
    async fn turn_on(&self) -> ParlorResult<()>;

    /// Switches the plug relay off.
    async fn turn_off(&self) -> ParlorResult<()>;

    /// Queries the plug state. Never errors: an unreachable or unconfigured
    /// plug is a normal, pollable state, not an exception.
    async fn status(&self) -> PlugStatus;
}

/// Observed plug state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlugStatus {
    /// Whether the plug answered the status query.
    pub reachable: bool,

    /// Relay state; `None` when the plug is unreachable.
    pub on: Option<bool>,
}

impl PlugStatus {
    /// State reported when resolution or the query failed.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            on: None,
        }
    }
}
