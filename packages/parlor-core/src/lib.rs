//! Parlor Core - shared library for the Parlor audio routing proxy.
//!
//! This crate drives the audio routing of a small home-theater setup from a
//! single local HTTP/SSE endpoint. Three devices are involved:
//!
//! - an LG webOS television, controlled over its `ssap://` WebSocket
//!   remote-control protocol,
//! - a Sonos soundbar, controlled over UPnP/SOAP,
//! - a TP-Link Kasa smart plug that gates the soundbar's mains power.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`webos`]: long-lived television control link, pairing, and power lifecycle
//! - [`sonos`]: soundbar transport control (UPnP/SOAP)
//! - [`kasa`]: smart plug power control (TP-Link device protocol)
//! - [`services`]: the audio-output router and sink-aware volume router
//! - [`state`]: last-known volume/mute/output snapshot and its fan-out
//! - [`registry`]: device endpoint book and the discovery seam
//! - [`probe`]: TCP reachability probing with bounded polling
//! - [`api`]: HTTP/SSE surface
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! Device control goes through the [`devices`] traits ([`TvControl`],
//! [`SoundbarControl`], [`PlugControl`]) so the routing logic can be
//! exercised against call-recording doubles. Discovery is consumed through
//! [`registry::DeviceResolver`]; the crate works with statically configured
//! addresses alone.

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod devices;
pub mod error;
pub mod kasa;
pub mod probe;
pub mod registry;
pub mod services;
pub mod sonos;
pub mod state;
pub mod webos;
pub mod wol;

// Re-export commonly used types at the crate root
pub use bootstrap::bootstrap;
pub use config::{Config, PlugConfig, SonosConfig, Timings, TvConfig};
pub use devices::{DeviceKind, PlugControl, PlugStatus, SoundOutput, SoundbarControl, TvControl};
pub use error::{ParlorError, ParlorResult};
pub use registry::{DeviceRegistry, DeviceResolver, ResolvedDevice};
pub use services::{AudioMode, AudioRouter, SonosAction, SwitchOutcome, VolumeRouter};
pub use state::{AvSnapshot, StateBroadcaster, SubscriberGuard};
pub use webos::{TvPower, VolumeUpdate, WakeReport, WebosLink};
pub use wol::{MacAddr, UdpWakeSender, WakeSender};

// Re-export API types
pub use api::{start_server, AppState, ServerError};
