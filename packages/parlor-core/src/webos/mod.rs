//! Television control over the webOS ssap WebSocket protocol.
//!
//! - [`protocol`]: ssap message envelopes, registration, volume payloads
//! - [`link`]: the shared, lazily-connected, reconnecting control link
//! - [`power`]: wake-on-LAN and power-off lifecycle

pub mod link;
pub mod power;
pub mod protocol;

pub use link::{VolumeCallback, WebosLink};
pub use power::{TvPower, WakeReport};
pub use protocol::VolumeUpdate;
