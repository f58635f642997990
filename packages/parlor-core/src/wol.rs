//! Wake-on-LAN magic packet construction and sending.
//!
//! The television powers its network interface in standby; one broadcast
//! magic packet on UDP port 9 wakes it. Delivery is fire-and-forget - the
//! power lifecycle confirms the wake separately by probing the control port.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;

/// UDP port conventionally used for wake-on-LAN ("discard").
const WOL_PORT: u16 = 9;

/// Errors from MAC parsing or packet delivery.
#[derive(Debug, Error)]
pub enum WolError {
    /// The MAC address string could not be parsed.
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    /// The broadcast send failed.
    #[error("failed to send wake packet: {0}")]
    Send(#[from] std::io::Error),
}

/// A hardware (MAC) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddr {
    type Err = WolError;

    /// Accepts colon- or dash-separated hex pairs (`44:27:45:06:d6:e2`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(|c| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(WolError::InvalidMac(s.to_string()));
        }
        let mut octets = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            octets[i] =
                u8::from_str_radix(part, 16).map_err(|_| WolError::InvalidMac(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Builds the 102-byte magic packet: six `0xFF` bytes followed by the MAC
/// address repeated sixteen times.
pub fn magic_packet(mac: MacAddr) -> [u8; 102] {
    let mut packet = [0xFFu8; 102];
    for rep in 0..16 {
        packet[6 + rep * 6..6 + (rep + 1) * 6].copy_from_slice(&mac.octets());
    }
    packet
}

/// Broadcasts one magic packet for the given MAC address.
pub async fn send_magic_packet(mac: MacAddr) -> Result<(), WolError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    let packet = magic_packet(mac);
    socket
        .send_to(&packet, ("255.255.255.255", WOL_PORT))
        .await?;
    log::info!("[WOL] Magic packet sent for {mac}");
    Ok(())
}

/// Wake-packet sending seam, so the power lifecycle can be exercised
/// without touching the network.
#[async_trait]
pub trait WakeSender: Send + Sync {
    /// Sends one wake packet for the given MAC address.
    async fn send(&self, mac: MacAddr) -> Result<(), WolError>;
}

/// The real UDP broadcast sender.
pub struct UdpWakeSender;

#[async_trait]
impl WakeSender for UdpWakeSender {
    async fn send(&self, mac: MacAddr) -> Result<(), WolError> {
        send_magic_packet(mac).await
    }
}
