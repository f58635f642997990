//! Television power lifecycle: wake-on-LAN and power-off.
//!
//! Independent of the audio modes, but shares the control link so that
//! `tvConnected`-style status is accurate right after a wake.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use super::link::{WebosError, WebosLink};
use super::protocol::uri;
use crate::config::Timings;
use crate::devices::DeviceKind;
use crate::error::{ParlorError, ParlorResult};
use crate::probe;
use crate::registry::DeviceRegistry;
use crate::wol::{MacAddr, WakeSender};

/// Outcome of a wake attempt.
///
/// "Sent but unconfirmed" is a result, not an error - the packet may simply
/// need more time than the polling bound allows.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WakeReport {
    /// Whether the television became reachable within the polling bound.
    pub confirmed: bool,

    /// Whether the control link is live again.
    #[serde(rename = "tvConnected")]
    pub tv_connected: bool,

    /// 1-based probe attempt that first succeeded, when confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl WakeReport {
    fn unconfirmed() -> Self {
        Self {
            confirmed: false,
            tv_connected: false,
            attempt: None,
        }
    }
}

/// Wake and power-off control for the television.
pub struct TvPower {
    link: Arc<WebosLink>,
    registry: Arc<DeviceRegistry>,
    wake_sender: Arc<dyn WakeSender>,
    timings: Timings,
    control_port: u16,
    mac: Option<MacAddr>,
}

impl TvPower {
    pub fn new(
        link: Arc<WebosLink>,
        registry: Arc<DeviceRegistry>,
        wake_sender: Arc<dyn WakeSender>,
        timings: Timings,
        control_port: u16,
        mac: Option<MacAddr>,
    ) -> Self {
        Self {
            link,
            registry,
            wake_sender,
            timings,
            control_port,
            mac,
        }
    }

    /// Sends the power-off command and drops the local session immediately.
    ///
    /// The television tears the transport down on its own once it powers
    /// off; a dropped link or a missing reply is treated as success.
    pub async fn power_off(&self) -> ParlorResult<()> {
        let result = self.link.request(uri::TURN_OFF, json!({})).await;
        self.link.invalidate();

        match result {
            Ok(_) => {
                log::info!("[Power] Television powered off");
                Ok(())
            }
            Err(WebosError::Closed | WebosError::RequestTimeout(_)) => {
                log::debug!("[Power] Television dropped the link before acknowledging power-off");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sends one wake packet and polls the control port until the
    /// television answers or the bound is exhausted.
    ///
    /// On confirmation the control link is eagerly re-established so status
    /// endpoints report an accurate connection state right away.
    pub async fn wake(&self, mac_override: Option<MacAddr>) -> ParlorResult<WakeReport> {
        let mac = mac_override.or(self.mac).ok_or_else(|| {
            ParlorError::InvalidRequest("no television MAC address configured".to_string())
        })?;

        self.wake_sender
            .send(mac)
            .await
            .map_err(|e| ParlorError::Internal(e.to_string()))?;

        let Some(address) = self.registry.address(DeviceKind::Tv) else {
            log::warn!("[Power] Wake packet sent but no television address is known to confirm");
            return Ok(WakeReport::unconfirmed());
        };

        let target = format!("{address}:{}", self.control_port);
        let attempt = probe::await_tcp(
            &target,
            self.timings.wake_poll_interval(),
            self.timings.wake_poll_attempts,
            self.timings.probe_timeout(),
        )
        .await;

        match attempt {
            Some(attempt) => {
                if let Err(e) = self.link.connect().await {
                    log::warn!(
                        "[Power] Television is reachable but the control link is not up yet: {e}"
                    );
                }
                Ok(WakeReport {
                    confirmed: true,
                    tv_connected: self.link.is_connected(),
                    attempt: Some(attempt),
                })
            }
            None => {
                log::info!(
                    "[Power] Wake packet sent; television not reachable within {} attempts",
                    self.timings.wake_poll_attempts
                );
                Ok(WakeReport::unconfirmed())
            }
        }
    }
}
