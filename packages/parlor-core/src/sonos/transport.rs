//! Soundbar transport control.
//!
//! Fire-and-forget stop/play/mute commands against the soundbar's UPnP
//! services, plus a reachability probe used by the boot wait. Each command
//! resolves on the device's synchronous acknowledgement - not a guarantee
//! the action audibly completed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::soap::{extract_xml_text, SoapError, SoapRequestBuilder, SonosService, SONOS_PORT};
use crate::devices::{DeviceKind, SoundbarControl};
use crate::error::{ParlorError, ParlorResult};
use crate::probe;
use crate::registry::{DeviceRegistry, ResolvedDevice};

/// Builds the AVTransport URI for the soundbar's own TV input.
fn tv_input_uri(rincon: &str) -> String {
    format!("x-sonos-htastream:{rincon}:spdif")
}

/// Fault 701 ("transition not available") from a Stop means the device is
/// already stopped.
fn is_already_stopped(err: &SoapError) -> bool {
    matches!(err, SoapError::Fault(msg) if msg.contains("701"))
}

/// Soundbar transport controller.
pub struct SonosTransport {
    client: Client,
    registry: Arc<DeviceRegistry>,
}

impl SonosTransport {
    pub fn new(client: Client, registry: Arc<DeviceRegistry>) -> Self {
        Self { client, registry }
    }

    async fn endpoint(&self) -> ParlorResult<ResolvedDevice> {
        self.registry
            .resolve(DeviceKind::Soundbar)
            .await
            .ok_or_else(|| ParlorError::Unreachable {
                device: DeviceKind::Soundbar,
                message: "no soundbar address configured or discovered".to_string(),
            })
    }

    /// Records the connectivity outcome of a SOAP exchange so a dead
    /// address is re-resolved on the next use.
    fn note_outcome<T>(&self, result: &Result<T, SoapError>) {
        match result {
            Ok(_) => self.registry.mark_reachable(DeviceKind::Soundbar),
            Err(SoapError::Http(_)) => self.registry.invalidate(DeviceKind::Soundbar),
            Err(_) => {}
        }
    }
}

#[async_trait]
impl SoundbarControl for SonosTransport {
    async fn stop(&self) -> ParlorResult<()> {
        let device = self.endpoint().await?;

        let result = SoapRequestBuilder::new(&self.client, &device.address)
            .service(SonosService::AVTransport)
            .action("Stop")
            .instance_id()
            .send()
            .await;
        self.note_outcome(&result);

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_already_stopped(&e) => {
                log::debug!("[Sonos] Stop: soundbar already stopped (ignoring 701)");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn play_from_tv_input(&self) -> ParlorResult<()> {
        let device = self.endpoint().await?;
        let rincon = device.identifier.as_deref().ok_or_else(|| {
            ParlorError::Internal(
                "soundbar RINCON identifier is not configured; cannot select its TV input".into(),
            )
        })?;

        // Strictly ordered: select the TV input first, then start the
        // transport. A failed input switch must not be followed by Play.
        let uri = tv_input_uri(rincon);
        log::info!("[Sonos] Switching soundbar to TV input ({uri})");
        let result = SoapRequestBuilder::new(&self.client, &device.address)
            .service(SonosService::AVTransport)
            .action("SetAVTransportURI")
            .instance_id()
            .arg("CurrentURI", uri)
            .arg("CurrentURIMetaData", "")
            .send()
            .await;
        self.note_outcome(&result);
        result?;

        let result = SoapRequestBuilder::new(&self.client, &device.address)
            .service(SonosService::AVTransport)
            .action("Play")
            .instance_id()
            .arg("Speed", "1")
            .send()
            .await;
        self.note_outcome(&result);
        result?;

        log::info!("[Sonos] Soundbar playing from TV input");
        Ok(())
    }

    async fn set_mute(&self, mute: bool) -> ParlorResult<()> {
        let device = self.endpoint().await?;

        let result = SoapRequestBuilder::new(&self.client, &device.address)
            .service(SonosService::RenderingControl)
            .action("SetMute")
            .instance_id()
            .arg("Channel", "Master")
            .arg("DesiredMute", if mute { "1" } else { "0" })
            .send()
            .await;
        self.note_outcome(&result);
        result?;
        Ok(())
    }

    async fn set_volume(&self, volume: u8) -> ParlorResult<()> {
        let device = self.endpoint().await?;

        let result = SoapRequestBuilder::new(&self.client, &device.address)
            .service(SonosService::RenderingControl)
            .action("SetVolume")
            .instance_id()
            .arg("Channel", "Master")
            .arg("DesiredVolume", volume.min(100).to_string())
            .send()
            .await;
        self.note_outcome(&result);
        result?;
        Ok(())
    }

    async fn set_relative_volume(&self, delta: i8) -> ParlorResult<u8> {
        let device = self.endpoint().await?;

        let result = SoapRequestBuilder::new(&self.client, &device.address)
            .service(SonosService::RenderingControl)
            .action("SetRelativeVolume")
            .instance_id()
            .arg("Channel", "Master")
            .arg("Adjustment", delta.to_string())
            .send()
            .await;
        self.note_outcome(&result);
        let response = result?;

        let new_volume = extract_xml_text(&response, "NewVolume")
            .and_then(|v| v.parse().ok())
            .ok_or(SoapError::Parse)?;
        Ok(new_volume)
    }

    async fn is_reachable(&self, timeout: Duration) -> bool {
        let Some(address) = self.registry.address(DeviceKind::Soundbar) else {
            return false;
        };
        probe::probe_tcp(&format!("{address}:{SONOS_PORT}"), timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tv_input_uri_uses_the_htastream_scheme() {
        assert_eq!(
            tv_input_uri("RINCON_5CAAFD0123456"),
            "x-sonos-htastream:RINCON_5CAAFD0123456:spdif"
        );
    }

    #[test]
    fn fault_701_counts_as_already_stopped() {
        assert!(is_already_stopped(&SoapError::Fault("UPnPError (701)".into())));
        assert!(!is_already_stopped(&SoapError::Fault("UPnPError (714)".into())));
        assert!(!is_already_stopped(&SoapError::Parse));
    }

    #[tokio::test]
    async fn unreachable_without_configured_address() {
        let registry = Arc::new(DeviceRegistry::from_config(&crate::config::Config::default()));
        let transport = SonosTransport::new(Client::new(), registry);

        let err = transport.stop().await.unwrap_err();
        assert_eq!(err.code(), "device_unreachable");
        assert!(!transport.is_reachable(Duration::from_millis(100)).await);
    }
}
