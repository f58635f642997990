//! Service construction and wiring.
//!
//! Builds the device clients, the routing services, and the state
//! broadcaster, and ties the television's volume subscription to the
//! broadcaster. Both the headless server and tests go through here.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::AppState;
use crate::config::Config;
use crate::devices::{PlugControl, SoundbarControl, TvControl};
use crate::kasa::KasaPlug;
use crate::registry::{DeviceRegistry, DeviceResolver};
use crate::services::{AudioRouter, VolumeRouter};
use crate::sonos::SonosTransport;
use crate::state::StateBroadcaster;
use crate::webos::{TvPower, VolumeCallback, WebosLink};
use crate::wol::{MacAddr, UdpWakeSender};

/// Builds the full service graph from a configuration, with no discovery
/// collaborator.
pub fn bootstrap(config: Config) -> AppState {
    bootstrap_with_resolver(config, None)
}

/// Builds the full service graph, consulting `resolver` for device
/// addresses the configuration does not pin.
pub fn bootstrap_with_resolver(
    config: Config,
    resolver: Option<Arc<dyn DeviceResolver>>,
) -> AppState {
    let registry = Arc::new(DeviceRegistry::new(&config, resolver));
    let state = Arc::new(StateBroadcaster::new());

    // The television's volume subscription feeds the broadcaster for the
    // lifetime of each session.
    let on_volume: VolumeCallback = {
        let state = Arc::clone(&state);
        Arc::new(move |update| state.publish_volume(update.volume, update.muted))
    };

    let link = Arc::new(WebosLink::new(
        Arc::clone(&registry),
        &config.tv,
        config.timings.clone(),
        on_volume,
    ));
    let soundbar = Arc::new(SonosTransport::new(
        reqwest::Client::new(),
        Arc::clone(&registry),
    ));
    let plug = Arc::new(KasaPlug::new(Arc::clone(&registry)));

    let audio = Arc::new(AudioRouter::new(
        Arc::clone(&link) as Arc<dyn TvControl>,
        Arc::clone(&soundbar) as Arc<dyn SoundbarControl>,
        Arc::clone(&plug) as Arc<dyn PlugControl>,
        Arc::clone(&state),
        config.timings.clone(),
    ));
    let volume = Arc::new(VolumeRouter::new(
        Arc::clone(&link) as Arc<dyn TvControl>,
        soundbar as Arc<dyn SoundbarControl>,
        Arc::clone(&state),
    ));

    let mac = config.tv.mac.as_deref().and_then(|raw| {
        raw.parse::<MacAddr>()
            .map_err(|e| log::warn!("[Bootstrap] Ignoring configured television MAC: {e}"))
            .ok()
    });
    let power = Arc::new(TvPower::new(
        Arc::clone(&link),
        Arc::clone(&registry),
        Arc::new(UdpWakeSender),
        config.timings.clone(),
        config.tv.port,
        mac,
    ));

    AppState {
        audio,
        volume,
        power,
        link,
        state,
        registry,
        config: Arc::new(RwLock::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_wires_a_complete_state_graph() {
        let mut config = Config::default();
        config.tv.ip = Some("192.168.1.238".to_string());
        config.tv.mac = Some("44:27:45:06:d6:e2".to_string());
        config.sonos.ip = Some("192.168.1.77".to_string());
        config.plug.ip = Some("192.168.1.50".to_string());

        let app = bootstrap(config);
        assert!(!app.link.is_connected());
        assert_eq!(app.state.subscriber_count(), 0);
        assert_eq!(
            app.registry.address(crate::DeviceKind::Soundbar).as_deref(),
            Some("192.168.1.77")
        );
    }

    #[test]
    fn invalid_mac_is_dropped_not_fatal() {
        let mut config = Config::default();
        config.tv.mac = Some("not-a-mac".to_string());
        let app = bootstrap(config);
        // Wake without a MAC later fails as invalid_request; bootstrap
        // itself must not.
        assert!(!app.link.is_connected());
    }
}
