//! Device endpoint book and the discovery seam.
//!
//! The registry maps each [`DeviceKind`] to its last-known address. Entries
//! are seeded from static configuration and can be refreshed at runtime by
//! the discovery collaborator via [`DeviceRegistry::update_address`] or a
//! [`DeviceResolver`]. A connectivity failure invalidates the entry, forcing
//! re-resolution on the next use; statically configured addresses survive
//! invalidation since there is nothing better to fall back to.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::Config;
use crate::devices::DeviceKind;

/// A resolved device address, plus an optional protocol identifier
/// (the Sonos `RINCON_xxx` id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    pub address: String,
    pub identifier: Option<String>,
}

/// Best-effort discovery seam.
///
/// Implementations wrap mDNS/SSDP/broadcast discovery, which live outside
/// this crate. The registry works without one: statically configured
/// addresses are enough.
#[async_trait]
pub trait DeviceResolver: Send + Sync {
    /// Resolves the current address for a device, if it can be found.
    async fn resolve(&self, kind: DeviceKind) -> Option<ResolvedDevice>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Configured,
    Discovered,
}

#[derive(Debug, Clone)]
struct Entry {
    address: String,
    identifier: Option<String>,
    source: Source,
    last_known_reachable: bool,
}

impl Entry {
    fn to_resolved(&self) -> ResolvedDevice {
        ResolvedDevice {
            address: self.address.clone(),
            identifier: self.identifier.clone(),
        }
    }
}

/// Shared book of device endpoints.
pub struct DeviceRegistry {
    entries: RwLock<HashMap<DeviceKind, Entry>>,
    resolver: Option<Arc<dyn DeviceResolver>>,
}

impl DeviceRegistry {
    /// Creates a registry seeded from static configuration, with no
    /// discovery collaborator.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, None)
    }

    /// Creates a registry seeded from static configuration, consulting the
    /// given resolver for devices the configuration does not cover.
    pub fn new(config: &Config, resolver: Option<Arc<dyn DeviceResolver>>) -> Self {
        let mut entries = HashMap::new();

        if let Some(ip) = &config.tv.ip {
            entries.insert(DeviceKind::Tv, Self::configured(ip, None));
        }
        if let Some(ip) = &config.sonos.ip {
            entries.insert(
                DeviceKind::Soundbar,
                Self::configured(ip, config.sonos.rincon.clone()),
            );
        }
        if let Some(ip) = &config.plug.ip {
            entries.insert(DeviceKind::Plug, Self::configured(ip, None));
        }

        Self {
            entries: RwLock::new(entries),
            resolver,
        }
    }

    fn configured(address: &str, identifier: Option<String>) -> Entry {
        Entry {
            address: address.to_string(),
            identifier,
            source: Source::Configured,
            last_known_reachable: true,
        }
    }

    /// Returns the current address for a device without consulting the
    /// resolver.
    pub fn address(&self, kind: DeviceKind) -> Option<String> {
        self.entries.read().get(&kind).map(|e| e.address.clone())
    }

    /// Resolves a device endpoint, consulting the discovery collaborator
    /// when the known entry has been invalidated or is missing.
    pub async fn resolve(&self, kind: DeviceKind) -> Option<ResolvedDevice> {
        let (usable, stale) = {
            let entries = self.entries.read();
            match entries.get(&kind) {
                Some(e) if e.last_known_reachable || e.source == Source::Configured => {
                    (Some(e.to_resolved()), None)
                }
                Some(e) => (None, Some(e.to_resolved())),
                None => (None, None),
            }
        };
        if let Some(found) = usable {
            return Some(found);
        }

        if let Some(resolver) = &self.resolver {
            if let Some(found) = resolver.resolve(kind).await {
                log::info!("[Registry] {kind} resolved to {}", found.address);
                self.entries.write().insert(
                    kind,
                    Entry {
                        address: found.address.clone(),
                        identifier: found.identifier.clone(),
                        source: Source::Discovered,
                        last_known_reachable: true,
                    },
                );
                return Some(found);
            }
        }

        // A stale discovered address beats nothing at all.
        stale
    }

    /// Records a fresh address for a device, as reported by discovery.
    ///
    /// Returns `true` when the address actually changed - the caller must
    /// then invalidate any cached connection handle for that device.
    pub fn update_address(
        &self,
        kind: DeviceKind,
        address: String,
        identifier: Option<String>,
    ) -> bool {
        let mut entries = self.entries.write();
        let changed = entries
            .get(&kind)
            .map_or(true, |e| e.address != address);
        entries.insert(
            kind,
            Entry {
                address,
                identifier,
                source: Source::Discovered,
                last_known_reachable: true,
            },
        );
        changed
    }

    /// Marks a device as reachable after a successful exchange.
    pub fn mark_reachable(&self, kind: DeviceKind) {
        if let Some(e) = self.entries.write().get_mut(&kind) {
            e.last_known_reachable = true;
        }
    }

    /// Invalidates a device entry after a connectivity failure, forcing
    /// re-resolution on the next use.
    pub fn invalidate(&self, kind: DeviceKind) {
        if let Some(e) = self.entries.write().get_mut(&kind) {
            if e.last_known_reachable {
                log::debug!("[Registry] {kind} marked unreachable at {}", e.address);
            }
            e.last_known_reachable = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config_with_tv(ip: &str) -> Config {
        let mut config = Config::default();
        config.tv.ip = Some(ip.to_string());
        config
    }

    struct CountingResolver {
        calls: AtomicUsize,
        answer: Option<ResolvedDevice>,
    }

    #[async_trait]
    impl DeviceResolver for CountingResolver {
        async fn resolve(&self, _kind: DeviceKind) -> Option<ResolvedDevice> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    #[tokio::test]
    async fn configured_address_resolves_without_resolver() {
        let registry = DeviceRegistry::from_config(&config_with_tv("192.168.1.238"));
        let found = registry.resolve(DeviceKind::Tv).await.unwrap();
        assert_eq!(found.address, "192.168.1.238");
        assert!(registry.resolve(DeviceKind::Plug).await.is_none());
    }

    #[tokio::test]
    async fn configured_address_survives_invalidation() {
        let registry = DeviceRegistry::from_config(&config_with_tv("192.168.1.238"));
        registry.invalidate(DeviceKind::Tv);
        let found = registry.resolve(DeviceKind::Tv).await.unwrap();
        assert_eq!(found.address, "192.168.1.238");
    }

    #[tokio::test]
    async fn missing_device_falls_through_to_resolver() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            answer: Some(ResolvedDevice {
                address: "192.168.1.77".into(),
                identifier: Some("RINCON_ABC".into()),
            }),
        });
        let registry = DeviceRegistry::new(&Config::default(), Some(resolver.clone()));

        let found = registry.resolve(DeviceKind::Soundbar).await.unwrap();
        assert_eq!(found.address, "192.168.1.77");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        // Second resolve is served from the cached entry.
        registry.resolve(DeviceKind::Soundbar).await.unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        // Invalidation forces another discovery round.
        registry.invalidate(DeviceKind::Soundbar);
        registry.resolve(DeviceKind::Soundbar).await.unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_discovered_address_is_returned_when_rediscovery_fails() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let registry = DeviceRegistry::new(&Config::default(), Some(resolver));
        registry.update_address(DeviceKind::Plug, "192.168.1.50".into(), None);
        registry.invalidate(DeviceKind::Plug);

        let found = registry.resolve(DeviceKind::Plug).await.unwrap();
        assert_eq!(found.address, "192.168.1.50");
    }

    #[test]
    fn update_address_reports_change() {
        let registry = DeviceRegistry::from_config(&config_with_tv("192.168.1.238"));
        assert!(!registry.update_address(DeviceKind::Tv, "192.168.1.238".into(), None));
        assert!(registry.update_address(DeviceKind::Tv, "192.168.1.239".into(), None));
        assert_eq!(
            registry.address(DeviceKind::Tv).as_deref(),
            Some("192.168.1.239")
        );
    }
}
