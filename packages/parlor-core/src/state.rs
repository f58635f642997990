//! Last-known AV state and its fan-out to push subscribers.
//!
//! The television link's volume subscription and the routing services feed
//! [`StateBroadcaster`]; every update is pushed to all registered
//! subscribers (the SSE handlers). Delivery is best-effort: a dead
//! subscriber is dropped without affecting the rest.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

/// A point-in-time view of the AV state.
///
/// `output` is only present once a mode switch or output query has run;
/// volume pushes straight from the television carry `{volume, muted}` alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvSnapshot {
    /// Television or soundbar volume, 0-100.
    pub volume: u8,

    /// Whether the active sink is muted.
    pub muted: bool,

    /// The television's sound output identifier, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct Latest {
    volume: Option<u8>,
    muted: bool,
    output: Option<String>,
}

impl Latest {
    fn snapshot(&self) -> Option<AvSnapshot> {
        self.volume.map(|volume| AvSnapshot {
            volume,
            muted: self.muted,
            output: self.output.clone(),
        })
    }
}

/// Holds the last-known volume/mute/output triple and fans updates out to an
/// open set of subscribers.
pub struct StateBroadcaster {
    latest: Mutex<Latest>,
    subscribers: DashMap<u64, mpsc::UnboundedSender<AvSnapshot>>,
    next_id: AtomicU64,
}

impl StateBroadcaster {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(Latest::default()),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a subscriber and returns its RAII guard plus the channel
    /// the snapshots arrive on.
    ///
    /// If state is already known, the current snapshot is delivered
    /// immediately so late joiners never start blank. Before the first
    /// update, nothing is delivered until one arrives.
    pub fn subscribe(self: &Arc<Self>) -> (SubscriberGuard, mpsc::UnboundedReceiver<AvSnapshot>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(snapshot) = self.snapshot() {
            let _ = tx.send(snapshot);
        }
        self.subscribers.insert(id, tx);
        log::debug!(
            "[State] Subscriber {id} registered (total: {})",
            self.subscribers.len()
        );

        (
            SubscriberGuard {
                id,
                broadcaster: Arc::clone(self),
            },
            rx,
        )
    }

    /// Returns the current snapshot, if any update has arrived yet.
    pub fn snapshot(&self) -> Option<AvSnapshot> {
        self.latest.lock().snapshot()
    }

    /// The last-known sound output identifier.
    pub fn output(&self) -> Option<String> {
        self.latest.lock().output.clone()
    }

    /// Records a volume/mute push from the television subscription and fans
    /// it out.
    pub fn publish_volume(&self, volume: u8, muted: bool) {
        let snapshot = {
            let mut latest = self.latest.lock();
            latest.volume = Some(volume);
            latest.muted = muted;
            latest.snapshot()
        };
        if let Some(snapshot) = snapshot {
            tracing::debug!(volume, muted, "av_state_update");
            self.fanout(&snapshot);
        }
    }

    /// Records a volume change made through the soundbar path, where the
    /// mute state is not reported back; the last-known mute state is kept.
    pub fn record_volume(&self, volume: u8) {
        let muted = self.latest.lock().muted;
        self.publish_volume(volume, muted);
    }

    /// Records a mute change without touching the volume.
    pub fn record_muted(&self, muted: bool) {
        let snapshot = {
            let mut latest = self.latest.lock();
            latest.muted = muted;
            latest.snapshot()
        };
        if let Some(snapshot) = snapshot {
            self.fanout(&snapshot);
        }
    }

    /// Records the achieved sound output after a mode switch.
    ///
    /// Publishes only once volume state exists; the output alone does not
    /// make a usable snapshot.
    pub fn set_output(&self, output: &str) {
        let snapshot = {
            let mut latest = self.latest.lock();
            latest.output = Some(output.to_string());
            latest.snapshot()
        };
        if let Some(snapshot) = snapshot {
            self.fanout(&snapshot);
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Pushes a snapshot to every subscriber, dropping the ones whose
    /// channel is gone. One dead subscriber never blocks the rest.
    fn fanout(&self, snapshot: &AvSnapshot) {
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().send(snapshot.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
            log::debug!("[State] Subscriber {id} dropped (channel closed)");
        }
    }

    fn unsubscribe(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            log::debug!(
                "[State] Subscriber {id} unregistered (remaining: {})",
                self.subscribers.len()
            );
        }
    }
}

impl Default for StateBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters a subscriber when dropped.
///
/// Redundant removal is safe: the underlying map ignores missing ids, so a
/// guard dropping after `fanout` already removed the dead entry is a no-op.
pub struct SubscriberGuard {
    id: u64,
    broadcaster: Arc<StateBroadcaster>,
}

impl SubscriberGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}
