//! DeviceRegistry: the live set of devices heard on the discovery port.
//!
//! Each device broadcasts its identity and status about once a second.  The
//! registry keeps one entry per MAC address and forgets a device once no
//! broadcast has arrived for longer than the expiry window (2 s by default).
//!
//! ```text
//! discovery thread ──Sighting──► pump task ──write lock──► DeviceRegistry
//!                                 prune task ──write lock──┘      │
//!                                     consumers ◄──read lock──────┘ (clones)
//! ```
//!
//! Readers always get clones.  A connection keeps a copy of the identity it
//! was opened with, never a reference into the registry, so an entry can
//! expire while the device is still being streamed to.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use dac_core::{DeviceIdentity, MacAddress, StatusSnapshot};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Registry shared between the discovery pump and its readers.
pub type SharedRegistry = Arc<RwLock<DeviceRegistry>>;

/// One decoded broadcast, as produced by the discovery listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sighting {
    pub identity: DeviceIdentity,
    pub status: StatusSnapshot,
    /// Source address of the datagram.
    pub address: IpAddr,
    pub received_at: Instant,
}

/// What the registry knows about one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEntry {
    pub identity: DeviceIdentity,
    /// Status from the most recent broadcast.
    pub status: StatusSnapshot,
    pub address: IpAddr,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

/// In-memory registry keyed by MAC address.
#[derive(Debug)]
pub struct DeviceRegistry {
    entries: HashMap<MacAddress, RegistryEntry>,
    expiry: Duration,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

impl DeviceRegistry {
    /// Creates an empty registry that drops entries older than `expiry`.
    pub fn new(expiry: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            expiry,
        }
    }

    /// Wraps a new registry for sharing between tasks.
    pub fn shared(expiry: Duration) -> SharedRegistry {
        Arc::new(RwLock::new(Self::new(expiry)))
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Records a broadcast.  Returns `true` if the device was not known.
    ///
    /// The identity of a known device is kept as first seen; only status,
    /// address and the last-seen time are refreshed.
    pub fn upsert(
        &mut self,
        identity: DeviceIdentity,
        status: StatusSnapshot,
        address: IpAddr,
        now: Instant,
    ) -> bool {
        match self.entries.get_mut(&identity.mac) {
            Some(entry) => {
                if entry.identity != identity {
                    warn!(
                        "device {} reported a different identity; keeping the original",
                        identity.mac
                    );
                }
                entry.status = status;
                entry.address = address;
                entry.last_seen = now;
                false
            }
            None => {
                self.entries.insert(
                    identity.mac,
                    RegistryEntry {
                        identity,
                        status,
                        address,
                        first_seen: now,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Records a [`Sighting`]; see [`upsert`](Self::upsert).
    pub fn record(&mut self, sighting: Sighting) -> bool {
        self.upsert(
            sighting.identity,
            sighting.status,
            sighting.address,
            sighting.received_at,
        )
    }

    /// Removes every entry last seen more than `expiry` before `now` and
    /// returns them.
    pub fn prune(&mut self, now: Instant) -> Vec<RegistryEntry> {
        let expiry = self.expiry;
        let stale: Vec<MacAddress> = self
            .entries
            .values()
            .filter(|e| now.saturating_duration_since(e.last_seen) > expiry)
            .map(|e| e.identity.mac)
            .collect();

        stale
            .into_iter()
            .filter_map(|mac| self.entries.remove(&mac))
            .collect()
    }

    /// Prunes as of `now`, then returns the remaining entries ordered by MAC.
    pub fn live_entries(&mut self, now: Instant) -> Vec<RegistryEntry> {
        self.prune(now);
        self.snapshot()
    }

    /// All entries, ordered by MAC address.
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        let mut all: Vec<RegistryEntry> = self.entries.values().copied().collect();
        all.sort_by_key(|e| e.identity.mac);
        all
    }

    pub fn get(&self, mac: &MacAddress) -> Option<RegistryEntry> {
        self.entries.get(mac).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Feeds sightings from the discovery listener into `registry` until the
/// channel closes.
pub async fn pump_sightings(mut rx: mpsc::Receiver<Sighting>, registry: SharedRegistry) {
    while let Some(sighting) = rx.recv().await {
        let is_new = registry.write().await.record(sighting);
        if is_new {
            info!(
                "discovered device {} at {} (hw {}, sw {}, capacity {}, max {} pps)",
                sighting.identity.mac,
                sighting.address,
                sighting.identity.hw_revision,
                sighting.identity.sw_revision,
                sighting.identity.buffer_capacity,
                sighting.identity.max_point_rate
            );
        }
    }
    debug!("discovery channel closed; registry pump stopped");
}

/// Prunes `registry` every `interval` while `running` is set.
pub async fn prune_periodically(
    registry: SharedRegistry,
    interval: Duration,
    running: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
        let expired = registry.write().await.prune(Instant::now());
        for entry in expired {
            info!("device {} expired", entry.identity.mac);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use dac_core::PlaybackState;

    fn identity(last: u8) -> DeviceIdentity {
        DeviceIdentity {
            mac: MacAddress([0, 4, 0xA3, 0, 0, last]),
            hw_revision: 1,
            sw_revision: 2,
            buffer_capacity: 1799,
            max_point_rate: 100_000,
        }
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::from([192, 168, 1, last])
    }

    #[test]
    fn test_upsert_reports_new_devices_once() {
        // Arrange
        let mut reg = DeviceRegistry::default();
        let t0 = Instant::now();

        // Act
        let first = reg.upsert(identity(1), StatusSnapshot::default(), addr(10), t0);
        let second = reg.upsert(identity(1), StatusSnapshot::default(), addr(10), t0);

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_upsert_refreshes_status_and_address_but_keeps_identity() {
        // Arrange
        let mut reg = DeviceRegistry::default();
        let t0 = Instant::now();
        reg.upsert(identity(1), StatusSnapshot::default(), addr(10), t0);

        let mut changed = identity(1);
        changed.sw_revision = 9;
        let playing = StatusSnapshot {
            playback_state: PlaybackState::Playing,
            ..StatusSnapshot::default()
        };

        // Act
        reg.upsert(changed, playing, addr(11), t0 + Duration::from_millis(500));

        // Assert
        let entry = reg.get(&identity(1).mac).expect("present");
        assert_eq!(entry.identity.sw_revision, 2);
        assert_eq!(entry.status.playback_state, PlaybackState::Playing);
        assert_eq!(entry.address, addr(11));
        assert_eq!(entry.first_seen, t0);
        assert_eq!(entry.last_seen, t0 + Duration::from_millis(500));
    }

    #[test]
    fn test_prune_removes_entries_older_than_expiry() {
        // Arrange
        let mut reg = DeviceRegistry::default();
        let t0 = Instant::now();
        reg.upsert(identity(1), StatusSnapshot::default(), addr(1), t0);

        // Act
        let expired = reg.prune(t0 + Duration::from_millis(2001));

        // Assert
        assert_eq!(expired.len(), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_prune_keeps_entry_refreshed_1999_ms_ago() {
        let mut reg = DeviceRegistry::default();
        let t0 = Instant::now();
        reg.upsert(identity(1), StatusSnapshot::default(), addr(1), t0);

        let expired = reg.prune(t0 + Duration::from_millis(1999));

        assert!(expired.is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_refresh_extends_lifetime() {
        let mut reg = DeviceRegistry::default();
        let t0 = Instant::now();
        reg.upsert(identity(1), StatusSnapshot::default(), addr(1), t0);
        reg.upsert(
            identity(1),
            StatusSnapshot::default(),
            addr(1),
            t0 + Duration::from_millis(1500),
        );

        let live = reg.live_entries(t0 + Duration::from_millis(3000));

        assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_live_entries_sorted_and_pruned() {
        // Arrange
        let mut reg = DeviceRegistry::default();
        let t0 = Instant::now();
        reg.upsert(identity(3), StatusSnapshot::default(), addr(3), t0);
        reg.upsert(identity(1), StatusSnapshot::default(), addr(1), t0);
        reg.upsert(
            identity(2),
            StatusSnapshot::default(),
            addr(2),
            t0 + Duration::from_millis(2500),
        );

        // Act
        let live = reg.live_entries(t0 + Duration::from_millis(3000));

        // Assert: only the refreshed device survives
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].identity.mac, identity(2).mac);

        reg.upsert(identity(9), StatusSnapshot::default(), addr(9), t0);
        reg.upsert(identity(5), StatusSnapshot::default(), addr(5), t0);
        let macs: Vec<u8> = reg.snapshot().iter().map(|e| e.identity.mac.0[5]).collect();
        assert_eq!(macs, vec![2, 5, 9]);
    }

    #[tokio::test]
    async fn test_pump_records_sightings_until_channel_closes() {
        // Arrange
        let registry = DeviceRegistry::shared(Duration::from_secs(2));
        let (tx, rx) = mpsc::channel(8);
        let now = Instant::now();
        for last in [1u8, 2, 1] {
            tx.send(Sighting {
                identity: identity(last),
                status: StatusSnapshot::default(),
                address: addr(last),
                received_at: now,
            })
            .await
            .unwrap();
        }
        drop(tx);

        // Act
        pump_sightings(rx, Arc::clone(&registry)).await;

        // Assert
        assert_eq!(registry.read().await.len(), 2);
    }
}
