// ── Network observer ──
//
// Single ingestion point for platform connectivity events. Every event is
// applied under one short-lived lock and the resulting `Networks` snapshot
// is republished through a `watch` channel. Nothing here awaits, so the
// platform's delivery thread can call straight in.

mod selection;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ObserverConfig;
use crate::model::{NetworkId, NetworkStatus, Networks, Status};
use crate::stream::SnapshotStream;

const MIN_PURGE_PERIOD: Duration = Duration::from_millis(100);

/// A connectivity notification from the platform.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    Added(NetworkStatus),
    Updated(NetworkStatus),
    Removed(NetworkId),
}

struct ObserverState {
    networks: Networks,
    /// When each currently-Lost instance was first seen as Lost.
    lost_since: HashMap<NetworkId, Instant>,
}

impl ObserverState {
    fn track_loss(&mut self, status: &NetworkStatus, now: Instant) {
        if status.status == Status::Lost {
            self.lost_since.entry(status.id.clone()).or_insert(now);
        } else {
            self.lost_since.remove(&status.id);
        }
    }

    fn purge_expired(&mut self, now: Instant, grace: Duration) -> usize {
        let expired: Vec<NetworkId> = self
            .lost_since
            .iter()
            .filter(|(_, since)| now.saturating_duration_since(**since) >= grace)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.lost_since.remove(id);
            self.networks.remove(id);
            debug!(network = %id, "purged lost network");
        }
        expired.len()
    }
}

/// Maintains the live [`Networks`] snapshot.
pub struct NetworkObserver {
    config: ObserverConfig,
    state: Mutex<ObserverState>,
    snapshot: watch::Sender<Arc<Networks>>,
}

impl NetworkObserver {
    pub fn new(config: ObserverConfig) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Networks::default()));
        Self {
            config,
            state: Mutex::new(ObserverState {
                networks: Networks::default(),
                lost_since: HashMap::new(),
            }),
            snapshot,
        }
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    // ── Ingestion ────────────────────────────────────────────────────

    pub fn apply(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::Added(status) => self.apply_added(status),
            NetworkEvent::Updated(status) => self.apply_updated(status),
            NetworkEvent::Removed(id) => self.apply_removed(&id),
        }
    }

    /// A new instance appeared. An existing entry with the same id is
    /// replaced and becomes the most recently added one.
    pub fn apply_added(&self, status: NetworkStatus) {
        debug!(network = %status.id, kind = %status.kind(), status = %status.status, "network added");
        self.mutate(|state, now| {
            state.track_loss(&status, now);
            state.networks.push(status);
        });
    }

    /// An instance changed. Unknown ids are inserted, since the last event
    /// for an id always wins.
    pub fn apply_updated(&self, status: NetworkStatus) {
        if status.status == Status::Lost {
            info!(network = %status.id, kind = %status.kind(), "network lost");
        } else {
            debug!(network = %status.id, status = %status.status, "network updated");
        }
        self.mutate(|state, now| {
            state.track_loss(&status, now);
            if state.networks.contains(&status.id) {
                state.networks.replace(status);
            } else {
                state.networks.push(status);
            }
        });
    }

    pub fn apply_removed(&self, id: &NetworkId) {
        debug!(network = %id, "network removed");
        self.mutate(|state, _| {
            state.lost_since.remove(id);
            state.networks.remove(id);
        });
    }

    /// Drop `Lost` instances older than the grace period. Returns how many
    /// were purged.
    pub fn purge_expired(&self) -> usize {
        let mut purged = 0;
        self.mutate(|state, now| {
            purged = state.purge_expired(now, self.config.lost_grace);
        });
        purged
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Networks> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotStream<Networks> {
        SnapshotStream::new(self.snapshot.subscribe())
    }

    // ── Background ingestion ─────────────────────────────────────────

    /// Drain `events` on a background task until cancelled or the sender
    /// side closes. Lost instances are also purged on a timer so they do not
    /// linger when the platform goes quiet.
    pub fn ingest(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<NetworkEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let observer = Arc::clone(self);
        let period = observer.config.lost_grace.max(MIN_PURGE_PERIOD);

        tokio::spawn(async move {
            let mut purge = tokio::time::interval(period);
            purge.set_missed_tick_behavior(MissedTickBehavior::Delay);
            purge.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        observer.apply(event);
                    }
                    _ = purge.tick() => {
                        observer.purge_expired();
                    }
                }
            }
            debug!("network event ingestion stopped");
        })
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock_state(&self) -> MutexGuard<'_, ObserverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f`, purge expired losses, recompute the default and publish.
    fn mutate(&self, f: impl FnOnce(&mut ObserverState, Instant)) {
        let now = Instant::now();
        let mut state = self.lock_state();
        f(&mut state, now);
        state.purge_expired(now, self.config.lost_grace);

        let default = selection::select_default(&state.networks, state.networks.default_id());
        state.networks.set_default(default);

        // Published while still holding the lock so snapshots are ordered.
        self.snapshot.send_replace(Arc::new(state.networks.clone()));
    }
}

impl Default for NetworkObserver {
    fn default() -> Self {
        Self::new(ObserverConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{NetworkKind, NetworkType};

    fn status(id: &str, kind: NetworkKind, status: Status) -> NetworkStatus {
        NetworkStatus::new(id, NetworkType::bare(kind), status)
    }

    fn default_id(observer: &NetworkObserver) -> Option<String> {
        observer
            .snapshot()
            .default_network()
            .map(|n| n.id.to_string())
    }

    #[test]
    fn first_available_network_becomes_default() {
        let observer = NetworkObserver::default();
        observer.apply_added(status("bt", NetworkKind::Bluetooth, Status::Available));
        assert_eq!(default_id(&observer).as_deref(), Some("bt"));
    }

    #[test]
    fn adding_better_network_keeps_available_default() {
        let observer = NetworkObserver::default();
        observer.apply_added(status("bt", NetworkKind::Bluetooth, Status::Available));
        observer.apply_added(status("wlan", NetworkKind::Wifi, Status::Available));
        assert_eq!(default_id(&observer).as_deref(), Some("bt"));
    }

    #[test]
    fn duplicate_add_is_deduplicated() {
        let observer = NetworkObserver::default();
        observer.apply_added(status("wlan", NetworkKind::Wifi, Status::Available));
        observer.apply_added(status("wlan", NetworkKind::Wifi, Status::Available));
        assert_eq!(observer.snapshot().len(), 1);
    }

    #[test]
    fn lost_update_moves_default_but_keeps_record() {
        let observer = NetworkObserver::default();
        observer.apply_added(status("wlan", NetworkKind::Wifi, Status::Available));
        observer.apply_added(status("bt", NetworkKind::Bluetooth, Status::Available));
        assert_eq!(default_id(&observer).as_deref(), Some("wlan"));

        observer.apply_updated(status("wlan", NetworkKind::Wifi, Status::Lost));

        let snap = observer.snapshot();
        assert_eq!(default_id(&observer).as_deref(), Some("bt"));
        assert_eq!(snap.get(&"wlan".into()).unwrap().status, Status::Lost);
    }

    #[test]
    fn removing_default_recomputes_or_clears() {
        let observer = NetworkObserver::default();
        observer.apply_added(status("wlan", NetworkKind::Wifi, Status::Available));
        observer.apply_added(status("lte", NetworkKind::Cellular, Status::Losing));

        observer.apply_removed(&"wlan".into());
        assert!(default_id(&observer).is_none());
        assert_eq!(observer.snapshot().len(), 1);
    }

    #[test]
    fn update_for_unknown_id_inserts() {
        let observer = NetworkObserver::default();
        observer.apply_updated(status("lte", NetworkKind::Cellular, Status::Available));
        assert_eq!(default_id(&observer).as_deref(), Some("lte"));
    }

    #[test]
    fn last_event_for_an_id_wins() {
        let observer = NetworkObserver::default();
        observer.apply(NetworkEvent::Added(status("wlan", NetworkKind::Wifi, Status::Available)));
        observer.apply(NetworkEvent::Removed("wlan".into()));
        observer.apply(NetworkEvent::Updated(status("wlan", NetworkKind::Wifi, Status::Losing)));

        let snap = observer.snapshot();
        assert_eq!(snap.get(&"wlan".into()).unwrap().status, Status::Losing);
        assert!(snap.default_network().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_records_are_purged_after_grace() {
        let observer = NetworkObserver::new(ObserverConfig {
            lost_grace: Duration::from_secs(5),
        });
        observer.apply_added(status("wlan", NetworkKind::Wifi, Status::Available));
        observer.apply_updated(status("wlan", NetworkKind::Wifi, Status::Lost));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(observer.purge_expired(), 0);
        assert!(observer.snapshot().contains(&"wlan".into()));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(observer.purge_expired(), 1);
        assert!(observer.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_network_is_not_purged() {
        let observer = NetworkObserver::default();
        observer.apply_added(status("wlan", NetworkKind::Wifi, Status::Lost));
        observer.apply_updated(status("wlan", NetworkKind::Wifi, Status::Available));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(observer.purge_expired(), 0);
        assert_eq!(default_id(&observer).as_deref(), Some("wlan"));
    }

    #[tokio::test]
    async fn ingest_applies_channel_events() {
        let observer = Arc::new(NetworkObserver::default());
        let mut stream = observer.subscribe();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = observer.ingest(rx, cancel.clone());

        tx.send(NetworkEvent::Added(status("wlan", NetworkKind::Wifi, Status::Available)))
            .await
            .unwrap();
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn default_is_always_a_member() {
        // Deterministic pseudo-random event sequence over a small id space.
        let observer = NetworkObserver::default();
        let kinds = [
            NetworkKind::Wifi,
            NetworkKind::Cellular,
            NetworkKind::Bluetooth,
            NetworkKind::Unknown,
        ];
        let statuses = [Status::Available, Status::Losing, Status::Lost, Status::Unknown];
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;

        for _ in 0..2_000 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let pick = |shift: u32, n: usize| usize::try_from((seed >> shift) % n as u64).unwrap();
            let id = format!("net{}", pick(8, 6));
            let kind = kinds[pick(16, kinds.len())];
            let st = statuses[pick(24, statuses.len())];

            match pick(32, 3) {
                0 => observer.apply_added(status(&id, kind, st)),
                1 => observer.apply_updated(status(&id, kind, st)),
                _ => observer.apply_removed(&id.as_str().into()),
            }

            let snap = observer.snapshot();
            if let Some(default) = snap.default_network() {
                assert!(snap.contains(&default.id));
                assert!(default.is_available());
            }
        }
    }
}
