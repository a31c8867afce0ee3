// ── Usage ledger ──
//
// Append-only accounting of bytes reported by transfer collaborators.
// Independent of the mediator: it only needs the Observer snapshot to
// resolve which kind of interface a record was written against.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{LedgerConfig, PeriodWindow};
use crate::error::CoreError;
use crate::model::{
    NetworkId, NetworkKind, NetworkStatus, Networks, RequestType, UsagePeriod, UsageRecord,
};
use crate::stream::SnapshotStream;

// ── Clock ───────────────────────────────────────────────────────────

/// Wall-clock source used to place the accounting window.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ── Window ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Window {
    Rolling(TimeDelta),
    Fixed { length: TimeDelta, anchor: DateTime<Utc> },
}

impl Window {
    fn from_config(window: PeriodWindow) -> Result<Self, CoreError> {
        let length = TimeDelta::from_std(window.length()).map_err(|e| CoreError::Config {
            message: format!("usage window out of range: {e}"),
        })?;
        if length < TimeDelta::milliseconds(1) {
            return Err(CoreError::Config {
                message: "usage window must be at least 1ms".into(),
            });
        }
        // Retention reaches back one more window.
        if length.checked_mul(2).is_none() {
            return Err(CoreError::Config {
                message: "usage window out of range".into(),
            });
        }

        Ok(match window {
            PeriodWindow::Rolling(_) => Self::Rolling(length),
            PeriodWindow::Fixed { anchor, .. } => Self::Fixed { length, anchor },
        })
    }

    /// `[start, end]` of the window containing `now`.
    fn bounds(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            Self::Rolling(length) => (now - length, now),
            Self::Fixed { length, anchor } => {
                let len_ms = length.num_milliseconds();
                let periods = (now - anchor).num_milliseconds().div_euclid(len_ms);
                let start = anchor + TimeDelta::milliseconds(periods.saturating_mul(len_ms));
                (start, start + length)
            }
        }
    }

    /// Records older than this are no longer needed.
    fn retention_cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Rolling(length) => now - length * 2,
            Self::Fixed { length, .. } => self.bounds(now).0 - length,
        }
    }
}

// ── Ledger ──────────────────────────────────────────────────────────

#[derive(Default)]
struct LedgerState {
    records: Vec<UsageRecord>,
    /// Kinds seen for each network id, so records survive a purge.
    kinds: HashMap<NetworkId, NetworkKind>,
}

/// Per-period usage accounting.
pub struct UsageLedger {
    window: Window,
    tick_interval: Option<Duration>,
    clock: Arc<dyn Clock>,
    networks: Option<SnapshotStream<Networks>>,
    state: Mutex<LedgerState>,
    period: watch::Sender<Arc<UsagePeriod>>,
}

impl UsageLedger {
    pub fn new(config: LedgerConfig) -> Result<Self, CoreError> {
        if config.tick_interval.is_some_and(|tick| tick.is_zero()) {
            return Err(CoreError::Config {
                message: "usage tick interval must be greater than zero".into(),
            });
        }

        let window = Window::from_config(config.window)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (start, end) = window.bounds(clock.now());
        let (period, _) = watch::channel(Arc::new(UsagePeriod::empty(start, end)));

        Ok(Self {
            window,
            tick_interval: config.tick_interval,
            clock,
            networks: None,
            state: Mutex::new(LedgerState::default()),
            period,
        })
    }

    /// Replace the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self.tick();
        self
    }

    /// Resolve network kinds from an Observer snapshot stream.
    #[must_use]
    pub fn with_networks(mut self, networks: SnapshotStream<Networks>) -> Self {
        self.networks = Some(networks);
        self
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Append a record for `network_id`. The kind comes from the latest
    /// snapshot, then from earlier sightings of the id, else `Unknown`.
    pub fn record(
        &self,
        network_id: impl Into<NetworkId>,
        request_type: RequestType,
        bytes: u64,
        timestamp: DateTime<Utc>,
    ) -> UsageRecord {
        let network_id = network_id.into();
        let observed = self.networks.as_ref().and_then(|networks| {
            networks
                .latest()
                .get(&network_id)
                .map(NetworkStatus::kind)
        });

        let mut state = self.lock_state();
        let network_kind = match observed {
            Some(kind) => {
                state.kinds.insert(network_id.clone(), kind);
                kind
            }
            None => state
                .kinds
                .get(&network_id)
                .copied()
                .unwrap_or(NetworkKind::Unknown),
        };

        self.append(
            &mut state,
            UsageRecord {
                network_id,
                network_kind,
                request_type,
                bytes,
                timestamp,
            },
        )
    }

    /// Append a record against a known interface instance.
    pub fn record_for(
        &self,
        status: &NetworkStatus,
        request_type: RequestType,
        bytes: u64,
        timestamp: DateTime<Utc>,
    ) -> UsageRecord {
        let mut state = self.lock_state();
        state.kinds.insert(status.id.clone(), status.kind());
        self.append(
            &mut state,
            UsageRecord {
                network_id: status.id.clone(),
                network_kind: status.kind(),
                request_type,
                bytes,
                timestamp,
            },
        )
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Aggregate for the active window as of the last write or tick.
    pub fn current_period_usage(&self) -> Arc<UsagePeriod> {
        self.period.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotStream<UsagePeriod> {
        SnapshotStream::new(self.period.subscribe())
    }

    /// Retained records, oldest write first.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.lock_state().records.clone()
    }

    // ── Recompute ────────────────────────────────────────────────────

    /// Recompute the current period against the clock.
    pub fn tick(&self) {
        let state = self.lock_state();
        self.publish(&state);
    }

    /// Recompute on the configured tick interval until cancelled. `None`
    /// when no interval is configured.
    pub fn spawn_ticker(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let period = self.tick_interval?;
        let ledger = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => ledger.tick(),
                }
            }
            debug!("usage ticker stopped");
        }))
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock_state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, state: &mut LedgerState, record: UsageRecord) -> UsageRecord {
        let cutoff = self.window.retention_cutoff(self.clock.now());
        let before = state.records.len();
        state.records.retain(|r| r.timestamp >= cutoff);
        let dropped = before - state.records.len();
        if dropped > 0 {
            debug!(dropped, "dropped expired usage records");
        }

        debug!(
            network = %record.network_id,
            kind = %record.network_kind,
            request = %record.request_type,
            bytes = record.bytes,
            "usage recorded"
        );
        state.records.push(record.clone());
        self.publish(state);
        record
    }

    fn publish(&self, state: &LedgerState) {
        let (start, end) = self.window.bounds(self.clock.now());
        let period = UsagePeriod::fold(start, end, &state.records);
        self.period.send_replace(Arc::new(period));
    }
}

impl std::fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLedger")
            .field("window", &self.window)
            .field("tick_interval", &self.tick_interval)
            .field("records", &self.lock_state().records.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{NetworkType, Status};
    use chrono::TimeZone;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn at(now: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(now)))
        }

        fn advance(&self, by: TimeDelta) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn rolling_hour(clock: &Arc<ManualClock>) -> UsageLedger {
        UsageLedger::new(LedgerConfig {
            window: PeriodWindow::Rolling(Duration::from_secs(3600)),
            tick_interval: None,
        })
        .unwrap()
        .with_clock(Arc::clone(clock) as Arc<dyn Clock>)
    }

    #[test]
    fn rejects_zero_window() {
        let err = UsageLedger::new(LedgerConfig {
            window: PeriodWindow::Rolling(Duration::ZERO),
            tick_interval: None,
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn unknown_network_is_recorded_as_unknown() {
        let clock = ManualClock::at(noon());
        let ledger = rolling_hour(&clock);

        let record = ledger.record("wlan0", RequestType::Sync, 10, noon());

        assert_eq!(record.network_kind, NetworkKind::Unknown);
        assert_eq!(ledger.current_period_usage().bytes_for(NetworkKind::Unknown), 10);
    }

    #[test]
    fn record_for_remembers_kind() {
        let clock = ManualClock::at(noon());
        let ledger = rolling_hour(&clock);
        let wifi = NetworkStatus::new("wlan0", NetworkType::bare(NetworkKind::Wifi), Status::Available);

        ledger.record_for(&wifi, RequestType::Api, 100, noon());
        let later = ledger.record("wlan0", RequestType::Api, 50, noon());

        assert_eq!(later.network_kind, NetworkKind::Wifi);
        let period = ledger.current_period_usage();
        assert_eq!(period.bytes_for(NetworkKind::Wifi), 150);
        assert_eq!(period.bytes_for_request(RequestType::Api), 150);
    }

    #[test]
    fn rolling_window_excludes_old_records() {
        let clock = ManualClock::at(noon());
        let ledger = rolling_hour(&clock);

        ledger.record("a", RequestType::Image, 7, noon() - TimeDelta::minutes(90));
        ledger.record("a", RequestType::Image, 3, noon() - TimeDelta::minutes(10));

        let period = ledger.current_period_usage();
        assert_eq!(period.total(), 3);
        assert_eq!(period.records, 1);
        assert_eq!(ledger.records().len(), 2);
    }

    #[test]
    fn records_older_than_two_windows_are_dropped_on_write() {
        let clock = ManualClock::at(noon());
        let ledger = rolling_hour(&clock);

        ledger.record("a", RequestType::Sync, 1, noon() - TimeDelta::minutes(30));
        clock.advance(TimeDelta::hours(3));
        ledger.record("a", RequestType::Sync, 2, noon() + TimeDelta::hours(3));

        assert_eq!(ledger.records().len(), 1);
    }

    #[test]
    fn tick_moves_rolling_window() {
        let clock = ManualClock::at(noon());
        let ledger = rolling_hour(&clock);
        ledger.record("a", RequestType::Sync, 5, noon());

        clock.advance(TimeDelta::hours(2));
        assert_eq!(ledger.current_period_usage().total(), 5);
        ledger.tick();
        assert_eq!(ledger.current_period_usage().total(), 0);
    }

    #[test]
    fn fixed_window_aligns_to_anchor() {
        let anchor = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::at(noon());
        let ledger = UsageLedger::new(LedgerConfig {
            window: PeriodWindow::Fixed {
                length: Duration::from_secs(24 * 3600),
                anchor,
            },
            tick_interval: None,
        })
        .unwrap()
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);

        ledger.record("a", RequestType::Sync, 4, anchor - TimeDelta::hours(1));
        ledger.record("a", RequestType::Sync, 6, anchor + TimeDelta::hours(1));

        let period = ledger.current_period_usage();
        assert_eq!(period.start, anchor);
        assert_eq!(period.end, anchor + TimeDelta::days(1));
        assert_eq!(period.total(), 6);
    }

    #[test]
    fn fixed_window_before_anchor_uses_earlier_period() {
        let anchor = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let window = Window::from_config(PeriodWindow::Fixed {
            length: Duration::from_secs(24 * 3600),
            anchor,
        })
        .unwrap();

        let (start, end) = window.bounds(noon());
        assert_eq!(start, anchor - TimeDelta::days(1));
        assert_eq!(end, anchor);
    }
}
