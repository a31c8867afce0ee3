// ── Bandwidth lease mediator ──
//
// Turns accepted high-bandwidth requests into shared, reference-counted
// leases, issuing at most one live platform request per interface kind no
// matter how many callers want it. All bookkeeping lives in `LeaseTable`
// behind one std mutex that is never held across an await or while the
// platform requester runs. Each platform request is issued by its own
// driver task, which also clears it if the request is withdrawn.

mod lease;
mod table;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MediatorConfig;
use crate::model::{HighBandwidthRequest, NetworkKind, Networks, WaitPolicy};
use crate::platform::{NetworkRequester, RequestOutcome};
use crate::stream::SnapshotStream;

use self::lease::LeaseCell;
use self::table::{Abandon, Claim, Drained, LeaseTable, Release, Resolution};

pub use self::lease::{Lease, LeaseId, LeaseStatus};

/// Shared state behind every [`LeaseMediator`] clone and [`Lease`].
pub(crate) struct MediatorInner {
    config: MediatorConfig,
    requester: Arc<dyn NetworkRequester>,
    table: Mutex<LeaseTable>,
    pinned: watch::Sender<Arc<BTreeSet<NetworkKind>>>,
    /// Bumped whenever an owed clear reaches the platform.
    cleared: watch::Sender<u64>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Outcome of waiting on one candidate kind.
enum Attempt {
    Granted(Lease),
    /// Denied by the platform; try the next candidate.
    Denied,
    /// The shared deadline passed.
    TimedOut,
    /// The mediator shut down underneath the caller.
    Aborted,
}

/// Reference-counted arbiter of platform network requests.
///
/// Cheaply cloneable; clones share one table.
#[derive(Clone)]
pub struct LeaseMediator {
    inner: Arc<MediatorInner>,
}

impl LeaseMediator {
    pub fn new(config: MediatorConfig, requester: Arc<dyn NetworkRequester>) -> Self {
        let (pinned, _) = watch::channel(Arc::new(BTreeSet::new()));
        let (cleared, _) = watch::channel(0);
        Self {
            inner: Arc::new(MediatorInner {
                config,
                requester,
                table: Mutex::new(LeaseTable::default()),
                pinned,
                cleared,
                cancel: CancellationToken::new(),
                tasks: tokio::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &MediatorConfig {
        &self.inner.config
    }

    // ── Grants ───────────────────────────────────────────────────────

    /// Obtain a lease on the first acceptable kind that can be had.
    ///
    /// An already active kind is shared without a platform call, checked in
    /// preference order before anything new is requested. Otherwise each
    /// candidate is requested in turn until one is confirmed; a request
    /// already in flight for a candidate is joined rather than repeated.
    /// One deadline covers every candidate: `WaitUpTo(d)` waits at most
    /// `d`, `FailFast` at most the configured grace. Returns `None` when
    /// nothing was granted; any claim left behind is rolled back.
    pub async fn request_high_bandwidth_network(
        &self,
        request: &HighBandwidthRequest,
    ) -> Option<Lease> {
        if request.acceptable.is_empty() {
            debug!("no acceptable network kinds, nothing to request");
            return None;
        }

        for &kind in &request.acceptable {
            if let Some(lease) = self.inner.join_active(kind) {
                return Some(lease);
            }
        }

        let budget = match request.wait {
            WaitPolicy::FailFast => self.inner.config.fail_fast_grace,
            WaitPolicy::WaitUpTo(timeout) => timeout,
        };
        let deadline = Instant::now() + budget;

        for &kind in &request.acceptable {
            match self.inner.attempt(kind, deadline).await {
                Attempt::Granted(lease) => return Some(lease),
                Attempt::Denied => {}
                Attempt::TimedOut => {
                    warn!(kind = %kind, wait = ?budget, "timed out waiting for platform network");
                    return None;
                }
                Attempt::Aborted => return None,
            }
        }

        info!(candidates = ?request.acceptable, "no acceptable network could be activated");
        None
    }

    // ── Network loss ─────────────────────────────────────────────────

    /// Feed one Observer snapshot into loss handling. An active kind whose
    /// last instance went Lost or was removed is purged, its leases are
    /// invalidated and the platform request is withdrawn once. A `Losing`
    /// instance still holds its kind.
    pub fn apply_networks(&self, networks: &Networks) {
        self.inner.apply_networks(networks);
    }

    /// Follow an Observer snapshot stream on a background task until
    /// [`shutdown`](Self::shutdown) or the stream ends. The current
    /// snapshot is applied before this returns.
    pub async fn watch_networks(&self, mut networks: SnapshotStream<Networks>) {
        self.inner.apply_networks(&networks.latest());

        let inner = Arc::clone(&self.inner);
        let cancel = self.inner.cancel.child_token();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    snapshot = networks.changed() => match snapshot {
                        Some(snapshot) => inner.apply_networks(&snapshot),
                        None => break,
                    },
                }
            }
            debug!("network watcher stopped");
        });

        self.inner.tasks.lock().await.push(handle);
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    /// Live leases on `kind` (0 when not active).
    pub fn ref_count(&self, kind: NetworkKind) -> usize {
        self.inner.lock_table().ref_count(kind)
    }

    /// Kinds with a confirmed, held platform request.
    pub fn active_types(&self) -> BTreeSet<NetworkKind> {
        self.inner.lock_table().active_kinds()
    }

    /// Whether a platform request for `kind` is in flight.
    pub fn is_pending(&self, kind: NetworkKind) -> bool {
        self.inner.lock_table().is_pending(kind)
    }

    /// Stream of the pinned (actively requested) set.
    pub fn pinned(&self) -> SnapshotStream<BTreeSet<NetworkKind>> {
        SnapshotStream::new(self.inner.pinned.subscribe())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Stop background tasks, invalidate every lease and withdraw every
    /// platform request.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let drained = {
            let mut table = self.inner.lock_table();
            let drained = table.drain();
            self.inner.publish_pinned(&table);
            drained
        };
        let mut handles = Vec::new();
        for entry in drained {
            match entry {
                Drained::Active(kind) => self.inner.clear(kind),
                Drained::Pending(kind, driver) => {
                    debug!(kind = %kind, "withdrawing in-flight platform request");
                    handles.extend(driver);
                }
            }
        }

        handles.extend(self.inner.tasks.lock().await.drain(..));
        for handle in handles {
            if let Err(e) = handle.await {
                debug!(error = %e, "background task ended abnormally");
            }
        }
        info!("lease mediator shut down");
    }
}

impl MediatorInner {
    fn lock_table(&self) -> MutexGuard<'_, LeaseTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_pinned(&self, table: &LeaseTable) {
        let active = table.active_kinds();
        self.pinned.send_if_modified(|current| {
            if **current == active {
                false
            } else {
                *current = Arc::new(active);
                true
            }
        });
    }

    /// Clear a withdrawn request and settle the clear the table counted
    /// for it.
    fn clear(&self, kind: NetworkKind) {
        self.requester.clear_request(kind);
        self.settle_clear(kind);
    }

    fn settle_clear(&self, kind: NetworkKind) {
        self.lock_table().settle_clear(kind);
        self.cleared.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    /// Wait until no clear for `kind` is owed. `false` once the mediator
    /// is gone.
    async fn clears_settled(
        mediator: &Weak<Self>,
        cleared: &mut watch::Receiver<u64>,
        kind: NetworkKind,
    ) -> bool {
        loop {
            let Some(inner) = mediator.upgrade() else {
                return false;
            };
            if inner.lock_table().owed_clears(kind) == 0 {
                return true;
            }
            drop(inner);
            if cleared.changed().await.is_err() {
                return false;
            }
        }
    }

    fn lease(self: &Arc<Self>, kind: NetworkKind, id: LeaseId, cell: Arc<LeaseCell>) -> Lease {
        Lease::new(id, kind, cell, Arc::downgrade(self))
    }

    fn join_active(self: &Arc<Self>, kind: NetworkKind) -> Option<Lease> {
        let id = LeaseId::new();
        let cell = Arc::new(LeaseCell::new());
        let holders = self.lock_table().join_active(kind, id, Arc::clone(&cell))?;
        info!(kind = %kind, lease = %id, holders, "lease granted on active network");
        Some(self.lease(kind, id, cell))
    }

    async fn attempt(self: &Arc<Self>, kind: NetworkKind, deadline: Instant) -> Attempt {
        let id = LeaseId::new();
        let cell = Arc::new(LeaseCell::new());

        let claim = self.lock_table().claim(kind, id, Arc::clone(&cell));
        let mut outcome = match claim {
            Claim::Granted { holders } => {
                info!(kind = %kind, lease = %id, holders, "lease granted on active network");
                return Attempt::Granted(self.lease(kind, id, cell));
            }
            Claim::Joined(outcome) => {
                debug!(kind = %kind, lease = %id, "joining in-flight platform request");
                outcome
            }
            Claim::Opened {
                generation,
                outcome,
                withdraw,
            } => {
                debug!(kind = %kind, lease = %id, generation, "requesting network from platform");
                self.spawn_driver(kind, generation, withdraw);
                outcome
            }
        };

        // Rolls the claim back if this future times out or is dropped.
        let mut guard = WaitGuard {
            inner: self,
            kind,
            id,
            armed: true,
        };

        let answer = async { outcome.wait_for(Option::is_some).await.ok().and_then(|v| *v) };
        let Ok(answer) = tokio::time::timeout_at(deadline, answer).await else {
            guard.armed = false;
            self.withdraw(kind, id).await;
            return Attempt::TimedOut;
        };

        match answer {
            Some(RequestOutcome::Confirmed) if cell.status() == LeaseStatus::Open => {
                guard.armed = false;
                info!(kind = %kind, lease = %id, "lease granted");
                Attempt::Granted(self.lease(kind, id, cell))
            }
            // Purged between confirmation and wake-up. The guard stays armed
            // so the claim is rolled back like any other abandoned wait.
            Some(RequestOutcome::Confirmed) => Attempt::Denied,
            Some(RequestOutcome::Denied) => {
                guard.armed = false;
                debug!(kind = %kind, "platform denied network request");
                Attempt::Denied
            }
            None => Attempt::Aborted,
        }
    }

    /// Issue the platform request for `generation` once earlier clears of
    /// `kind` have landed, and clear it again if it is withdrawn.
    fn spawn_driver(
        self: &Arc<Self>,
        kind: NetworkKind,
        generation: u64,
        withdraw: CancellationToken,
    ) {
        let requester = Arc::clone(&self.requester);
        let mediator = Arc::downgrade(self);
        let mut cleared = self.cleared.subscribe();

        let handle = tokio::spawn(async move {
            let ready = tokio::select! {
                biased;
                () = withdraw.cancelled() => false,
                ready = Self::clears_settled(&mediator, &mut cleared, kind) => ready,
            };
            if !ready {
                // Never issued; only the owed count is left to settle.
                if let Some(inner) = mediator.upgrade() {
                    inner.settle_clear(kind);
                }
                return;
            }

            // Polled first so the request is issued even if the withdrawal
            // races it; the clear below then follows it.
            let outcome = tokio::select! {
                biased;
                outcome = requester.request_network(kind) => Some(outcome),
                () = withdraw.cancelled() => None,
            };
            match (mediator.upgrade(), outcome) {
                (Some(inner), Some(outcome)) => inner.resolve(kind, generation, outcome),
                (Some(inner), None) => {
                    debug!(kind = %kind, generation, "withdrawn before the platform answered");
                    inner.clear(kind);
                }
                (None, Some(RequestOutcome::Denied)) => {}
                (None, _) => requester.clear_request(kind),
            }
        });

        self.lock_table().attach_driver(kind, generation, handle);
    }

    fn resolve(&self, kind: NetworkKind, generation: u64, outcome: RequestOutcome) {
        let resolution = {
            let mut table = self.lock_table();
            let resolution = table.resolve(kind, generation, outcome);
            self.publish_pinned(&table);
            resolution
        };

        match resolution {
            Resolution::Granted { holders } => {
                info!(kind = %kind, holders, "platform confirmed network request");
            }
            Resolution::Denied { waiters } => {
                info!(kind = %kind, waiters, "platform denied network request");
            }
            Resolution::Withdrawn if outcome == RequestOutcome::Confirmed => {
                warn!(
                    kind = %kind,
                    generation,
                    "confirmation arrived after withdrawal, clearing request"
                );
                self.clear(kind);
            }
            Resolution::Withdrawn => {
                debug!(kind = %kind, generation, "denial arrived after withdrawal");
                self.settle_clear(kind);
            }
        }
    }

    /// Roll back a claim. Returns the driver to wait on when this was the
    /// last waiter of an in-flight request.
    fn abandon(&self, kind: NetworkKind, id: LeaseId) -> Option<JoinHandle<()>> {
        let abandon = {
            let mut table = self.lock_table();
            let abandon = table.abandon(kind, id);
            self.publish_pinned(&table);
            abandon
        };

        match abandon {
            Abandon::LastWaiter { driver } => {
                warn!(kind = %kind, lease = %id, "rolling back platform request nobody waits for");
                driver
            }
            Abandon::Left { waiters } => {
                debug!(kind = %kind, lease = %id, waiters, "waiter left in-flight request");
                None
            }
            Abandon::Released(release) => {
                self.after_release(kind, id, &release);
                None
            }
            Abandon::NotFound => None,
        }
    }

    /// Roll back a claim and wait until its platform request, if any, has
    /// been cleared.
    async fn withdraw(&self, kind: NetworkKind, id: LeaseId) {
        if let Some(driver) = self.abandon(kind, id) {
            if let Err(e) = driver.await {
                debug!(kind = %kind, error = %e, "request driver ended abnormally");
            }
        }
    }

    pub(crate) fn release(&self, kind: NetworkKind, id: LeaseId) {
        let release = {
            let mut table = self.lock_table();
            let release = table.release(kind, id);
            self.publish_pinned(&table);
            release
        };
        self.after_release(kind, id, &release);
    }

    fn after_release(&self, kind: NetworkKind, id: LeaseId, release: &Release) {
        match release {
            Release::LastHolder => {
                info!(kind = %kind, lease = %id, "last lease closed, releasing platform request");
                self.clear(kind);
            }
            Release::Remaining(holders) => {
                debug!(kind = %kind, lease = %id, holders, "lease closed");
            }
            Release::NoOp => {}
        }
    }

    fn apply_networks(&self, networks: &Networks) {
        let lost = {
            let mut table = self.lock_table();
            let lost = table.update_availability(networks.present_kinds());
            self.publish_pinned(&table);
            lost
        };

        for lost in lost {
            warn!(
                kind = %lost.kind,
                leases = lost.leases,
                "granted network lost, invalidating leases"
            );
            self.clear(lost.kind);
        }
    }
}

/// Withdraws a waiter's claim unless disarmed.
struct WaitGuard<'a> {
    inner: &'a MediatorInner,
    kind: NetworkKind,
    id: LeaseId,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            // The driver finishes the rollback on its own.
            drop(self.inner.abandon(self.kind, self.id));
        }
    }
}
