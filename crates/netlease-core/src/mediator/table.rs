// ── Lease table ──
//
// Synchronous state machine behind the mediator's single mutex. One slot
// per NetworkKind: `Pending` while a platform request is in flight,
// `Active` once confirmed. A slot exists only while it has at least one
// waiter or holder. Methods never block and never call the platform; they
// report what the caller must do once the lock is released.
//
// Every transition that withdraws a platform request is counted in `owed`
// until the clear has reached the platform. A new request for the same
// kind is not issued while a clear for it is still owed, so platform calls
// for one kind land in table order.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lease::{LeaseCell, LeaseId};
use crate::model::NetworkKind;
use crate::platform::RequestOutcome;

pub(crate) type OutcomeReceiver = watch::Receiver<Option<RequestOutcome>>;

struct PendingSlot {
    generation: u64,
    waiting: HashMap<LeaseId, Arc<LeaseCell>>,
    outcome: watch::Sender<Option<RequestOutcome>>,
    /// Cancelled when the request is withdrawn; the driver then clears
    /// whatever it issued.
    withdraw: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl PendingSlot {
    fn withdraw(self) -> Option<JoinHandle<()>> {
        self.withdraw.cancel();
        self.driver
    }
}

struct ActiveSlot {
    leases: HashMap<LeaseId, Arc<LeaseCell>>,
}

enum Slot {
    Pending(PendingSlot),
    Active(ActiveSlot),
}

/// Result of [`LeaseTable::claim`].
pub(crate) enum Claim {
    /// The kind was already active; the cell is open.
    Granted { holders: usize },
    /// A platform request is in flight; wait for its outcome.
    Joined(OutcomeReceiver),
    /// No request existed; the caller must start a driver for `generation`.
    Opened {
        generation: u64,
        outcome: OutcomeReceiver,
        withdraw: CancellationToken,
    },
}

/// Result of [`LeaseTable::resolve`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    Granted { holders: usize },
    Denied { waiters: usize },
    /// The generation was withdrawn before its answer was applied. A
    /// confirmed request must be cleared, then the owed clear settled.
    Withdrawn,
}

/// Result of [`LeaseTable::abandon`].
#[derive(Debug)]
pub(crate) enum Abandon {
    /// The last waiter left and the request was withdrawn. The driver
    /// clears it and settles the owed clear.
    LastWaiter { driver: Option<JoinHandle<()>> },
    Left { waiters: usize },
    /// The claim had already been granted and was released instead.
    Released(Release),
    NotFound,
}

/// Result of [`LeaseTable::release`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Release {
    /// Count reached zero; clear the platform request, then settle.
    LastHolder,
    Remaining(usize),
    NoOp,
}

/// An active kind purged because its last present instance went away.
/// The caller clears the platform request, then settles.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct LostKind {
    pub kind: NetworkKind,
    pub leases: usize,
}

/// One slot emptied by [`LeaseTable::drain`].
#[derive(Debug)]
pub(crate) enum Drained {
    /// Held request; the caller clears it, then settles.
    Active(NetworkKind),
    /// Withdrawn request; its driver clears and settles.
    Pending(NetworkKind, Option<JoinHandle<()>>),
}

#[derive(Default)]
pub(crate) struct LeaseTable {
    slots: HashMap<NetworkKind, Slot>,
    /// Kinds with at least one instance that is not Lost in the last
    /// snapshot.
    present: BTreeSet<NetworkKind>,
    /// Clears decided under the lock that have not reached the platform.
    owed: HashMap<NetworkKind, usize>,
    next_generation: u64,
}

impl LeaseTable {
    // ── Grant path ───────────────────────────────────────────────────

    /// Join an active kind without touching the platform. Returns the new
    /// holder count, or `None` when the kind is not active.
    pub(crate) fn join_active(
        &mut self,
        kind: NetworkKind,
        id: LeaseId,
        cell: Arc<LeaseCell>,
    ) -> Option<usize> {
        let Some(Slot::Active(active)) = self.slots.get_mut(&kind) else {
            return None;
        };
        cell.open();
        active.leases.insert(id, cell);
        Some(active.leases.len())
    }

    pub(crate) fn claim(&mut self, kind: NetworkKind, id: LeaseId, cell: Arc<LeaseCell>) -> Claim {
        match self.slots.get_mut(&kind) {
            Some(Slot::Active(active)) => {
                cell.open();
                active.leases.insert(id, cell);
                Claim::Granted {
                    holders: active.leases.len(),
                }
            }
            Some(Slot::Pending(pending)) => {
                pending.waiting.insert(id, cell);
                Claim::Joined(pending.outcome.subscribe())
            }
            None => {
                self.next_generation += 1;
                let generation = self.next_generation;
                let (tx, rx) = watch::channel(None);
                let withdraw = CancellationToken::new();
                self.slots.insert(
                    kind,
                    Slot::Pending(PendingSlot {
                        generation,
                        waiting: HashMap::from([(id, cell)]),
                        outcome: tx,
                        withdraw: withdraw.clone(),
                        driver: None,
                    }),
                );
                Claim::Opened {
                    generation,
                    outcome: rx,
                    withdraw,
                }
            }
        }
    }

    /// Remember the driver task of the current generation. A driver whose
    /// generation is already gone is left detached.
    pub(crate) fn attach_driver(
        &mut self,
        kind: NetworkKind,
        generation: u64,
        driver: JoinHandle<()>,
    ) {
        if let Some(Slot::Pending(pending)) = self.slots.get_mut(&kind) {
            if pending.generation == generation {
                pending.driver = Some(driver);
            }
        }
    }

    /// Apply the platform's answer for `generation`.
    pub(crate) fn resolve(
        &mut self,
        kind: NetworkKind,
        generation: u64,
        outcome: RequestOutcome,
    ) -> Resolution {
        let current = matches!(
            self.slots.get(&kind),
            Some(Slot::Pending(pending)) if pending.generation == generation
        );
        if !current {
            // Whoever withdrew it already counted the clear.
            return Resolution::Withdrawn;
        }
        let Some(Slot::Pending(pending)) = self.slots.remove(&kind) else {
            return Resolution::Withdrawn;
        };
        let PendingSlot {
            waiting, outcome: tx, ..
        } = pending;

        let resolution = match outcome {
            RequestOutcome::Confirmed if waiting.is_empty() => {
                self.owe_clear(kind);
                Resolution::Withdrawn
            }
            RequestOutcome::Confirmed => {
                for cell in waiting.values() {
                    cell.open();
                }
                let holders = waiting.len();
                self.slots
                    .insert(kind, Slot::Active(ActiveSlot { leases: waiting }));
                Resolution::Granted { holders }
            }
            RequestOutcome::Denied => {
                for cell in waiting.values() {
                    cell.close();
                }
                Resolution::Denied {
                    waiters: waiting.len(),
                }
            }
        };

        // Cells are settled before waiters are woken.
        tx.send_replace(Some(outcome));
        resolution
    }

    // ── Release path ─────────────────────────────────────────────────

    /// Roll back a waiter that timed out or was cancelled.
    pub(crate) fn abandon(&mut self, kind: NetworkKind, id: LeaseId) -> Abandon {
        match self.slots.get_mut(&kind) {
            Some(Slot::Pending(pending)) => {
                let Some(cell) = pending.waiting.remove(&id) else {
                    return Abandon::NotFound;
                };
                cell.close();
                if !pending.waiting.is_empty() {
                    return Abandon::Left {
                        waiters: pending.waiting.len(),
                    };
                }
                let Some(Slot::Pending(pending)) = self.slots.remove(&kind) else {
                    return Abandon::NotFound;
                };
                self.owe_clear(kind);
                Abandon::LastWaiter {
                    driver: pending.withdraw(),
                }
            }
            Some(Slot::Active(_)) => Abandon::Released(self.release(kind, id)),
            None => Abandon::NotFound,
        }
    }

    pub(crate) fn release(&mut self, kind: NetworkKind, id: LeaseId) -> Release {
        let Some(Slot::Active(active)) = self.slots.get_mut(&kind) else {
            return Release::NoOp;
        };
        let Some(cell) = active.leases.remove(&id) else {
            return Release::NoOp;
        };
        cell.close();
        if active.leases.is_empty() {
            self.slots.remove(&kind);
            self.owe_clear(kind);
            Release::LastHolder
        } else {
            Release::Remaining(active.leases.len())
        }
    }

    // ── Platform ordering ────────────────────────────────────────────

    fn owe_clear(&mut self, kind: NetworkKind) {
        *self.owed.entry(kind).or_default() += 1;
    }

    /// A clear counted by an earlier transition has reached the platform.
    pub(crate) fn settle_clear(&mut self, kind: NetworkKind) {
        if let Some(owed) = self.owed.get_mut(&kind) {
            *owed = owed.saturating_sub(1);
            if *owed == 0 {
                self.owed.remove(&kind);
            }
        }
    }

    /// Clears for `kind` still on their way to the platform.
    pub(crate) fn owed_clears(&self, kind: NetworkKind) -> usize {
        self.owed.get(&kind).copied().unwrap_or(0)
    }

    // ── Availability ─────────────────────────────────────────────────

    /// Record the kinds currently present (any instance not Lost) and
    /// purge active kinds that just dropped out. Their leases are
    /// invalidated.
    ///
    /// A kind granted before any instance was reported is left alone until
    /// it has been seen once.
    pub(crate) fn update_availability(&mut self, present: BTreeSet<NetworkKind>) -> Vec<LostKind> {
        let gone: Vec<NetworkKind> = self.present.difference(&present).copied().collect();
        self.present = present;

        let mut lost = Vec::new();
        for kind in gone {
            if !matches!(self.slots.get(&kind), Some(Slot::Active(_))) {
                continue;
            }
            let Some(Slot::Active(active)) = self.slots.remove(&kind) else {
                continue;
            };
            for cell in active.leases.values() {
                cell.invalidate();
            }
            self.owe_clear(kind);
            lost.push(LostKind {
                kind,
                leases: active.leases.len(),
            });
        }
        lost
    }

    /// Empty the table, invalidating every lease and waiter.
    pub(crate) fn drain(&mut self) -> Vec<Drained> {
        let slots: Vec<(NetworkKind, Slot)> = self.slots.drain().collect();
        slots
            .into_iter()
            .map(|(kind, slot)| {
                self.owe_clear(kind);
                match slot {
                    Slot::Active(active) => {
                        for cell in active.leases.values() {
                            cell.invalidate();
                        }
                        Drained::Active(kind)
                    }
                    Slot::Pending(pending) => {
                        for cell in pending.waiting.values() {
                            cell.invalidate();
                        }
                        Drained::Pending(kind, pending.withdraw())
                    }
                }
            })
            .collect()
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    pub(crate) fn ref_count(&self, kind: NetworkKind) -> usize {
        match self.slots.get(&kind) {
            Some(Slot::Active(active)) => active.leases.len(),
            _ => 0,
        }
    }

    pub(crate) fn active_kinds(&self) -> BTreeSet<NetworkKind> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub(crate) fn is_pending(&self, kind: NetworkKind) -> bool {
        matches!(self.slots.get(&kind), Some(Slot::Pending(_)))
    }
}
