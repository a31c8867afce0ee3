// ── Lease handle ──

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::watch;
use uuid::Uuid;

use super::MediatorInner;
use crate::model::NetworkKind;

/// Unique lease identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(Uuid);

impl LeaseId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a lease. `Closed` and `Invalidated` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LeaseStatus {
    /// Waiting for the platform; never observed on a handed-out lease.
    Pending,
    Open,
    /// Released by its holder.
    Closed,
    /// The granted network went away underneath the holder.
    Invalidated,
}

impl LeaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Invalidated)
    }
}

/// Shared status cell. The table owns one per claim; transitions happen
/// only under the table lock and only move forward.
#[derive(Debug)]
pub(crate) struct LeaseCell {
    status: watch::Sender<LeaseStatus>,
}

impl LeaseCell {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(LeaseStatus::Pending);
        Self { status }
    }

    pub(crate) fn status(&self) -> LeaseStatus {
        *self.status.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LeaseStatus> {
        self.status.subscribe()
    }

    pub(crate) fn open(&self) -> bool {
        self.transition(|s| (s == LeaseStatus::Pending).then_some(LeaseStatus::Open))
    }

    pub(crate) fn close(&self) -> bool {
        self.transition(|s| (!s.is_terminal()).then_some(LeaseStatus::Closed))
    }

    pub(crate) fn invalidate(&self) -> bool {
        self.transition(|s| (!s.is_terminal()).then_some(LeaseStatus::Invalidated))
    }

    fn transition(&self, next: impl FnOnce(LeaseStatus) -> Option<LeaseStatus>) -> bool {
        self.status.send_if_modified(|status| match next(*status) {
            Some(next) => {
                *status = next;
                true
            }
            None => false,
        })
    }
}

/// A caller's share of a platform network request.
///
/// Closing is idempotent and infallible; dropping a lease closes it. Once
/// closed or invalidated a lease never reopens.
#[derive(Debug)]
pub struct Lease {
    id: LeaseId,
    granted: NetworkKind,
    cell: Arc<LeaseCell>,
    mediator: Weak<MediatorInner>,
}

impl Lease {
    pub(crate) fn new(
        id: LeaseId,
        granted: NetworkKind,
        cell: Arc<LeaseCell>,
        mediator: Weak<MediatorInner>,
    ) -> Self {
        Self {
            id,
            granted,
            cell,
            mediator,
        }
    }

    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn granted_type(&self) -> NetworkKind {
        self.granted
    }

    pub fn status(&self) -> LeaseStatus {
        self.cell.status()
    }

    /// `true` while the lease is open.
    pub fn is_valid(&self) -> bool {
        self.status() == LeaseStatus::Open
    }

    /// Resolve once the lease is no longer open, returning its terminal
    /// status.
    pub async fn invalidated(&self) -> LeaseStatus {
        let mut rx = self.cell.subscribe();
        rx.wait_for(|s| s.is_terminal())
            .await
            .map_or_else(|_| self.cell.status(), |status| *status)
    }

    /// Release this lease. Later calls do nothing.
    pub fn close(&self) {
        match self.mediator.upgrade() {
            Some(mediator) => mediator.release(self.granted, self.id),
            None => {
                self.cell.close();
            }
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.cell.status().is_terminal() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_moves_forward_only() {
        let cell = LeaseCell::new();
        assert_eq!(cell.status(), LeaseStatus::Pending);
        assert!(cell.open());
        assert!(!cell.open());
        assert!(cell.invalidate());
        assert!(!cell.close());
        assert!(!cell.open());
        assert_eq!(cell.status(), LeaseStatus::Invalidated);
    }

    #[test]
    fn pending_cell_can_be_closed() {
        let cell = LeaseCell::new();
        assert!(cell.close());
        assert_eq!(cell.status(), LeaseStatus::Closed);
    }

    #[test]
    fn detached_lease_closes_locally() {
        let cell = Arc::new(LeaseCell::new());
        cell.open();
        let lease = Lease::new(LeaseId::new(), NetworkKind::Wifi, Arc::clone(&cell), Weak::new());
        assert!(lease.is_valid());

        lease.close();
        lease.close();
        assert_eq!(lease.status(), LeaseStatus::Closed);
    }

    #[tokio::test]
    async fn invalidated_resolves_on_terminal_status() {
        let cell = Arc::new(LeaseCell::new());
        cell.open();
        let lease = Lease::new(LeaseId::new(), NetworkKind::Wifi, Arc::clone(&cell), Weak::new());

        let waiter = async { lease.invalidated().await };
        cell.invalidate();
        assert_eq!(waiter.await, LeaseStatus::Invalidated);
    }
}
