// ── In-memory platform ──
//
// Scripted `NetworkRequester` used by tests and the `simulate` command.
// Answers are driven by tokio timers so paused-clock tests stay
// deterministic.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{NetworkRequester, RequestOutcome};
use crate::model::NetworkKind;

/// How the simulated platform answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Confirm,
    ConfirmAfter(Duration),
    Deny,
    DenyAfter(Duration),
    /// Never answer.
    Never,
}

#[derive(Default)]
struct SimState {
    default_behavior: Option<Behavior>,
    behaviors: HashMap<NetworkKind, Behavior>,
    requests: HashMap<NetworkKind, usize>,
    clears: HashMap<NetworkKind, usize>,
    pinned: BTreeSet<NetworkKind>,
}

impl SimState {
    fn behavior(&self, kind: NetworkKind) -> Behavior {
        self.behaviors
            .get(&kind)
            .copied()
            .or(self.default_behavior)
            .unwrap_or(Behavior::Confirm)
    }
}

/// Simulated platform requester. Clones share state.
#[derive(Clone, Default)]
pub struct SimulatedRequester {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRequester {
    /// A platform that confirms every request immediately.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_behavior(self, kind: NetworkKind, behavior: Behavior) -> Self {
        self.set_behavior(kind, behavior);
        self
    }

    /// Behavior for kinds without an explicit one.
    #[must_use]
    pub fn with_default_behavior(self, behavior: Behavior) -> Self {
        self.lock().default_behavior = Some(behavior);
        self
    }

    pub fn set_behavior(&self, kind: NetworkKind, behavior: Behavior) {
        self.lock().behaviors.insert(kind, behavior);
    }

    /// Number of `request_network` calls for `kind`.
    pub fn request_count(&self, kind: NetworkKind) -> usize {
        self.lock().requests.get(&kind).copied().unwrap_or(0)
    }

    /// Number of `clear_request` calls for `kind`.
    pub fn clear_count(&self, kind: NetworkKind) -> usize {
        self.lock().clears.get(&kind).copied().unwrap_or(0)
    }

    /// Kinds with a confirmed request that has not been cleared.
    pub fn pinned(&self) -> BTreeSet<NetworkKind> {
        self.lock().pinned.clone()
    }

    pub fn is_pinned(&self, kind: NetworkKind) -> bool {
        self.lock().pinned.contains(&kind)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl NetworkRequester for SimulatedRequester {
    async fn request_network(&self, kind: NetworkKind) -> RequestOutcome {
        let behavior = {
            let mut state = self.lock();
            *state.requests.entry(kind).or_default() += 1;
            state.behavior(kind)
        };
        debug!(kind = %kind, ?behavior, "simulated platform request");

        let outcome = match behavior {
            Behavior::Confirm => RequestOutcome::Confirmed,
            Behavior::Deny => RequestOutcome::Denied,
            Behavior::ConfirmAfter(delay) => {
                tokio::time::sleep(delay).await;
                RequestOutcome::Confirmed
            }
            Behavior::DenyAfter(delay) => {
                tokio::time::sleep(delay).await;
                RequestOutcome::Denied
            }
            Behavior::Never => std::future::pending().await,
        };

        if outcome == RequestOutcome::Confirmed {
            self.lock().pinned.insert(kind);
        }
        outcome
    }

    fn clear_request(&self, kind: NetworkKind) {
        let mut state = self.lock();
        *state.clears.entry(kind).or_default() += 1;
        state.pinned.remove(&kind);
        debug!(kind = %kind, "simulated platform request cleared");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn confirms_by_default_and_pins() {
        let platform = SimulatedRequester::new();
        assert_eq!(
            platform.request_network(NetworkKind::Wifi).await,
            RequestOutcome::Confirmed
        );
        assert!(platform.is_pinned(NetworkKind::Wifi));
        assert_eq!(platform.request_count(NetworkKind::Wifi), 1);

        platform.clear_request(NetworkKind::Wifi);
        assert!(platform.pinned().is_empty());
        assert_eq!(platform.clear_count(NetworkKind::Wifi), 1);
    }

    #[tokio::test]
    async fn per_kind_behavior_overrides_default() {
        let platform = SimulatedRequester::new()
            .with_default_behavior(Behavior::Deny)
            .with_behavior(NetworkKind::Cellular, Behavior::Confirm);

        assert_eq!(
            platform.request_network(NetworkKind::Wifi).await,
            RequestOutcome::Denied
        );
        assert_eq!(
            platform.request_network(NetworkKind::Cellular).await,
            RequestOutcome::Confirmed
        );
        assert!(!platform.is_pinned(NetworkKind::Wifi));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_answers_follow_the_clock() {
        let platform = SimulatedRequester::new()
            .with_behavior(NetworkKind::Wifi, Behavior::ConfirmAfter(Duration::from_secs(3)));

        let started = tokio::time::Instant::now();
        let outcome = platform.request_network(NetworkKind::Wifi).await;
        assert_eq!(outcome, RequestOutcome::Confirmed);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn never_does_not_resolve() {
        let platform = SimulatedRequester::new().with_behavior(NetworkKind::Wifi, Behavior::Never);
        let result = tokio::time::timeout(
            Duration::from_secs(60),
            platform.request_network(NetworkKind::Wifi),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(platform.request_count(NetworkKind::Wifi), 1);
    }
}
