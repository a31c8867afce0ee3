// ── Platform network requester ──
//
// The contract the lease mediator drives to bring a radio up and to let it
// go again. Confirm/deny from `request_network` is the only truth the
// mediator trusts about whether a platform request is live.

mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::model::NetworkKind;

pub use simulated::{Behavior, SimulatedRequester};

/// Platform answer to a network request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RequestOutcome {
    Confirmed,
    Denied,
}

/// Asks the OS to activate and hold an interface of a given kind.
///
/// Implementations must tolerate `clear_request` for a kind that has no
/// live request, and a `request_network` future being dropped before it
/// resolves (the mediator abandons requests nobody waits for any more).
#[async_trait]
pub trait NetworkRequester: Send + Sync + 'static {
    /// Request the interface and wait for the platform's answer. May never
    /// resolve; callers bound the wait themselves.
    async fn request_network(&self, kind: NetworkKind) -> RequestOutcome;

    /// Withdraw any request for `kind`.
    fn clear_request(&self, kind: NetworkKind);
}
