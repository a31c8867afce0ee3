// ── Domain model ──
//
// Canonical types shared by the observer, rules engine, mediator and
// ledger. Everything here is plain data; behaviour lives in the
// component modules.

pub mod network;
pub mod request;
pub mod usage;

// ── Re-exports ──────────────────────────────────────────────────────

pub use network::{
    Capabilities, NetworkId, NetworkKind, NetworkStatus, NetworkType, Networks, SocketBinder,
    SocketTarget, Status,
};
pub use request::{CallerIntent, HighBandwidthRequest, MediaRequestKind, RequestType, WaitPolicy};
pub use usage::{UsagePeriod, UsageRecord};
