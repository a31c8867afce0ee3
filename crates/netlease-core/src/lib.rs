// netlease-core: Network arbitration between platform connectivity events and transfer callers.

pub mod config;
pub mod error;
pub mod ledger;
pub mod mediator;
pub mod model;
pub mod observer;
pub mod platform;
pub mod rules;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{LedgerConfig, MediatorConfig, ObserverConfig, PeriodWindow};
pub use error::CoreError;
pub use ledger::{Clock, SystemClock, UsageLedger};
pub use mediator::{Lease, LeaseId, LeaseMediator, LeaseStatus};
pub use observer::{NetworkEvent, NetworkObserver};
pub use platform::{Behavior, NetworkRequester, RequestOutcome, SimulatedRequester};
pub use rules::{
    EntryVerdict, Explanation, Modifier, PolicyEntry, PolicyRule, PolicyTable, RequestCheck,
    RulesEngine, Verdict,
};
pub use stream::{SnapshotStream, SnapshotWatchStream};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Interfaces
    Capabilities, NetworkId, NetworkKind, NetworkStatus, NetworkType, Networks, SocketBinder,
    SocketTarget, Status,
    // Requests
    CallerIntent, HighBandwidthRequest, MediaRequestKind, RequestType, WaitPolicy,
    // Usage
    UsagePeriod, UsageRecord,
};
