// ── Runtime tuning ──
//
// These types describe how the core components behave at runtime. They
// never touch disk: `netlease-config` builds them from the TOML file and
// environment, tests build them directly.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Network observer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverConfig {
    /// How long a `Lost` instance stays observable before it is purged.
    pub lost_grace: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            lost_grace: Duration::from_secs(5),
        }
    }
}

/// Lease mediator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediatorConfig {
    /// Upper bound on how long a `FailFast` request waits for the platform,
    /// across all of its candidates.
    pub fail_fast_grace: Duration,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            fail_fast_grace: Duration::from_millis(500),
        }
    }
}

/// Shape of the usage accounting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodWindow {
    /// The trailing `length` ending now.
    Rolling(Duration),
    /// Back-to-back periods of `length` starting at `anchor`.
    Fixed {
        length: Duration,
        anchor: DateTime<Utc>,
    },
}

impl PeriodWindow {
    pub fn length(&self) -> Duration {
        match self {
            Self::Rolling(length) | Self::Fixed { length, .. } => *length,
        }
    }
}

/// Usage ledger tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    pub window: PeriodWindow,
    /// Interval for periodic recomputation, if a ticker is spawned.
    pub tick_interval: Option<Duration>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            window: PeriodWindow::Rolling(Duration::from_secs(24 * 60 * 60)),
            tick_interval: Some(Duration::from_secs(60)),
        }
    }
}
