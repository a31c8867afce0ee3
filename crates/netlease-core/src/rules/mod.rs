// ── Rules engine ──
//
// Pure mapping from (request type, Networks snapshot, caller intent) to an
// ordered list of acceptable interface kinds. Stateless apart from the
// shared, read-only policy table; safe to call from any task.

pub mod policy;

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::model::{
    CallerIntent, HighBandwidthRequest, NetworkId, NetworkKind, NetworkStatus, Networks,
    RequestType, WaitPolicy,
};

pub use policy::{Modifier, PolicyEntry, PolicyRule, PolicyTable};

// ── Verdicts ────────────────────────────────────────────────────────

/// Outcome for one preference entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum Verdict {
    Kept,
    NoAvailableInstance,
    ModifierFailed { modifier: Modifier },
}

impl Verdict {
    pub fn is_kept(self) -> bool {
        matches!(self, Self::Kept)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryVerdict {
    pub entry: PolicyEntry,
    #[serde(flatten)]
    pub verdict: Verdict,
    /// Available instances the entry admitted.
    pub admitted: Vec<NetworkId>,
}

/// Per-entry breakdown of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub request: RequestType,
    /// `true` when the request type had no policy and the WiFi fallback was
    /// used.
    pub fallback: bool,
    pub entries: Vec<EntryVerdict>,
}

impl Explanation {
    /// Kept kinds in preference order, each listed once.
    pub fn kinds(&self) -> Vec<NetworkKind> {
        let mut kinds = Vec::new();
        for entry in self.entries.iter().filter(|e| e.verdict.is_kept()) {
            if !kinds.contains(&entry.entry.kind) {
                kinds.push(entry.entry.kind);
            }
        }
        kinds
    }
}

/// Whether a caller may use one specific instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "check", rename_all = "kebab-case")]
pub enum RequestCheck {
    Allowed,
    /// The instance's kind is not listed for the request type.
    NotInPolicy,
    Unavailable,
    ModifierFailed { modifier: Modifier },
}

impl RequestCheck {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

// ── Free functions ──────────────────────────────────────────────────

/// Acceptable kinds for `request`, most preferred first, with the default
/// caller intent. An empty list means deny.
pub fn evaluate(request: RequestType, networks: &Networks, policy: &PolicyTable) -> Vec<NetworkKind> {
    evaluate_with_intent(request, networks, policy, &CallerIntent::default())
}

pub fn evaluate_with_intent(
    request: RequestType,
    networks: &Networks,
    policy: &PolicyTable,
    intent: &CallerIntent,
) -> Vec<NetworkKind> {
    explain(request, networks, policy, intent).kinds()
}

/// Evaluate every preference entry and report why each was kept or
/// dropped.
///
/// A request type missing from `policy` falls back to a single plain WiFi
/// entry and logs a warning. The fallback is filtered like any other entry.
pub fn explain(
    request: RequestType,
    networks: &Networks,
    policy: &PolicyTable,
    intent: &CallerIntent,
) -> Explanation {
    let (preferences, fallback) = preferences_for(request, policy);

    let entries = preferences
        .into_iter()
        .map(|entry| {
            let (verdict, admitted) = judge(&entry, networks, *intent);
            EntryVerdict {
                entry,
                verdict,
                admitted,
            }
        })
        .collect();

    Explanation {
        request,
        fallback,
        entries,
    }
}

fn preferences_for(request: RequestType, policy: &PolicyTable) -> (Vec<PolicyEntry>, bool) {
    match policy.get(request) {
        Some(rule) => (rule.preferences.clone(), false),
        None => {
            warn!(request = %request, "no policy for request type, falling back to wifi");
            (vec![PolicyEntry::new(NetworkKind::Wifi)], true)
        }
    }
}

fn judge(
    entry: &PolicyEntry,
    networks: &Networks,
    intent: CallerIntent,
) -> (Verdict, Vec<NetworkId>) {
    let mut admitted = Vec::new();
    let mut first_failure = None;

    for status in networks.available(entry.kind) {
        match entry.admits(status, &intent) {
            Ok(()) => admitted.push(status.id.clone()),
            Err(modifier) => {
                first_failure.get_or_insert(modifier);
            }
        }
    }

    let verdict = match (admitted.is_empty(), first_failure) {
        (false, _) => Verdict::Kept,
        (true, Some(modifier)) => Verdict::ModifierFailed { modifier },
        (true, None) => Verdict::NoAvailableInstance,
    };
    (verdict, admitted)
}

// ── RulesEngine ─────────────────────────────────────────────────────

/// Policy-bound rules engine. Cheap to clone; the table is shared.
#[derive(Debug, Clone)]
pub struct RulesEngine {
    policy: Arc<PolicyTable>,
}

impl RulesEngine {
    pub fn new(policy: PolicyTable) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    pub fn evaluate(&self, request: RequestType, networks: &Networks) -> Vec<NetworkKind> {
        evaluate(request, networks, &self.policy)
    }

    pub fn evaluate_with_intent(
        &self,
        request: RequestType,
        networks: &Networks,
        intent: &CallerIntent,
    ) -> Vec<NetworkKind> {
        evaluate_with_intent(request, networks, &self.policy, intent)
    }

    pub fn explain(
        &self,
        request: RequestType,
        networks: &Networks,
        intent: &CallerIntent,
    ) -> Explanation {
        explain(request, networks, &self.policy, intent)
    }

    /// Whether `request` should go through the lease mediator. Request
    /// types without a policy are never high-bandwidth.
    pub fn is_high_bandwidth(&self, request: RequestType) -> bool {
        self.policy
            .get(request)
            .is_some_and(|rule| rule.high_bandwidth)
    }

    /// May the caller use `status` for `request`?
    pub fn check_request(
        &self,
        request: RequestType,
        status: &NetworkStatus,
        intent: &CallerIntent,
    ) -> RequestCheck {
        let (preferences, _) = preferences_for(request, &self.policy);
        let mut matching = preferences
            .iter()
            .filter(|entry| entry.kind == status.kind())
            .peekable();

        if matching.peek().is_none() {
            return RequestCheck::NotInPolicy;
        }
        if !status.is_available() {
            return RequestCheck::Unavailable;
        }

        let mut first_failure = None;
        for entry in matching {
            match entry.admits(status, intent) {
                Ok(()) => return RequestCheck::Allowed,
                Err(modifier) => {
                    first_failure.get_or_insert(modifier);
                }
            }
        }
        first_failure.map_or(RequestCheck::NotInPolicy, |modifier| {
            RequestCheck::ModifierFailed { modifier }
        })
    }

    /// The concrete instance to bind for `request`.
    ///
    /// The default route is used when it is of the first acceptable kind
    /// and admitted; otherwise the most recently added admitted instance of
    /// that kind.
    pub fn preferred_network<'a>(
        &self,
        request: RequestType,
        networks: &'a Networks,
        intent: &CallerIntent,
    ) -> Option<&'a NetworkStatus> {
        let kind = *self.evaluate_with_intent(request, networks, intent).first()?;
        let allowed = |s: &NetworkStatus| self.check_request(request, s, intent).is_allowed();

        if let Some(default) = networks.default_network() {
            if default.kind() == kind && allowed(default) {
                return Some(default);
            }
        }
        networks.available(kind).filter(|s| allowed(s)).last()
    }

    /// Build a lease request from the policy order.
    ///
    /// Unlike [`evaluate`](Self::evaluate), kinds with no Available instance
    /// are kept since the platform may bring them up on demand. A kind is
    /// only dropped when it has Available instances and every one of them
    /// fails its modifiers.
    pub fn high_bandwidth_request(
        &self,
        request: RequestType,
        networks: &Networks,
        intent: &CallerIntent,
        wait: WaitPolicy,
    ) -> HighBandwidthRequest {
        let (preferences, _) = preferences_for(request, &self.policy);
        let mut acceptable = Vec::new();

        for entry in &preferences {
            if acceptable.contains(&entry.kind) {
                continue;
            }
            let mut known = networks.available(entry.kind).peekable();
            let keep = known.peek().is_none() || known.any(|s| entry.admits(s, intent).is_ok());
            if keep {
                acceptable.push(entry.kind);
            }
        }

        HighBandwidthRequest::new(acceptable, wait)
    }
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new(PolicyTable::conservative())
    }
}
