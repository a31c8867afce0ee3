// ── Declarative policy table ──
//
// RequestType → ordered preference entries. Loaded once (from
// `netlease-config` or `PolicyTable::conservative()`) and consumed by the
// pure rules engine.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{CallerIntent, MediaRequestKind, NetworkKind, NetworkStatus, RequestType};

// ── Modifier ────────────────────────────────────────────────────────

/// A condition an interface instance must meet for a preference entry to
/// admit it.
///
/// Rendered as `not-roaming`, `metered-opt-in`, `min-signal:<dBm>` or
/// `min-bandwidth:<kbps>`, which is also the serde form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Modifier {
    /// Reject roaming cellular instances.
    NotRoaming,
    /// Metered instances need the caller's explicit opt-in.
    MeteredOptIn,
    /// Minimum WiFi signal level in dBm. Unreported levels pass.
    MinSignal(i32),
    /// Minimum estimated bandwidth in kbit/s. Unreported estimates pass.
    MinBandwidthKbps(u64),
}

impl Modifier {
    pub fn admits(self, status: &NetworkStatus, intent: &CallerIntent) -> bool {
        match self {
            Self::NotRoaming => !status.network_type.is_roaming(),
            Self::MeteredOptIn => !status.is_metered() || intent.allow_metered,
            Self::MinSignal(min) => status
                .network_type
                .signal_level()
                .is_none_or(|level| level >= min),
            Self::MinBandwidthKbps(min) => status
                .capabilities
                .estimated_bandwidth_kbps
                .is_none_or(|kbps| kbps >= min),
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRoaming => f.write_str("not-roaming"),
            Self::MeteredOptIn => f.write_str("metered-opt-in"),
            Self::MinSignal(dbm) => write!(f, "min-signal:{dbm}"),
            Self::MinBandwidthKbps(kbps) => write!(f, "min-bandwidth:{kbps}"),
        }
    }
}

impl FromStr for Modifier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CoreError::InvalidModifier {
            value: s.to_owned(),
            reason: reason.to_owned(),
        };

        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let (name, arg) = match normalized.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (normalized.as_str(), None),
        };

        match (name, arg) {
            ("not-roaming", None) => Ok(Self::NotRoaming),
            ("metered-opt-in", None) => Ok(Self::MeteredOptIn),
            ("min-signal", Some(arg)) => arg
                .parse()
                .map(Self::MinSignal)
                .map_err(|_| invalid("expected a signal level in dBm")),
            ("min-bandwidth", Some(arg)) => arg
                .parse()
                .map(Self::MinBandwidthKbps)
                .map_err(|_| invalid("expected a bandwidth in kbit/s")),
            ("not-roaming" | "metered-opt-in", Some(_)) => Err(invalid("takes no argument")),
            ("min-signal" | "min-bandwidth", None) => Err(invalid("missing ':<value>' argument")),
            _ => Err(invalid("unknown modifier")),
        }
    }
}

impl TryFrom<String> for Modifier {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Modifier> for String {
    fn from(value: Modifier) -> Self {
        value.to_string()
    }
}

// ── PolicyEntry ─────────────────────────────────────────────────────

/// One preference: an interface kind plus the conditions it must meet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub kind: NetworkKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<Modifier>,
}

impl PolicyEntry {
    pub fn new(kind: NetworkKind) -> Self {
        Self {
            kind,
            modifiers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Check `status` against every modifier, returning the first that
    /// rejects it. The kind is not checked here.
    pub fn admits(&self, status: &NetworkStatus, intent: &CallerIntent) -> Result<(), Modifier> {
        match self.modifiers.iter().find(|m| !m.admits(status, intent)) {
            Some(failed) => Err(*failed),
            None => Ok(()),
        }
    }
}

impl From<NetworkKind> for PolicyEntry {
    fn from(kind: NetworkKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for PolicyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.modifiers.is_empty() {
            let mods: Vec<String> = self.modifiers.iter().map(ToString::to_string).collect();
            write!(f, "({})", mods.join(", "))?;
        }
        Ok(())
    }
}

// ── PolicyRule / PolicyTable ────────────────────────────────────────

/// Preferences for one request type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Ordered, most preferred first.
    pub preferences: Vec<PolicyEntry>,
    /// Whether requests of this type should go through the lease mediator.
    #[serde(default)]
    pub high_bandwidth: bool,
}

impl PolicyRule {
    pub fn new(preferences: impl IntoIterator<Item = PolicyEntry>) -> Self {
        Self {
            preferences: preferences.into_iter().collect(),
            high_bandwidth: false,
        }
    }

    #[must_use]
    pub fn high_bandwidth(mut self) -> Self {
        self.high_bandwidth = true;
        self
    }
}

/// RequestType → [`PolicyRule`], in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyTable {
    rules: IndexMap<RequestType, PolicyRule>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in table used when no configuration supplies one.
    ///
    /// Bulk media prefers WiFi and only falls back to cellular when not
    /// roaming. Small background work may also ride a paired Bluetooth
    /// link. Log uploads are WiFi-only.
    pub fn conservative() -> Self {
        use Modifier::{MeteredOptIn, NotRoaming};
        use NetworkKind::{Bluetooth, Cellular, Wifi};

        let wifi = || PolicyEntry::new(Wifi);
        let bluetooth = || PolicyEntry::new(Bluetooth);
        let cellular = |mods: &[Modifier]| PolicyEntry {
            kind: Cellular,
            modifiers: mods.to_vec(),
        };

        Self::new()
            .with_rule(
                RequestType::Media(MediaRequestKind::Download),
                PolicyRule::new([wifi(), cellular(&[NotRoaming, MeteredOptIn])]).high_bandwidth(),
            )
            .with_rule(
                RequestType::Media(MediaRequestKind::Playback),
                PolicyRule::new([wifi(), cellular(&[NotRoaming])]).high_bandwidth(),
            )
            .with_rule(
                RequestType::Media(MediaRequestKind::Live),
                PolicyRule::new([wifi(), cellular(&[NotRoaming])]).high_bandwidth(),
            )
            .with_rule(
                RequestType::Sync,
                PolicyRule::new([bluetooth(), wifi(), cellular(&[NotRoaming, MeteredOptIn])]),
            )
            .with_rule(
                RequestType::Image,
                PolicyRule::new([bluetooth(), wifi(), cellular(&[NotRoaming])]),
            )
            .with_rule(
                RequestType::Api,
                PolicyRule::new([bluetooth(), wifi(), cellular(&[])]),
            )
            .with_rule(RequestType::LogsUpload, PolicyRule::new([wifi()]))
    }

    #[must_use]
    pub fn with_rule(mut self, request: RequestType, rule: PolicyRule) -> Self {
        self.insert(request, rule);
        self
    }

    pub fn insert(&mut self, request: RequestType, rule: PolicyRule) -> Option<PolicyRule> {
        self.rules.insert(request, rule)
    }

    pub fn get(&self, request: RequestType) -> Option<&PolicyRule> {
        self.rules.get(&request)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RequestType, &PolicyRule)> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{Capabilities, NetworkType, Status};

    fn cellular(roaming: bool, metered: bool) -> NetworkStatus {
        NetworkStatus::new(
            "rmnet0",
            NetworkType::Cellular {
                carrier: None,
                roaming,
            },
            Status::Available,
        )
        .with_capabilities(Capabilities {
            metered,
            estimated_bandwidth_kbps: None,
        })
    }

    #[test]
    fn modifier_parses_all_forms() {
        assert_eq!("not-roaming".parse::<Modifier>().unwrap(), Modifier::NotRoaming);
        assert_eq!("Metered_Opt_In".parse::<Modifier>().unwrap(), Modifier::MeteredOptIn);
        assert_eq!("min-signal:-70".parse::<Modifier>().unwrap(), Modifier::MinSignal(-70));
        assert_eq!(
            "min-bandwidth: 5000".parse::<Modifier>().unwrap(),
            Modifier::MinBandwidthKbps(5000)
        );
    }

    #[test]
    fn modifier_rejects_bad_input() {
        for bad in ["fast", "min-signal", "min-signal:loud", "not-roaming:1"] {
            assert!(
                matches!(bad.parse::<Modifier>(), Err(CoreError::InvalidModifier { .. })),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn modifier_display_parses_back() {
        let m = Modifier::MinSignal(-65);
        assert_eq!(m.to_string(), "min-signal:-65");
        assert_eq!(m.to_string().parse::<Modifier>().unwrap(), m);
    }

    #[test]
    fn not_roaming_rejects_roaming_cellular() {
        let intent = CallerIntent::default();
        assert!(!Modifier::NotRoaming.admits(&cellular(true, false), &intent));
        assert!(Modifier::NotRoaming.admits(&cellular(false, false), &intent));
    }

    #[test]
    fn metered_opt_in_follows_intent() {
        let metered = cellular(false, true);
        assert!(!Modifier::MeteredOptIn.admits(&metered, &CallerIntent::default()));
        assert!(Modifier::MeteredOptIn.admits(&metered, &CallerIntent::allow_metered()));
    }

    #[test]
    fn unreported_measurements_pass() {
        let intent = CallerIntent::default();
        let wifi = NetworkStatus::new("wlan0", NetworkType::bare(NetworkKind::Wifi), Status::Available);
        assert!(Modifier::MinSignal(-50).admits(&wifi, &intent));
        assert!(Modifier::MinBandwidthKbps(10_000).admits(&wifi, &intent));
    }

    #[test]
    fn entry_reports_first_failing_modifier() {
        let entry = PolicyEntry::new(NetworkKind::Cellular)
            .with_modifier(Modifier::NotRoaming)
            .with_modifier(Modifier::MeteredOptIn);
        let err = entry
            .admits(&cellular(true, true), &CallerIntent::default())
            .unwrap_err();
        assert_eq!(err, Modifier::NotRoaming);
        assert_eq!(entry.to_string(), "cellular(not-roaming, metered-opt-in)");
    }

    #[test]
    fn conservative_table_covers_every_request_type() {
        let table = PolicyTable::conservative();
        for request in RequestType::ALL {
            assert!(table.get(request).is_some(), "{request} missing");
        }
        assert!(table.get(RequestType::Media(MediaRequestKind::Download)).unwrap().high_bandwidth);
        assert!(!table.get(RequestType::Api).unwrap().high_bandwidth);
    }

    #[test]
    fn table_serializes_as_map_of_names() {
        let table = PolicyTable::new().with_rule(
            RequestType::LogsUpload,
            PolicyRule::new([PolicyEntry::new(NetworkKind::Wifi)]),
        );
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["logs-upload"]["preferences"][0]["kind"], "wifi");

        let back: PolicyTable = serde_json::from_value(json).unwrap();
        assert_eq!(back, table);
    }
}
