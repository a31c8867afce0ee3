// ── Network interface domain types ──
//
// A `NetworkStatus` describes one interface instance as reported by the
// platform. `Networks` is the immutable snapshot the observer publishes.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, TcpStream, UdpSocket};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::CoreError;

// ── NetworkId ───────────────────────────────────────────────────────

/// Stable identifier of one interface instance (e.g. `wlan0`, or a
/// platform handle rendered as a string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NetworkId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NetworkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── NetworkKind ─────────────────────────────────────────────────────

/// Class of physical interface, without any per-instance detail.
///
/// This is the key for policy entries, mediator table slots, lease grants
/// and usage totals.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NetworkKind {
    Wifi,
    Cellular,
    Bluetooth,
    Unknown,
}

impl NetworkKind {
    /// Relative capability used for default-route selection. Higher wins.
    pub fn capability_rank(self) -> u8 {
        match self {
            Self::Wifi => 3,
            Self::Cellular => 2,
            Self::Bluetooth => 1,
            Self::Unknown => 0,
        }
    }

    /// Parse a kind name, mapping the strum error into [`CoreError`].
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        raw.trim()
            .parse()
            .map_err(|_| CoreError::UnknownNetworkKind {
                value: raw.to_owned(),
            })
    }
}

// ── NetworkType ─────────────────────────────────────────────────────

/// Interface class together with the details the platform reports for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NetworkType {
    Wifi {
        ssid: Option<String>,
        /// Signal level in dBm.
        signal_level: Option<i32>,
    },
    Cellular {
        carrier: Option<String>,
        #[serde(default)]
        roaming: bool,
    },
    Bluetooth {
        paired_device_id: Option<String>,
    },
    Unknown,
}

impl NetworkType {
    pub fn kind(&self) -> NetworkKind {
        match self {
            Self::Wifi { .. } => NetworkKind::Wifi,
            Self::Cellular { .. } => NetworkKind::Cellular,
            Self::Bluetooth { .. } => NetworkKind::Bluetooth,
            Self::Unknown => NetworkKind::Unknown,
        }
    }

    pub fn is_roaming(&self) -> bool {
        matches!(self, Self::Cellular { roaming: true, .. })
    }

    pub fn signal_level(&self) -> Option<i32> {
        match self {
            Self::Wifi { signal_level, .. } => *signal_level,
            _ => None,
        }
    }

    /// A bare type of the given kind with no details filled in.
    pub fn bare(kind: NetworkKind) -> Self {
        match kind {
            NetworkKind::Wifi => Self::Wifi {
                ssid: None,
                signal_level: None,
            },
            NetworkKind::Cellular => Self::Cellular {
                carrier: None,
                roaming: false,
            },
            NetworkKind::Bluetooth => Self::Bluetooth {
                paired_device_id: None,
            },
            NetworkKind::Unknown => Self::Unknown,
        }
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// Viability of one interface instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Status {
    Available,
    Losing,
    Lost,
    Unknown,
}

impl Status {
    pub fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}

// ── Capabilities ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub metered: bool,
    /// Estimated downstream bandwidth in kbit/s, if the platform knows it.
    pub estimated_bandwidth_kbps: Option<u64>,
}

// ── Socket binding ──────────────────────────────────────────────────

/// A socket that can be routed over a specific interface instance.
#[derive(Debug, Clone, Copy)]
pub enum SocketTarget<'a> {
    Tcp(&'a TcpStream),
    Udp(&'a UdpSocket),
}

/// Platform capability that pins a socket to one interface instance.
pub trait SocketBinder: Send + Sync {
    fn bind(&self, target: SocketTarget<'_>) -> std::io::Result<()>;
}

// ── NetworkStatus ───────────────────────────────────────────────────

/// One interface instance as last reported by the platform.
#[derive(Clone, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub id: NetworkId,
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    pub status: Status,
    #[serde(default)]
    pub addresses: BTreeSet<IpAddr>,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(skip)]
    binder: Option<Arc<dyn SocketBinder>>,
}

impl NetworkStatus {
    pub fn new(id: impl Into<NetworkId>, network_type: NetworkType, status: Status) -> Self {
        Self {
            id: id.into(),
            network_type,
            status,
            addresses: BTreeSet::new(),
            capabilities: Capabilities::default(),
            binder: None,
        }
    }

    #[must_use]
    pub fn with_addresses(mut self, addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        self.addresses = addresses.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_binder(mut self, binder: Arc<dyn SocketBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    /// Same instance with a different status; the binder is kept.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn kind(&self) -> NetworkKind {
        self.network_type.kind()
    }

    pub fn is_available(&self) -> bool {
        self.status.is_available()
    }

    pub fn is_metered(&self) -> bool {
        self.capabilities.metered
    }

    pub fn can_bind(&self) -> bool {
        self.binder.is_some()
    }

    /// Route `target` over this instance.
    pub fn bind_socket(&self, target: SocketTarget<'_>) -> Result<(), CoreError> {
        let binder = self
            .binder
            .as_ref()
            .ok_or_else(|| CoreError::BindUnsupported {
                network: self.id.to_string(),
            })?;
        binder
            .bind(target)
            .map_err(|source| CoreError::BindFailed {
                network: self.id.to_string(),
                source,
            })
    }
}

impl fmt::Debug for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkStatus")
            .field("id", &self.id)
            .field("network_type", &self.network_type)
            .field("status", &self.status)
            .field("addresses", &self.addresses)
            .field("capabilities", &self.capabilities)
            .field("can_bind", &self.binder.is_some())
            .finish()
    }
}

// ── Networks ────────────────────────────────────────────────────────

/// Point-in-time view of every known interface and the default route.
///
/// `all` is kept in insertion order (oldest first). The default is stored
/// as an id that always refers to a member of `all`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Networks {
    default: Option<NetworkId>,
    all: Vec<NetworkStatus>,
}

impl Networks {
    pub fn default_network(&self) -> Option<&NetworkStatus> {
        let id = self.default.as_ref()?;
        self.get(id)
    }

    pub fn default_id(&self) -> Option<&NetworkId> {
        self.default.as_ref()
    }

    pub fn all(&self) -> &[NetworkStatus] {
        &self.all
    }

    pub fn get(&self, id: &NetworkId) -> Option<&NetworkStatus> {
        self.all.iter().find(|n| &n.id == id)
    }

    pub fn contains(&self, id: &NetworkId) -> bool {
        self.get(id).is_some()
    }

    /// Available instances of `kind`, oldest first.
    pub fn available(&self, kind: NetworkKind) -> impl Iterator<Item = &NetworkStatus> {
        self.all
            .iter()
            .filter(move |n| n.kind() == kind && n.is_available())
    }

    pub fn has_available(&self, kind: NetworkKind) -> bool {
        self.available(kind).next().is_some()
    }

    pub fn available_kinds(&self) -> BTreeSet<NetworkKind> {
        self.all
            .iter()
            .filter(|n| n.is_available())
            .map(NetworkStatus::kind)
            .collect()
    }

    /// Kinds with at least one instance that is not Lost. A `Losing`
    /// interface still carries traffic and keeps its kind present.
    pub fn present_kinds(&self) -> BTreeSet<NetworkKind> {
        self.all
            .iter()
            .filter(|n| n.status != Status::Lost)
            .map(NetworkStatus::kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    // ── Mutation (observer only) ─────────────────────────────────────

    /// Insert as the most recently added instance, replacing any entry
    /// with the same id.
    pub(crate) fn push(&mut self, status: NetworkStatus) {
        self.all.retain(|n| n.id != status.id);
        self.all.push(status);
    }

    /// Replace in place, keeping the recency position. Returns `false` when
    /// the id was not present (nothing changed).
    pub(crate) fn replace(&mut self, status: NetworkStatus) -> bool {
        match self.all.iter_mut().find(|n| n.id == status.id) {
            Some(slot) => {
                *slot = status;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, id: &NetworkId) -> Option<NetworkStatus> {
        let idx = self.all.iter().position(|n| &n.id == id)?;
        Some(self.all.remove(idx))
    }

    /// Set the default route. Ids that are not members are ignored so the
    /// membership invariant cannot be broken.
    pub(crate) fn set_default(&mut self, id: Option<NetworkId>) {
        self.default = id.filter(|id| self.contains(id));
    }
}

impl FromIterator<NetworkStatus> for Networks {
    fn from_iter<I: IntoIterator<Item = NetworkStatus>>(iter: I) -> Self {
        let mut networks = Self::default();
        for status in iter {
            networks.push(status);
        }
        networks
    }
}
