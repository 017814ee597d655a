//! Instance state as reported by the server.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::Deserialize;

/// Loopback interface name, never considered for address checks.
pub const LOOPBACK_INTERFACE: &str = "lo";

const SCOPE_GLOBAL: &str = "global";

/// Coarse instance status derived from the server status code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceStatus {
    /// Instance is shut down.
    Stopped,
    /// Instance is booted.
    Running,
    /// Instance is booted and reported itself ready.
    Ready,
    /// Instance is frozen.
    Frozen,
    /// Instance is in an error state.
    Error,
    /// Any transitional or unknown status.
    Other(u16),
}

impl InstanceStatus {
    /// Maps a server status code.
    #[must_use]
    pub const fn from_code(code: u16) -> Self {
        match code {
            102 => Self::Stopped,
            103 => Self::Running,
            110 => Self::Frozen,
            112 => Self::Error,
            113 => Self::Ready,
            other => Self::Other(other),
        }
    }

    /// Server status code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Stopped => 102,
            Self::Running => 103,
            Self::Frozen => 110,
            Self::Error => 112,
            Self::Ready => 113,
            Self::Other(code) => code,
        }
    }

    /// Status name as the server spells it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Running => "Running",
            Self::Ready => "Ready",
            Self::Frozen => "Frozen",
            Self::Error => "Error",
            Self::Other(_) => "Other",
        }
    }
}

/// Address bound to an instance interface.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct NetworkAddress {
    /// Address family: `inet` or `inet6`.
    pub family: String,
    /// Address text.
    pub address: String,
    /// Address scope, for example `global` or `link`.
    #[serde(default)]
    pub scope: String,
}

impl NetworkAddress {
    /// Returns true for globally scoped addresses of `family`.
    #[must_use]
    pub fn is_global(&self, family: AddressFamily) -> bool {
        self.scope == SCOPE_GLOBAL && self.family == family.as_str()
    }
}

/// Per-interface network state.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct NetworkState {
    /// Addresses assigned to the interface.
    #[serde(default)]
    pub addresses: Vec<NetworkAddress>,
    /// MAC address.
    #[serde(default)]
    pub hwaddr: String,
    /// Name of the host-side interface, when any.
    #[serde(default)]
    pub host_name: String,
}

impl NetworkState {
    fn has_global(&self, family: AddressFamily) -> bool {
        self.addresses.iter().any(|address| address.is_global(family))
    }

    fn first_global(&self, family: AddressFamily) -> Option<&str> {
        self.addresses
            .iter()
            .find(|address| address.is_global(family))
            .map(|address| address.address.as_str())
    }
}

/// Address family used by network wait targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressFamily {
    /// IPv4 (`inet`).
    Inet,
    /// IPv6 (`inet6`).
    Inet6,
}

impl AddressFamily {
    /// Family name as the server spells it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inet => "inet",
            Self::Inet6 => "inet6",
        }
    }
}

/// Live state of an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct InstanceState {
    /// Human readable status.
    #[serde(default)]
    pub status: String,
    /// Numeric status code.
    #[serde(default)]
    pub status_code: u16,
    /// Number of processes; only positive once the guest agent reports in.
    #[serde(default)]
    pub processes: i64,
    /// Interfaces keyed by name.
    #[serde(default)]
    pub network: BTreeMap<String, NetworkState>,
}

impl InstanceState {
    /// Decodes a state document from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] when the payload is malformed.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Coarse status derived from the status code.
    #[must_use]
    pub const fn status(&self) -> InstanceStatus {
        InstanceStatus::from_code(self.status_code)
    }

    /// Running or Ready.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.status(), InstanceStatus::Running | InstanceStatus::Ready)
    }

    /// Ready only.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.status(), InstanceStatus::Ready)
    }

    /// Stopped only.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self.status(), InstanceStatus::Stopped)
    }

    /// Running with a positive process count. Virtual machines only report
    /// processes once their agent has connected back to the server.
    #[must_use]
    pub const fn is_operational(&self) -> bool {
        self.is_running() && self.processes > 0
    }

    /// Returns true when a non-loopback interface, optionally restricted to
    /// `nic`, has a global address of `family`.
    #[must_use]
    pub fn has_address(&self, family: AddressFamily, nic: Option<&str>) -> bool {
        self.network
            .iter()
            .filter(|(name, _)| name.as_str() != LOOPBACK_INTERFACE)
            .filter(|(name, _)| nic.is_none_or(|wanted| wanted == name.as_str()))
            .any(|(_, iface)| iface.has_global(family))
    }

    /// Picks the most desirable interface and returns its addresses.
    ///
    /// Interfaces with a host-side name rank first, then those with a MAC
    /// address, then those holding a global IPv4 address, then IPv6. Returns
    /// `None` when there are no interfaces or the best one is loopback.
    #[must_use]
    pub fn addresses(&self) -> Option<InstanceAddresses> {
        let (name, iface) = self
            .network
            .iter()
            .max_by_key(|&(name, iface)| rank(name, iface))?;
        if name.as_str() == LOOPBACK_INTERFACE {
            return None;
        }
        Some(InstanceAddresses::from_interface(name, iface))
    }

    /// Addresses of a specific interface, when present.
    #[must_use]
    pub fn addresses_of(&self, interface: &str) -> Option<InstanceAddresses> {
        self.network
            .get(interface)
            .map(|iface| InstanceAddresses::from_interface(interface, iface))
    }
}

// Ties keep the first interface in name order, hence the reversed name.
fn rank<'a>(name: &'a str, iface: &NetworkState) -> (bool, bool, bool, bool, Reverse<&'a str>) {
    (
        !iface.host_name.is_empty(),
        !iface.hwaddr.is_empty(),
        iface.has_global(AddressFamily::Inet),
        iface.has_global(AddressFamily::Inet6),
        Reverse(name),
    )
}

/// Addresses extracted from a single interface.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceAddresses {
    /// Interface the addresses were read from.
    pub interface: String,
    /// First global IPv4 address.
    pub ipv4: Option<String>,
    /// First global IPv6 address.
    pub ipv6: Option<String>,
    /// MAC address.
    pub mac: Option<String>,
}

impl InstanceAddresses {
    fn from_interface(name: &str, iface: &NetworkState) -> Self {
        Self {
            interface: name.to_owned(),
            ipv4: iface.first_global(AddressFamily::Inet).map(str::to_owned),
            ipv6: iface.first_global(AddressFamily::Inet6).map(str::to_owned),
            mac: (!iface.hwaddr.is_empty()).then(|| iface.hwaddr.clone()),
        }
    }
}
