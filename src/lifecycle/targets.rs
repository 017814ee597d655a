//! Wait targets and caller-side validation of instance declarations.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use super::state::AddressFamily;

/// Kind of instance a declaration describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceKind {
    /// System container.
    Container,
    /// Virtual machine.
    VirtualMachine,
}

impl InstanceKind {
    /// Kind name as the server spells it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::VirtualMachine => "virtual-machine",
        }
    }
}

impl FromStr for InstanceKind {
    type Err = TargetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "container" => Ok(Self::Container),
            "virtual-machine" => Ok(Self::VirtualMachine),
            other => Err(TargetError::UnknownKind {
                kind: other.to_owned(),
            }),
        }
    }
}

/// Condition to wait for after an instance starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WaitTarget {
    /// The guest agent has connected back to the server.
    Agent,
    /// Sleep for a fixed duration.
    Delay(Duration),
    /// A global IPv4 address is assigned, optionally on a specific nic.
    Ipv4 {
        /// Interface to restrict the check to.
        nic: Option<String>,
    },
    /// A global IPv6 address is assigned, optionally on a specific nic.
    Ipv6 {
        /// Interface to restrict the check to.
        nic: Option<String>,
    },
    /// The instance reports Ready.
    Ready,
}

impl WaitTarget {
    /// Short name of the condition, used in logs and errors.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Delay(_) => "delay",
            Self::Ipv4 { .. } => "ipv4",
            Self::Ipv6 { .. } => "ipv6",
            Self::Ready => "ready",
        }
    }

    /// Address family checked by network targets.
    #[must_use]
    pub const fn family(&self) -> Option<AddressFamily> {
        match self {
            Self::Ipv4 { .. } => Some(AddressFamily::Inet),
            Self::Ipv6 { .. } => Some(AddressFamily::Inet6),
            Self::Agent | Self::Delay(_) | Self::Ready => None,
        }
    }

    /// Interface restriction of network targets.
    #[must_use]
    pub fn nic(&self) -> Option<&str> {
        match self {
            Self::Ipv4 { nic } | Self::Ipv6 { nic } => nic.as_deref(),
            Self::Agent | Self::Delay(_) | Self::Ready => None,
        }
    }
}

impl fmt::Display for WaitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delay(duration) => {
                write!(f, "delay:{}", humantime::format_duration(*duration))
            }
            Self::Ipv4 { nic: Some(nic) } | Self::Ipv6 { nic: Some(nic) } => {
                write!(f, "{}:{nic}", self.kind())
            }
            _ => f.write_str(self.kind()),
        }
    }
}

impl FromStr for WaitTarget {
    type Err = TargetError;

    /// Parses `agent`, `delay:<duration>`, `ipv4[:<nic>]`, `ipv6[:<nic>]`
    /// or `ready`. Durations use humantime syntax such as `30s` or `1m`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, argument) = value
            .split_once(':')
            .map_or((value, None), |(name, rest)| (name, Some(rest.trim())));

        match (name.trim(), argument) {
            ("agent", None) => Ok(Self::Agent),
            ("ready", None) => Ok(Self::Ready),
            ("ipv4", nic) => Ok(Self::Ipv4 {
                nic: network_interface(value, nic)?,
            }),
            ("ipv6", nic) => Ok(Self::Ipv6 {
                nic: network_interface(value, nic)?,
            }),
            ("delay", Some(raw)) if !raw.is_empty() => humantime::parse_duration(raw)
                .map(Self::Delay)
                .map_err(|err| TargetError::InvalidDelay {
                    value: raw.to_owned(),
                    reason: err.to_string(),
                }),
            ("delay", _) => Err(TargetError::MissingDelay),
            ("agent" | "ready", Some(_)) => Err(TargetError::UnexpectedArgument {
                target: value.to_owned(),
            }),
            _ => Err(TargetError::Unknown {
                target: value.to_owned(),
            }),
        }
    }
}

fn network_interface(target: &str, nic: Option<&str>) -> Result<Option<String>, TargetError> {
    match nic {
        None => Ok(None),
        Some("") => Err(TargetError::EmptyNic {
            target: target.to_owned(),
        }),
        Some(name) => Ok(Some(name.to_owned())),
    }
}

/// Errors raised while parsing or validating wait targets and instance
/// declarations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TargetError {
    /// The target name is not recognised.
    #[error("unknown wait target {target:?}")]
    Unknown {
        /// Raw target text.
        target: String,
    },
    /// A target that takes no argument was given one.
    #[error("wait target {target:?} does not take an argument")]
    UnexpectedArgument {
        /// Raw target text.
        target: String,
    },
    /// A network target named an empty interface.
    #[error("wait target {target:?} names an empty interface")]
    EmptyNic {
        /// Raw target text.
        target: String,
    },
    /// A delay target lacks its duration.
    #[error("delay wait target requires a duration, for example delay:30s")]
    MissingDelay,
    /// A delay duration could not be parsed.
    #[error("invalid delay {value:?}: {reason}")]
    InvalidDelay {
        /// Raw duration text.
        value: String,
        /// Parser message.
        reason: String,
    },
    /// The instance kind is not recognised.
    #[error("unknown instance type {kind:?}")]
    UnknownKind {
        /// Raw kind text.
        kind: String,
    },
    /// The agent target was used on something other than a virtual machine.
    #[error("agent wait target is only supported for virtual machines")]
    AgentRequiresVirtualMachine,
    /// The ready target was used on something other than a container.
    #[error("ready wait target is only supported for containers")]
    ReadyRequiresContainer,
    /// Files are uploaded through the guest agent, which must be awaited.
    #[error("uploading files to a running instance requires an agent wait target")]
    FilesRequireAgent,
    /// Ephemeral instances are deleted when stopped.
    #[error("ephemeral instances must be declared running")]
    EphemeralNotRunning,
}

/// Checks every target against the instance kind before any probe runs.
///
/// `kind` is `None` when the declaration leaves the type to the server
/// default, which is a container: `agent` is rejected there, `ready` is not.
///
/// # Errors
///
/// Returns the first offending target's [`TargetError`].
pub fn validate_targets(
    targets: &[WaitTarget],
    kind: Option<InstanceKind>,
) -> Result<(), TargetError> {
    for target in targets {
        match (target, kind) {
            (WaitTarget::Agent, None | Some(InstanceKind::Container)) => {
                return Err(TargetError::AgentRequiresVirtualMachine);
            }
            (WaitTarget::Ready, Some(InstanceKind::VirtualMachine)) => {
                return Err(TargetError::ReadyRequiresContainer);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Rejects file uploads to a running virtual machine unless the target list
/// waits for the agent.
///
/// # Errors
///
/// Returns [`TargetError::FilesRequireAgent`].
pub fn require_agent_for_files(
    targets: &[WaitTarget],
    kind: Option<InstanceKind>,
    running: bool,
    has_files: bool,
) -> Result<(), TargetError> {
    let needs_agent = has_files && running && kind == Some(InstanceKind::VirtualMachine);
    if needs_agent && !targets.contains(&WaitTarget::Agent) {
        return Err(TargetError::FilesRequireAgent);
    }
    Ok(())
}

/// An ephemeral instance is deleted by the server when it stops, so it can
/// only be declared running.
///
/// # Errors
///
/// Returns [`TargetError::EphemeralNotRunning`].
pub const fn validate_ephemeral(ephemeral: bool, running: bool) -> Result<(), TargetError> {
    if ephemeral && !running {
        return Err(TargetError::EphemeralNotRunning);
    }
    Ok(())
}

/// Parses a list of textual targets, stopping at the first invalid one.
///
/// # Errors
///
/// Returns the parse error of the first invalid entry.
pub fn parse_targets<I, S>(raw: I) -> Result<Vec<WaitTarget>, TargetError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter().map(|value| value.as_ref().parse()).collect()
}
