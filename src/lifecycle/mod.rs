//! Convergence on asynchronous instance lifecycle state.
//!
//! [`Waiter`] is the bounded polling loop; [`LifecycleOrchestrator`] builds
//! the named conditions (`agent`, `delay`, `ipv4`, `ipv6`, `ready`) and the
//! start/stop transitions on top of it.

mod orchestrator;
mod state;
mod targets;
mod waiter;

pub use orchestrator::{LifecycleError, LifecycleOrchestrator, StartOutcome, StopOutcome};
pub use state::{
    AddressFamily, InstanceAddresses, InstanceState, InstanceStatus, LOOPBACK_INTERFACE,
    NetworkAddress, NetworkState,
};
pub use targets::{
    InstanceKind, TargetError, WaitTarget, parse_targets, require_agent_for_files,
    validate_ephemeral, validate_targets,
};
pub use waiter::{PollOutcome, WaitError, WaitPolicy, Waiter};
