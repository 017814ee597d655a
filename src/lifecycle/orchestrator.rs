//! Start, stop and wait-for convergence of a single instance.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::remote::{
    InstanceRemote, OperationRemote, RemoteError, StateAction, StateChange, VersionToken,
};

use super::state::{AddressFamily, InstanceAddresses, InstanceState, InstanceStatus};
use super::targets::{InstanceKind, TargetError, WaitTarget, validate_targets};
use super::waiter::{PollOutcome, WaitError, WaitPolicy, Waiter};

const PROBE_OK: &str = "OK";
const PROBE_PENDING: &str = "Pending";
const STATE_CHANGE_TIMEOUT_SECS: u64 = 180;

/// Outcome of [`LifecycleOrchestrator::start`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StartOutcome {
    /// The instance was already Running or Ready; nothing was requested.
    AlreadyRunning,
    /// A start was requested and the instance reached Running.
    Started,
}

/// Outcome of [`LifecycleOrchestrator::stop`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopOutcome {
    /// The instance was already Stopped; nothing was requested.
    AlreadyStopped,
    /// A stop was requested and the instance reached Stopped.
    Stopped,
    /// The instance disappeared while stopping, as ephemeral instances do.
    Gone,
}

/// Errors raised while converging an instance lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Reading the instance state failed.
    #[error("failed to retrieve state of instance {instance:?}: {source}")]
    State {
        /// Instance name.
        instance: String,
        /// Collaborator error.
        #[source]
        source: RemoteError,
    },
    /// Requesting or awaiting a state change failed.
    #[error("failed to {action} instance {instance:?}: {source}")]
    Transition {
        /// Requested action.
        action: &'static str,
        /// Instance name.
        instance: String,
        /// Collaborator error.
        #[source]
        source: RemoteError,
    },
    /// Polling for a condition failed.
    #[error("failed to wait for instance {instance:?} ({condition}): {source}")]
    Wait {
        /// Instance name.
        instance: String,
        /// Condition being awaited.
        condition: String,
        /// Waiter error.
        #[source]
        source: WaitError,
    },
    /// The requested targets are invalid for the instance.
    #[error(transparent)]
    Target(#[from] TargetError),
}

impl LifecycleError {
    /// True when the failure was a deadline or a cancellation.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        match self {
            Self::Wait { source, .. } => source.is_timeout(),
            Self::State { .. } | Self::Transition { .. } | Self::Target(_) => false,
        }
    }
}

/// Drives an instance towards a lifecycle state through a remote.
#[derive(Clone, Debug)]
pub struct LifecycleOrchestrator<R> {
    remote: R,
    waiter: Waiter,
}

impl<R> LifecycleOrchestrator<R>
where
    R: InstanceRemote + OperationRemote,
{
    /// Creates an orchestrator polling with `policy`.
    #[must_use]
    pub fn new(remote: R, policy: WaitPolicy) -> Self {
        Self {
            remote,
            waiter: Waiter::new(policy),
        }
    }

    /// Binds every wait to an external cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.waiter = self.waiter.with_cancellation(cancel);
        self
    }

    /// Remote used for every call.
    #[must_use]
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// Waits for each target in order, stopping at the first failure.
    ///
    /// The whole list is checked against `kind` before the first probe, so a
    /// target the instance can never satisfy fails without polling. `None`
    /// stands for the server default kind.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Target`] when a target does not apply to
    /// `kind`, or [`LifecycleError::Wait`] naming the failed target.
    pub async fn wait_for(
        &self,
        instance: &str,
        kind: Option<InstanceKind>,
        targets: &[WaitTarget],
    ) -> Result<(), LifecycleError> {
        validate_targets(targets, kind)?;
        for target in targets {
            self.wait_target(instance, target).await?;
        }
        Ok(())
    }

    /// Waits for a single target.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Wait`] when the probe fails, the deadline
    /// passes or the wait is cancelled.
    pub async fn wait_target(
        &self,
        instance: &str,
        target: &WaitTarget,
    ) -> Result<(), LifecycleError> {
        debug!(instance, target = %target, "waiting for instance condition");
        let outcome = match target {
            WaitTarget::Agent => {
                self.waiter
                    .wait(&[PROBE_OK], false, || self.probe_agent(instance))
                    .await
            }
            WaitTarget::Ready => {
                self.waiter
                    .wait(&[PROBE_OK], false, || self.probe_ready(instance))
                    .await
            }
            WaitTarget::Delay(duration) => {
                self.waiter
                    .wait(&[PROBE_OK], false, || self.probe_delay(instance, *duration))
                    .await
            }
            WaitTarget::Ipv4 { nic } => {
                self.wait_network(instance, AddressFamily::Inet, nic.as_deref())
                    .await
            }
            WaitTarget::Ipv6 { nic } => {
                self.wait_network(instance, AddressFamily::Inet6, nic.as_deref())
                    .await
            }
        };
        outcome.map(drop).map_err(|source| LifecycleError::Wait {
            instance: instance.to_owned(),
            condition: target.to_string(),
            source,
        })
    }

    /// Starts the instance unless it already runs, then waits until it
    /// reports Running.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the state read, the start request or
    /// the wait fails.
    pub async fn start(&self, instance: &str) -> Result<StartOutcome, LifecycleError> {
        let (state, token) = self.read_state(instance).await?;
        if state.is_running() {
            debug!(instance, "instance already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        self.transition(instance, StateAction::Start, false, &token)
            .await?;
        self.wait_status(
            instance,
            &[InstanceStatus::Running.as_str(), InstanceStatus::Ready.as_str()],
            false,
        )
        .await?;
        debug!(instance, "instance started");
        Ok(StartOutcome::Started)
    }

    /// Stops the instance unless it is already stopped, then waits until it
    /// reports Stopped. With `force`, an instance that disappears meanwhile
    /// is reported as [`StopOutcome::Gone`].
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the state read, the stop request or
    /// the wait fails.
    pub async fn stop(&self, instance: &str, force: bool) -> Result<StopOutcome, LifecycleError> {
        let (state, token) = self.read_state(instance).await?;
        if state.is_stopped() {
            debug!(instance, "instance already stopped");
            return Ok(StopOutcome::AlreadyStopped);
        }

        self.transition(instance, StateAction::Stop, force, &token)
            .await?;
        let outcome = self
            .wait_status(instance, &[InstanceStatus::Stopped.as_str()], force)
            .await?;
        match outcome {
            PollOutcome::Vanished => {
                debug!(instance, "instance removed while stopping");
                Ok(StopOutcome::Gone)
            }
            PollOutcome::Converged(_) => {
                debug!(instance, "instance stopped");
                Ok(StopOutcome::Stopped)
            }
        }
    }

    /// Addresses of the most desirable interface, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::State`] when the state read fails.
    pub async fn addresses(
        &self,
        instance: &str,
    ) -> Result<Option<InstanceAddresses>, LifecycleError> {
        let (state, _) = self.read_state(instance).await?;
        Ok(state.addresses())
    }

    async fn wait_network(
        &self,
        instance: &str,
        family: AddressFamily,
        nic: Option<&str>,
    ) -> Result<PollOutcome, WaitError> {
        self.waiter
            .wait(&[PROBE_OK], false, || self.probe_network(instance, family, nic))
            .await
    }

    async fn read_state(
        &self,
        instance: &str,
    ) -> Result<(InstanceState, VersionToken), LifecycleError> {
        self.remote
            .get_state(instance)
            .await
            .map_err(|source| LifecycleError::State {
                instance: instance.to_owned(),
                source,
            })
    }

    async fn transition(
        &self,
        instance: &str,
        action: StateAction,
        force: bool,
        token: &VersionToken,
    ) -> Result<(), LifecycleError> {
        let change = StateChange {
            action,
            force,
            timeout_secs: STATE_CHANGE_TIMEOUT_SECS,
        };
        let transition_error = |source| LifecycleError::Transition {
            action: action.as_str(),
            instance: instance.to_owned(),
            source,
        };
        debug!(instance, action = action.as_str(), force, "requesting state change");
        let operation = self
            .remote
            .request_state(instance, change, token)
            .await
            .map_err(transition_error)?;
        self.remote
            .wait_operation(&operation)
            .await
            .map_err(transition_error)
    }

    async fn wait_status(
        &self,
        instance: &str,
        targets: &[&str],
        vanish_ok: bool,
    ) -> Result<PollOutcome, LifecycleError> {
        self.waiter
            .wait(targets, vanish_ok, || self.probe_status(instance))
            .await
            .map_err(|source| LifecycleError::Wait {
                instance: instance.to_owned(),
                condition: targets.join("|"),
                source,
            })
    }

    async fn probe_status(&self, instance: &str) -> Result<String, RemoteError> {
        let (state, _) = self.remote.get_state(instance).await?;
        Ok(state.status().as_str().to_owned())
    }

    async fn probe_agent(&self, instance: &str) -> Result<String, RemoteError> {
        let (state, _) = self.remote.get_state(instance).await?;
        Ok(verdict(state.is_operational()))
    }

    async fn probe_ready(&self, instance: &str) -> Result<String, RemoteError> {
        let (state, _) = self.remote.get_state(instance).await?;
        Ok(verdict(state.is_ready()))
    }

    async fn probe_network(
        &self,
        instance: &str,
        family: AddressFamily,
        nic: Option<&str>,
    ) -> Result<String, RemoteError> {
        let (state, _) = self.remote.get_state(instance).await?;
        Ok(verdict(state.has_address(family, nic)))
    }

    async fn probe_delay(&self, instance: &str, duration: Duration) -> Result<String, RemoteError> {
        self.remote.get_state(instance).await?;
        tokio::time::sleep(duration).await;
        Ok(PROBE_OK.to_owned())
    }
}

fn verdict(reached: bool) -> String {
    if reached { PROBE_OK } else { PROBE_PENDING }.to_owned()
}
