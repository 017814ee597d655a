//! Shared fixtures for lifecycle BDD scenarios.

use convergent::lifecycle::InstanceStatus;
use convergent::test_support::{ScriptedRemote, StateFixture};
use convergent::{
    InstanceKind, InstanceState, LifecycleError, LifecycleOrchestrator, RemoteError,
    StartOutcome, StopOutcome, WaitError, WaitPolicy,
};
use rstest::fixture;

pub const INSTANCE: &str = "web";

#[derive(Clone, Debug)]
pub struct LifecycleContext {
    pub remote: ScriptedRemote,
    pub policy: WaitPolicy,
    pub kind: Option<InstanceKind>,
    pub outcome: Option<LifecycleResult>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleFailureKind {
    State,
    Transition,
    Remote,
    Timeout,
    Cancelled,
    Target,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LifecycleFailure {
    pub kind: LifecycleFailureKind,
    pub message: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LifecycleResult {
    Success(&'static str),
    Failure(LifecycleFailure),
}

impl LifecycleContext {
    pub fn orchestrator(&self) -> LifecycleOrchestrator<ScriptedRemote> {
        LifecycleOrchestrator::new(self.remote.clone(), self.policy)
    }

    pub fn record(self, result: Result<&'static str, LifecycleError>) -> Self {
        let outcome = match result {
            Ok(label) => LifecycleResult::Success(label),
            Err(err) => LifecycleResult::Failure(LifecycleFailure {
                kind: failure_kind(&err),
                message: err.to_string(),
            }),
        };
        Self {
            outcome: Some(outcome),
            ..self
        }
    }
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    LifecycleContext {
        remote: ScriptedRemote::new(),
        policy: WaitPolicy::default(),
        kind: None,
        outcome: None,
    }
}

pub fn state(status: InstanceStatus) -> Result<InstanceState, RemoteError> {
    Ok(StateFixture::new(status).build())
}

pub fn gone() -> Result<InstanceState, RemoteError> {
    Err(RemoteError::NotFound {
        resource: String::from(INSTANCE),
    })
}

/// Answers the initial read and `polls` further reads with `first`, then
/// settles on `settled`.
pub fn transition(
    first: InstanceStatus,
    polls: usize,
    settled: InstanceStatus,
) -> Vec<Result<InstanceState, RemoteError>> {
    std::iter::once(state(first))
        .chain(std::iter::repeat_with(|| state(first)).take(polls))
        .chain(std::iter::once(state(settled)))
        .collect()
}

pub fn parse_status(status: &str) -> Option<InstanceStatus> {
    match status {
        "stopped" => Some(InstanceStatus::Stopped),
        "running" => Some(InstanceStatus::Running),
        "ready" => Some(InstanceStatus::Ready),
        "frozen" => Some(InstanceStatus::Frozen),
        _ => None,
    }
}

pub fn parse_failure_kind(kind: &str) -> Option<LifecycleFailureKind> {
    match kind {
        "state" => Some(LifecycleFailureKind::State),
        "transition" => Some(LifecycleFailureKind::Transition),
        "remote" => Some(LifecycleFailureKind::Remote),
        "timeout" => Some(LifecycleFailureKind::Timeout),
        "cancelled" => Some(LifecycleFailureKind::Cancelled),
        "target" => Some(LifecycleFailureKind::Target),
        _ => None,
    }
}

pub const fn start_label(outcome: StartOutcome) -> &'static str {
    match outcome {
        StartOutcome::AlreadyRunning => "already-running",
        StartOutcome::Started => "started",
    }
}

pub const fn stop_label(outcome: StopOutcome) -> &'static str {
    match outcome {
        StopOutcome::AlreadyStopped => "already-stopped",
        StopOutcome::Stopped => "stopped",
        StopOutcome::Gone => "gone",
    }
}

const fn failure_kind(err: &LifecycleError) -> LifecycleFailureKind {
    match err {
        LifecycleError::State { .. } => LifecycleFailureKind::State,
        LifecycleError::Transition { .. } => LifecycleFailureKind::Transition,
        LifecycleError::Target(_) => LifecycleFailureKind::Target,
        LifecycleError::Wait { source, .. } => match source {
            WaitError::Probe { .. } => LifecycleFailureKind::Remote,
            WaitError::TimedOut { .. } => LifecycleFailureKind::Timeout,
            WaitError::Cancelled { .. } => LifecycleFailureKind::Cancelled,
        },
    }
}
