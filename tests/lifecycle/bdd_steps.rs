//! BDD step definitions for instance start, stop and wait-for convergence.

use std::time::Duration;

use convergent::InstanceKind;
use convergent::lifecycle::{AddressFamily, InstanceStatus, parse_targets};
use convergent::test_support::StateFixture;
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::{Builder, Runtime};

use super::test_helpers::{
    INSTANCE, LifecycleContext, LifecycleResult, gone, parse_failure_kind, parse_status,
    start_label, state, stop_label, transition,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("invalid step input: {0}")]
    Input(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn paused_runtime() -> Result<Runtime, StepError> {
    Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .map_err(|err| StepError::Assertion(err.to_string()))
}

#[given("an instance that is \"{status}\"")]
fn instance_with_status(
    lifecycle_context: LifecycleContext,
    status: String,
) -> Result<LifecycleContext, StepError> {
    let parsed = parse_status(&status)
        .ok_or_else(|| StepError::Input(format!("unknown status: {status}")))?;
    lifecycle_context
        .remote
        .script_states(INSTANCE, [state(parsed)]);
    Ok(lifecycle_context)
}

#[given("a stopped instance that boots after \"{polls}\" polls")]
fn stopped_instance_booting(
    lifecycle_context: LifecycleContext,
    polls: usize,
) -> LifecycleContext {
    lifecycle_context.remote.script_states(
        INSTANCE,
        transition(InstanceStatus::Stopped, polls, InstanceStatus::Running),
    );
    lifecycle_context
}

#[given("a running instance that stops after \"{polls}\" polls")]
fn running_instance_stopping(
    lifecycle_context: LifecycleContext,
    polls: usize,
) -> LifecycleContext {
    lifecycle_context.remote.script_states(
        INSTANCE,
        transition(InstanceStatus::Running, polls, InstanceStatus::Stopped),
    );
    lifecycle_context
}

#[given("a running instance that disappears once stopped")]
fn running_instance_disappearing(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context
        .remote
        .script_states(INSTANCE, [state(InstanceStatus::Running), gone()]);
    lifecycle_context
}

#[given("a running virtual machine that gains an address and then its agent")]
fn virtual_machine_booting(mut lifecycle_context: LifecycleContext) -> LifecycleContext {
    let addressed = || {
        StateFixture::new(InstanceStatus::Running).address(
            "enp5s0",
            AddressFamily::Inet,
            "10.0.0.4",
        )
    };
    lifecycle_context.remote.script_states(
        INSTANCE,
        [
            state(InstanceStatus::Running),
            Ok(addressed().build()),
            Ok(addressed().processes(7).build()),
        ],
    );
    lifecycle_context.kind = Some(InstanceKind::VirtualMachine);
    lifecycle_context
}

#[given("a running instance with an IPv4 address on \"{nic}\"")]
fn instance_with_address(lifecycle_context: LifecycleContext, nic: String) -> LifecycleContext {
    lifecycle_context.remote.script_states(
        INSTANCE,
        [Ok(StateFixture::new(InstanceStatus::Running)
            .address(nic.trim(), AddressFamily::Inet, "10.0.0.4")
            .build())],
    );
    lifecycle_context
}

#[given("the instance is a \"{kind}\"")]
fn instance_kind(
    mut lifecycle_context: LifecycleContext,
    kind: String,
) -> Result<LifecycleContext, StepError> {
    let parsed: InstanceKind = kind
        .parse()
        .map_err(|err| StepError::Input(format!("{err}")))?;
    lifecycle_context.kind = Some(parsed);
    Ok(lifecycle_context)
}

#[given("the wait timeout is \"{secs}\" seconds")]
fn wait_timeout(mut lifecycle_context: LifecycleContext, secs: u64) -> LifecycleContext {
    lifecycle_context.policy = lifecycle_context
        .policy
        .with_timeout(Duration::from_secs(secs));
    lifecycle_context
}

#[when("I start the instance")]
fn start_instance(lifecycle_context: LifecycleContext) -> Result<LifecycleContext, StepError> {
    let runtime = paused_runtime()?;
    let orchestrator = lifecycle_context.orchestrator();
    let result = runtime.block_on(async move { orchestrator.start(INSTANCE).await });
    Ok(lifecycle_context.record(result.map(start_label)))
}

#[when("I stop the instance")]
fn stop_instance(lifecycle_context: LifecycleContext) -> Result<LifecycleContext, StepError> {
    stop_with(lifecycle_context, false)
}

#[when("I force stop the instance")]
fn force_stop_instance(
    lifecycle_context: LifecycleContext,
) -> Result<LifecycleContext, StepError> {
    stop_with(lifecycle_context, true)
}

fn stop_with(
    lifecycle_context: LifecycleContext,
    force: bool,
) -> Result<LifecycleContext, StepError> {
    let runtime = paused_runtime()?;
    let orchestrator = lifecycle_context.orchestrator();
    let result = runtime.block_on(async move { orchestrator.stop(INSTANCE, force).await });
    Ok(lifecycle_context.record(result.map(stop_label)))
}

#[when("I wait for \"{targets}\"")]
fn wait_for_targets(
    lifecycle_context: LifecycleContext,
    targets: String,
) -> Result<LifecycleContext, StepError> {
    let parsed =
        parse_targets(targets.split(',')).map_err(|err| StepError::Input(err.to_string()))?;
    let runtime = paused_runtime()?;
    let orchestrator = lifecycle_context.orchestrator();
    let kind = lifecycle_context.kind;
    let result =
        runtime.block_on(async move { orchestrator.wait_for(INSTANCE, kind, &parsed).await });
    Ok(lifecycle_context.record(result.map(|()| "converged")))
}

#[then("the lifecycle result is \"{label}\"")]
fn lifecycle_result(
    lifecycle_context: &LifecycleContext,
    label: String,
) -> Result<(), StepError> {
    match &lifecycle_context.outcome {
        Some(LifecycleResult::Success(actual)) if *actual == label => Ok(()),
        Some(LifecycleResult::Success(actual)) => Err(StepError::Assertion(format!(
            "expected {label}, got {actual}"
        ))),
        Some(LifecycleResult::Failure(failure)) => Err(StepError::Assertion(format!(
            "expected {label}, got failure: {}",
            failure.message
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the lifecycle error kind is \"{kind}\"")]
fn lifecycle_error_kind(
    lifecycle_context: &LifecycleContext,
    kind: String,
) -> Result<(), StepError> {
    let expected = parse_failure_kind(&kind)
        .ok_or_else(|| StepError::Input(format!("unknown failure kind: {kind}")))?;
    let Some(LifecycleResult::Failure(failure)) = &lifecycle_context.outcome else {
        return Err(StepError::Assertion(String::from(
            "expected failure outcome",
        )));
    };
    if failure.kind == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure kind {expected:?}, got {:?}: {}",
            failure.kind, failure.message
        )))
    }
}

#[then("\"{count}\" state change requests were sent")]
fn state_change_requests(
    lifecycle_context: &LifecycleContext,
    count: usize,
) -> Result<(), StepError> {
    let requests = lifecycle_context.remote.state_requests();
    if requests.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} state change requests, got {requests:?}"
        )))
    }
}

#[then("the instance state was read \"{count}\" times")]
fn instance_state_reads(
    lifecycle_context: &LifecycleContext,
    count: usize,
) -> Result<(), StepError> {
    let reads = lifecycle_context.remote.state_reads(INSTANCE);
    if reads == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} state reads, got {reads}"
        )))
    }
}
