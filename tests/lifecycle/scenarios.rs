//! BDD scenarios for instance lifecycle convergence.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Start a stopped instance and wait until it runs"
)]
fn scenario_start_stopped_instance(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Leave a running instance alone"
)]
fn scenario_leave_running_instance(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Stop a running instance gracefully"
)]
fn scenario_stop_gracefully(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Report a force-stopped ephemeral instance as gone"
)]
fn scenario_forced_stop_gone(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Treat disappearance during a graceful stop as a failure"
)]
fn scenario_graceful_stop_disappearance(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Wait for targets in declared order"
)]
fn scenario_targets_in_order(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Reject the ready target on a virtual machine before polling"
)]
fn scenario_ready_rejected_on_vm(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Reject the agent target on a container before polling"
)]
fn scenario_agent_rejected_on_container(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Time out waiting for an address on another interface"
)]
fn scenario_nic_timeout(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}
