//! Orchestrator checks that need paused-time control beyond the scenarios.

use std::time::Duration;

use convergent::lifecycle::{AddressFamily, InstanceStatus};
use convergent::remote::{StateAction, StateChange};
use convergent::test_support::{RemoteCall, ScriptedRemote, StateFixture};
use convergent::{
    InstanceKind, LifecycleError, LifecycleOrchestrator, RemoteError, StartOutcome, StopOutcome,
    TargetError, WaitError, WaitPolicy, WaitTarget,
};
use rstest::{fixture, rstest};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{INSTANCE, state};

#[fixture]
fn remote() -> ScriptedRemote {
    ScriptedRemote::new()
}

fn orchestrator(remote: &ScriptedRemote) -> LifecycleOrchestrator<ScriptedRemote> {
    LifecycleOrchestrator::new(remote.clone(), WaitPolicy::default())
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn ready_instances_count_as_running(remote: ScriptedRemote) {
    remote.script_states(INSTANCE, [state(InstanceStatus::Ready)]);

    let outcome = orchestrator(&remote)
        .start(INSTANCE)
        .await
        .unwrap_or_else(|err| panic!("start should succeed: {err}"));

    assert_eq!(outcome, StartOutcome::AlreadyRunning);
    assert!(remote.state_requests().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn start_request_completes_before_polling(remote: ScriptedRemote) {
    remote.script_states(
        INSTANCE,
        [
            state(InstanceStatus::Stopped),
            state(InstanceStatus::Other(106)),
            state(InstanceStatus::Running),
        ],
    );

    orchestrator(&remote)
        .start(INSTANCE)
        .await
        .unwrap_or_else(|err| panic!("start should succeed: {err}"));

    assert_eq!(
        remote.state_requests(),
        [StateChange {
            action: StateAction::Start,
            force: false,
            timeout_secs: 180,
        }]
    );
    let calls = remote.calls();
    let operation_waited = calls
        .iter()
        .position(|call| matches!(call, RemoteCall::WaitOperation(_)));
    let first_poll = calls
        .iter()
        .skip(1)
        .position(|call| matches!(call, RemoteCall::GetState(_)))
        .map(|index| index + 1);
    assert!(
        operation_waited < first_poll,
        "the operation must complete before polling: {calls:?}"
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failed_start_request_is_not_polled(remote: ScriptedRemote) {
    remote.script_states(INSTANCE, [state(InstanceStatus::Stopped)]);
    remote.fail_requests(RemoteError::Request {
        message: String::from("instance is frozen"),
    });

    let err = orchestrator(&remote)
        .start(INSTANCE)
        .await
        .expect_err("start should fail");

    assert!(matches!(
        err,
        LifecycleError::Transition {
            action: "start",
            ..
        }
    ));
    assert_eq!(remote.state_reads(INSTANCE), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failed_operation_surfaces_as_transition_error(remote: ScriptedRemote) {
    remote.script_states(INSTANCE, [state(InstanceStatus::Running)]);
    remote.fail_operations(RemoteError::Request {
        message: String::from("shutdown timed out"),
    });

    let err = orchestrator(&remote)
        .stop(INSTANCE, false)
        .await
        .expect_err("stop should fail");

    assert!(matches!(
        err,
        LifecycleError::Transition { action: "stop", .. }
    ));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn stop_is_a_noop_for_stopped_instances(remote: ScriptedRemote) {
    remote.script_states(INSTANCE, [state(InstanceStatus::Stopped)]);

    let outcome = orchestrator(&remote)
        .stop(INSTANCE, true)
        .await
        .unwrap_or_else(|err| panic!("stop should succeed: {err}"));

    assert_eq!(outcome, StopOutcome::AlreadyStopped);
    assert!(remote.state_requests().is_empty());
}

#[rstest]
#[case(
    WaitTarget::Ready,
    Some(InstanceKind::VirtualMachine),
    TargetError::ReadyRequiresContainer
)]
#[case(WaitTarget::Agent, None, TargetError::AgentRequiresVirtualMachine)]
#[case(
    WaitTarget::Agent,
    Some(InstanceKind::Container),
    TargetError::AgentRequiresVirtualMachine
)]
#[tokio::test(start_paused = true)]
async fn mismatched_targets_fail_before_any_state_read(
    remote: ScriptedRemote,
    #[case] target: WaitTarget,
    #[case] kind: Option<InstanceKind>,
    #[case] expected: TargetError,
) {
    remote.script_states(INSTANCE, [state(InstanceStatus::Running)]);
    let started = Instant::now();

    let err = orchestrator(&remote)
        .wait_for(INSTANCE, kind, &[WaitTarget::Delay(Duration::from_secs(1)), target])
        .await
        .expect_err("target should be rejected");

    assert!(matches!(&err, LifecycleError::Target(found) if *found == expected));
    assert!(!err.is_timeout());
    assert!(remote.calls().is_empty(), "no remote call expected: {:?}", remote.calls());
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn first_failed_target_aborts_the_rest(remote: ScriptedRemote) {
    remote.script_states(INSTANCE, [state(InstanceStatus::Running)]);
    let policy = WaitPolicy::default().with_timeout(Duration::from_secs(20));
    let targets = [WaitTarget::Ready, WaitTarget::Delay(Duration::from_secs(1))];

    let err = LifecycleOrchestrator::new(remote.clone(), policy)
        .wait_for(INSTANCE, Some(InstanceKind::Container), &targets)
        .await
        .expect_err("ready never arrives");

    assert!(err.is_timeout());
    assert!(matches!(&err, LifecycleError::Wait { condition, .. } if condition == "ready"));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn delay_target_sleeps_once(remote: ScriptedRemote) {
    remote.script_states(INSTANCE, [state(InstanceStatus::Running)]);
    let started = Instant::now();

    orchestrator(&remote)
        .wait_for(INSTANCE, None, &[WaitTarget::Delay(Duration::from_secs(30))])
        .await
        .unwrap_or_else(|err| panic!("delay should succeed: {err}"));

    assert_eq!(started.elapsed(), Duration::from_secs(32));
    assert_eq!(remote.state_reads(INSTANCE), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn cancellation_stops_polling(remote: ScriptedRemote) {
    remote.script_states(INSTANCE, [state(InstanceStatus::Running)]);
    let cancel = CancellationToken::new();
    let cancellable = orchestrator(&remote).with_cancellation(cancel.clone());
    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        cancel.cancel();
    });

    let err = cancellable
        .wait_for(
            INSTANCE,
            Some(InstanceKind::VirtualMachine),
            &[WaitTarget::Agent],
        )
        .await
        .expect_err("wait should be cancelled");

    assert!(matches!(
        err,
        LifecycleError::Wait {
            source: WaitError::Cancelled { .. },
            ..
        }
    ));
    let reads = remote.state_reads(INSTANCE);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(remote.state_reads(INSTANCE), reads, "no state read after return");
    trigger
        .await
        .unwrap_or_else(|err| panic!("trigger task failed: {err}"));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn addresses_pick_the_best_interface(remote: ScriptedRemote) {
    remote.script_states(
        INSTANCE,
        [Ok(StateFixture::new(InstanceStatus::Running)
            .address("eth0", AddressFamily::Inet, "10.0.0.9")
            .address("eth0", AddressFamily::Inet6, "2001:db8::9")
            .hwaddr("eth0", "00:16:3e:12:34:56")
            .build())],
    );

    let addresses = orchestrator(&remote)
        .addresses(INSTANCE)
        .await
        .unwrap_or_else(|err| panic!("state read should succeed: {err}"))
        .unwrap_or_else(|| panic!("an interface should be selected"));

    assert_eq!(addresses.ipv4.as_deref(), Some("10.0.0.9"));
    assert_eq!(addresses.ipv6.as_deref(), Some("2001:db8::9"));
    assert_eq!(addresses.mac.as_deref(), Some("00:16:3e:12:34:56"));
}
