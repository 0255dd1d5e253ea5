use std::time::Duration;

use coop_device::mock::{
    MockCrossingSwitch, MockCursor, MockDevice, MockRegistry, MockRemoteMgr, SentSignal,
};
use coop_dinput::mock::{Behaviour, MockSdk, MockSdkHandle};
use coop_dinput::{OperationKind, RelayEvent, RelaySource};
use coop_types::{CooperationNotice, PointerAction};

use super::*;
use crate::notifier::ChannelObserver;

const LOCAL: &str = "local";
const PEER: &str = "peer";
const THIRD: &str = "third";

/// Local mouse with a keyboard.
const MOUSE: DeviceId = DeviceId(1);
/// Second local pointer, e.g. a touchpad.
const TOUCHPAD: DeviceId = DeviceId(2);
/// Virtual device mirroring the peer's mouse.
const PEER_MOUSE: DeviceId = DeviceId(9);

struct Rig {
    machine: CooperationStateMachine,
    gateway_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    outbox: OutboxWorker,
    events_rx: mpsc::Receiver<ServiceEvent>,
    notices: mpsc::UnboundedReceiver<CooperationNotice>,
    registry: Arc<MockRegistry>,
    remote: Arc<MockRemoteMgr>,
    cursor: Arc<MockCursor>,
    crossing: Arc<MockCrossingSwitch>,
    sdk: MockSdkHandle,
}

fn id(s: &str) -> NetworkId {
    NetworkId::from(s)
}

fn rig() -> Rig {
    rig_with(&Config::default())
}

fn rig_with(config: &Config) -> Rig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let registry = Arc::new(
        MockRegistry::new(LOCAL)
            .with_device(MockDevice::pointer(1, "mouse-l", LOCAL).with_keyboard("kbd-l"))
            .with_device(MockDevice::pointer(2, "touchpad-l", LOCAL))
            .with_device(MockDevice::pointer(9, "mouse-p", PEER).remote()),
    );
    let remote = Arc::new(MockRemoteMgr::new());
    let cursor = Arc::new(MockCursor::new());
    let crossing = Arc::new(MockCrossingSwitch::new());
    let sdk = MockSdk::new();
    let handle = sdk.handle();
    let collab = Collaborators {
        registry: registry.clone(),
        remote: remote.clone(),
        cursor: cursor.clone(),
        crossing: crossing.clone(),
        dinput: Arc::new(sdk),
    };
    let (events_tx, events_rx) = mpsc::channel(16);
    let (mut machine, gateway_rx, outbox) = CooperationStateMachine::new(config, collab, events_tx);
    let (observer, notices) = ChannelObserver::new();
    machine.subscribe(Arc::new(observer));
    Rig {
        machine,
        gateway_rx,
        outbox,
        events_rx,
        notices,
        registry,
        remote,
        cursor,
        crossing,
        sdk: handle,
    }
}

impl Rig {
    /// Apply every gateway event already posted, including the ones the
    /// applied events cause, then deliver the queued peer notifications.
    async fn settle(&mut self) {
        while let Ok(event) = self.gateway_rx.try_recv() {
            self.machine.handle_gateway_event(event);
        }
        self.outbox.flush().await;
    }

    fn messages(&mut self) -> Vec<CooperationMessage> {
        self.drain().into_iter().map(|n| n.message).collect()
    }

    fn drain(&mut self) -> Vec<CooperationNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }

    /// Free -> Out(mouse-l) towards PEER.
    async fn go_out(&mut self) {
        self.machine.start_cooperation(id(PEER), MOUSE).unwrap();
        self.settle().await;
        assert_eq!(self.machine.state(), &CooperationState::Out(Dhid::from("mouse-l")));
        self.drain();
    }

    /// Free -> In(mouse-p), as if PEER had shared its mouse with us.
    fn go_in(&mut self) {
        self.machine.on_remote_start(id(PEER));
        self.machine.on_remote_start_result(
            id(PEER),
            true,
            Dhid::from("mouse-p"),
            MouseLocationPercent::new(0.0, 40.0),
        );
        assert_eq!(self.machine.state(), &CooperationState::In(Dhid::from("mouse-p")));
        self.drain();
    }
}

fn motion(device: DeviceId) -> PointerEvent {
    PointerEvent::new(device, PointerAction::Motion { dx: 3, dy: -1 })
}

#[tokio::test]
async fn free_to_out_publishes_start_then_success() {
    let mut rig = rig();
    rig.cursor.move_to(MouseLocationPercent::new(100.0, 25.0));

    rig.machine.start_cooperation(id(PEER), MOUSE).unwrap();
    assert!(rig.machine.guard().is_starting);
    rig.settle().await;

    assert_eq!(
        rig.messages(),
        vec![
            CooperationMessage::InfoStart,
            CooperationMessage::OpenSuccess,
            CooperationMessage::InfoSuccess
        ]
    );
    assert_eq!(rig.machine.state(), &CooperationState::Out(Dhid::from("mouse-l")));
    assert!(!rig.machine.guard().is_busy());
    assert_eq!(rig.machine.prepared(), &PreparedPair::new(id(LOCAL), id(PEER)));
    assert!(!rig.cursor.is_visible());
    assert!(rig.crossing.is_watched(&id(PEER)));
    assert!(rig.sdk.has_relay_listener());

    let start = rig.sdk.last_call(OperationKind::Start).unwrap();
    assert_eq!(start.dhids, vec![Dhid::from("mouse-l"), Dhid::from("kbd-l")]);
    assert_eq!(
        rig.remote.sent(),
        vec![
            SentSignal::AnnounceStart {
                local: id(LOCAL),
                remote: id(PEER)
            },
            SentSignal::StartResult {
                target: id(PEER),
                success: true,
                dhid: Dhid::from("mouse-l"),
                location: MouseLocationPercent::new(100.0, 25.0),
            },
        ]
    );
}

#[tokio::test]
async fn stop_unprepares_so_the_next_start_prepares_again() {
    let mut rig = rig();
    rig.go_out().await;
    rig.machine.stop_cooperation().unwrap();
    rig.settle().await;
    rig.machine.start_cooperation(id(PEER), MOUSE).unwrap();
    rig.settle().await;
    assert_eq!(rig.sdk.calls_of(OperationKind::Prepare).len(), 2);
}

#[tokio::test]
async fn transition_in_flight_rejects_start_and_stop() {
    let mut rig = rig();
    rig.sdk.set_behaviour(OperationKind::Prepare, Behaviour::Silent);

    rig.machine.start_cooperation(id(PEER), MOUSE).unwrap();
    assert_eq!(
        rig.machine.start_cooperation(id(THIRD), MOUSE),
        Err(CoopError::Busy)
    );
    assert_eq!(rig.machine.stop_cooperation(), Err(CoopError::Busy));
    assert_eq!(rig.sdk.calls_of(OperationKind::Prepare).len(), 1);

    rig.sdk.last_call(OperationKind::Prepare).unwrap().succeed();
    rig.settle().await;
    assert!(!rig.machine.guard().is_busy());
}

#[tokio::test]
async fn prepare_failure_leaves_state_free() {
    let mut rig = rig();
    rig.sdk.set_behaviour(OperationKind::Prepare, Behaviour::Fail);

    rig.machine.start_cooperation(id(PEER), MOUSE).unwrap();
    rig.settle().await;

    let notices = rig.drain();
    let messages: Vec<_> = notices.iter().map(|n| n.message).collect();
    assert_eq!(
        messages,
        vec![
            CooperationMessage::InfoStart,
            CooperationMessage::OpenFail,
            CooperationMessage::InfoFail
        ]
    );
    assert_eq!(notices[2].reason, Some(FailureReason::PrepareFailed));
    assert_eq!(rig.machine.state(), &CooperationState::Free);
    assert!(!rig.machine.prepared().is_prepared());
    assert!(!rig.machine.guard().is_busy());
    assert!(rig.sdk.calls_of(OperationKind::Start).is_empty());
    assert!(rig.remote.sent().contains(&SentSignal::StartResult {
        target: id(PEER),
        success: false,
        dhid: Dhid::from("mouse-l"),
        location: MouseLocationPercent::CENTER,
    }));
}

#[tokio::test]
async fn start_failure_resets_prepared_pair() {
    let mut rig = rig();
    rig.sdk.set_behaviour(OperationKind::Start, Behaviour::Refuse);

    rig.machine.start_cooperation(id(PEER), MOUSE).unwrap();
    rig.settle().await;

    let notices = rig.drain();
    let last = notices.last().unwrap();
    assert_eq!(last.message, CooperationMessage::InfoFail);
    assert_eq!(last.reason, Some(FailureReason::RemoteRejected));
    assert_eq!(rig.machine.state(), &CooperationState::Free);
    assert!(!rig.machine.prepared().is_prepared());
}

#[tokio::test]
async fn unknown_device_is_refused_while_free() {
    let mut rig = rig();
    assert!(matches!(
        rig.machine.start_cooperation(id(PEER), DeviceId(42)),
        Err(CoopError::InvalidArgument(_))
    ));
    assert!(rig.drain().is_empty());
    assert!(rig.sdk.calls().is_empty());
}

#[tokio::test]
async fn relaying_a_device_with_nothing_to_share_fails() {
    let mut rig = rig();
    rig.go_in();

    rig.machine.start_cooperation(id(THIRD), DeviceId(42)).unwrap();
    rig.settle().await;

    let notices = rig.drain();
    let last = notices.last().unwrap();
    assert_eq!(last.message, CooperationMessage::InfoFail);
    assert_eq!(last.reason, Some(FailureReason::NoShareableDevice));
    assert!(rig.sdk.calls_of(OperationKind::Start).is_empty());
    assert_eq!(rig.machine.state(), &CooperationState::In(Dhid::from("mouse-p")));
    assert!(!rig.machine.guard().is_busy());
}

#[tokio::test]
async fn invalid_targets_are_refused_before_any_notice() {
    let mut rig = rig();
    assert!(matches!(
        rig.machine.start_cooperation(NetworkId::default(), MOUSE),
        Err(CoopError::InvalidArgument(_))
    ));
    assert!(matches!(
        rig.machine.start_cooperation(id(LOCAL), MOUSE),
        Err(CoopError::InvalidArgument(_))
    ));
    assert!(rig.drain().is_empty());
    assert!(!rig.machine.guard().is_busy());
    assert!(rig.remote.sent().is_empty());
}

#[tokio::test]
async fn wrong_state_requests() {
    let mut rig = rig();
    assert_eq!(
        rig.machine.stop_cooperation(),
        Err(CoopError::WrongState(CooperationState::Free))
    );
    rig.go_out().await;
    assert!(matches!(
        rig.machine.start_cooperation(id(THIRD), MOUSE),
        Err(CoopError::WrongState(CooperationState::Out(_)))
    ));
}

#[tokio::test]
async fn disabled_switch_refuses_start() {
    let mut rig = rig();
    rig.machine.enable_cooperation(false).unwrap();
    assert_eq!(rig.messages(), vec![CooperationMessage::StateOff]);
    assert!(!rig.machine.get_cooperation_state(&id(LOCAL)));
    assert_eq!(
        rig.machine.start_cooperation(id(PEER), MOUSE),
        Err(CoopError::NotEnabled)
    );

    rig.machine.enable_cooperation(true).unwrap();
    assert_eq!(rig.messages(), vec![CooperationMessage::StateOn]);
    assert!(rig.machine.start_cooperation(id(PEER), MOUSE).is_ok());
}

#[tokio::test]
async fn disabling_while_out_stops_the_session() {
    let mut rig = rig();
    rig.go_out().await;
    rig.machine.enable_cooperation(false).unwrap();
    rig.settle().await;
    assert_eq!(
        rig.messages(),
        vec![
            CooperationMessage::StateOff,
            CooperationMessage::Stop,
            CooperationMessage::Close,
            CooperationMessage::CloseSuccess
        ]
    );
    assert_eq!(rig.machine.state(), &CooperationState::Free);
}

#[tokio::test]
async fn free_filter_drops_virtual_devices() {
    let mut rig = rig();
    assert_eq!(rig.machine.check_pointer_event(&motion(MOUSE)), EventVerdict::Forward);
    assert_eq!(
        rig.machine.check_pointer_event(&motion(PEER_MOUSE)),
        EventVerdict::Suppress
    );
}

#[tokio::test]
async fn in_filter_forwards_remote_and_stops_on_local_motion() {
    let mut rig = rig();
    rig.go_in();
    assert!(rig.cursor.is_visible());
    assert_eq!(rig.cursor.location(), MouseLocationPercent::new(0.0, 40.0));

    assert_eq!(
        rig.machine.check_pointer_event(&motion(PEER_MOUSE)),
        EventVerdict::Forward
    );
    let click = PointerEvent::new(MOUSE, PointerAction::ButtonDown { button: 1 });
    assert_eq!(rig.machine.check_pointer_event(&click), EventVerdict::Suppress);
    assert!(!rig.machine.guard().is_busy());

    assert_eq!(rig.machine.check_pointer_event(&motion(MOUSE)), EventVerdict::Suppress);
    assert!(rig.machine.guard().is_stopping);
    let stop = rig.sdk.last_call(OperationKind::Stop).unwrap();
    assert_eq!((stop.src, stop.sink), (id(PEER), id(LOCAL)));
    assert_eq!(stop.dhids, vec![Dhid::from("mouse-p")]);

    // everything is suppressed while the stop is in flight
    assert_eq!(
        rig.machine.check_pointer_event(&motion(PEER_MOUSE)),
        EventVerdict::Suppress
    );

    rig.settle().await;
    assert_eq!(rig.machine.state(), &CooperationState::Free);
    assert!(rig.remote.sent().contains(&SentSignal::StopResult {
        target: id(PEER),
        success: true
    }));
}

#[tokio::test]
async fn out_filter_forwards_shared_device_only() {
    let mut rig = rig();
    rig.go_out().await;
    assert_eq!(rig.machine.check_pointer_event(&motion(MOUSE)), EventVerdict::Forward);
    assert_eq!(
        rig.machine.check_pointer_event(&motion(TOUCHPAD)),
        EventVerdict::Suppress
    );
    assert!(rig.machine.guard().is_stopping);
    let stop = rig.sdk.last_call(OperationKind::Stop).unwrap();
    assert_eq!((stop.src, stop.sink), (id(LOCAL), id(PEER)));
}

#[tokio::test]
async fn stop_from_out_tears_everything_down() {
    let mut rig = rig();
    rig.go_out().await;

    rig.machine.stop_cooperation().unwrap();
    rig.settle().await;

    assert_eq!(
        rig.messages(),
        vec![
            CooperationMessage::Stop,
            CooperationMessage::Close,
            CooperationMessage::CloseSuccess
        ]
    );
    assert_eq!(rig.machine.state(), &CooperationState::Free);
    assert!(!rig.machine.prepared().is_prepared());
    assert!(rig.cursor.is_visible());
    assert_eq!(rig.cursor.location(), MouseLocationPercent::CENTER);
    assert!(!rig.crossing.is_watched(&id(PEER)));
    assert!(!rig.sdk.has_relay_listener());
    assert_eq!(rig.sdk.calls_of(OperationKind::Unprepare).len(), 1);
    assert_eq!(
        rig.remote.sent().last(),
        Some(&SentSignal::StopResult {
            target: id(PEER),
            success: true
        })
    );
}

#[tokio::test]
async fn failed_stop_keeps_the_session() {
    let mut rig = rig();
    rig.go_out().await;
    rig.sdk.set_behaviour(OperationKind::Stop, Behaviour::Fail);

    rig.machine.stop_cooperation().unwrap();
    rig.settle().await;

    let notices = rig.drain();
    assert_eq!(notices.last().unwrap().message, CooperationMessage::CloseFail);
    assert_eq!(notices.last().unwrap().reason, Some(FailureReason::RemoteRejected));
    assert!(matches!(rig.machine.state(), CooperationState::Out(_)));
    assert!(!rig.machine.guard().is_busy());
}

#[tokio::test]
async fn come_back_returns_pointer_to_origin() {
    let mut rig = rig();
    rig.go_in();

    rig.machine.start_cooperation(id(PEER), PEER_MOUSE).unwrap();
    let stop = rig.sdk.last_call(OperationKind::Stop).unwrap();
    assert_eq!((stop.src.clone(), stop.sink.clone()), (id(PEER), id(LOCAL)));
    rig.settle().await;

    assert_eq!(
        rig.messages(),
        vec![CooperationMessage::InfoStart, CooperationMessage::InfoSuccess]
    );
    assert_eq!(rig.machine.state(), &CooperationState::Free);
    assert!(rig.cursor.is_visible());
    assert!(rig.sdk.calls_of(OperationKind::Prepare).is_empty());
    let sent = rig.remote.sent();
    assert!(sent.contains(&SentSignal::StartResult {
        target: id(PEER),
        success: true,
        dhid: Dhid::from("mouse-p"),
        location: MouseLocationPercent::new(0.0, 40.0),
    }));
    assert!(!sent
        .iter()
        .any(|s| matches!(s, SentSignal::RelayAnnounce { .. })));
}

#[tokio::test]
async fn relay_hands_pointer_to_third_device() {
    let mut rig = rig();
    rig.go_in();

    rig.machine.start_cooperation(id(THIRD), PEER_MOUSE).unwrap();
    rig.settle().await;

    let prepare = rig.sdk.last_call(OperationKind::Prepare).unwrap();
    assert_eq!((prepare.src, prepare.sink), (id(PEER), id(THIRD)));
    let start = rig.sdk.last_call(OperationKind::Start).unwrap();
    assert_eq!((start.src, start.sink), (id(PEER), id(THIRD)));
    let stop = rig.sdk.last_call(OperationKind::Stop).unwrap();
    assert_eq!((stop.src, stop.sink), (id(PEER), id(LOCAL)));

    assert_eq!(rig.machine.state(), &CooperationState::Free);
    assert_eq!(
        rig.messages(),
        vec![
            CooperationMessage::InfoStart,
            CooperationMessage::OpenSuccess,
            CooperationMessage::InfoSuccess
        ]
    );
    let sent = rig.remote.sent();
    assert!(sent.contains(&SentSignal::AnnounceStart {
        local: id(LOCAL),
        remote: id(THIRD)
    }));
    assert!(sent.contains(&SentSignal::RelayAnnounce {
        sink: id(PEER),
        source: id(THIRD)
    }));
    assert!(sent.iter().any(|s| matches!(
        s,
        SentSignal::StartResult { target, success: true, .. } if *target == id(THIRD)
    )));
}

#[tokio::test]
async fn relay_partial_failure_rolls_back_and_stays_in() {
    let mut rig = rig();
    rig.go_in();
    rig.sdk.set_behaviour(OperationKind::Stop, Behaviour::Fail);

    rig.machine.start_cooperation(id(THIRD), PEER_MOUSE).unwrap();
    rig.settle().await;

    let stops = rig.sdk.calls_of(OperationKind::Stop);
    assert_eq!(stops.len(), 2);
    assert_eq!((stops[0].src.clone(), stops[0].sink.clone()), (id(PEER), id(LOCAL)));
    assert_eq!((stops[1].src.clone(), stops[1].sink.clone()), (id(PEER), id(THIRD)));

    let notices = rig.drain();
    let last = notices.last().unwrap();
    assert_eq!(last.message, CooperationMessage::InfoFail);
    assert_eq!(last.reason, Some(FailureReason::PartialRelayFailure));
    assert_eq!(rig.machine.state(), &CooperationState::In(Dhid::from("mouse-p")));
    assert!(!rig.machine.prepared().is_prepared());
    assert!(!rig.machine.guard().is_busy());
}

#[tokio::test]
async fn offline_peer_resets_and_is_idempotent() {
    let mut rig = rig();
    rig.go_out().await;
    rig.sdk.set_behaviour(OperationKind::Stop, Behaviour::Silent);
    rig.machine.stop_cooperation().unwrap();
    rig.drain();

    rig.machine.on_device_offline(&id(PEER));
    let after_first = rig.machine.snapshot();
    assert_eq!(after_first.state, CooperationState::Free);
    assert!(!after_first.guard.is_busy());
    assert!(!after_first.prepared.is_prepared());
    assert_eq!(after_first.pending_remote_calls, 0);
    assert_eq!(rig.messages(), vec![CooperationMessage::Close]);
    assert!(!rig.sdk.has_relay_listener());

    rig.machine.on_device_offline(&id(PEER));
    assert_eq!(rig.machine.snapshot(), after_first);
    assert!(rig.drain().is_empty());

    // the dropped stop answers late: nothing happens
    rig.sdk.last_call(OperationKind::Stop).unwrap().succeed();
    rig.settle().await;
    assert!(rig.drain().is_empty());
    assert_eq!(rig.machine.snapshot(), after_first);
}

#[tokio::test]
async fn offline_non_participant_is_ignored() {
    let mut rig = rig();
    rig.go_out().await;
    rig.machine.on_device_offline(&id(THIRD));
    assert!(matches!(rig.machine.state(), CooperationState::Out(_)));
    assert!(rig.drain().is_empty());
}

#[tokio::test]
async fn offline_clears_a_prepared_pair_while_free() {
    let mut rig = rig();
    rig.machine.prepared = PreparedPair::new(id(LOCAL), id(PEER));
    rig.machine.on_device_offline(&id(THIRD));
    assert!(rig.machine.prepared().is_prepared());
    rig.machine.on_device_offline(&id(PEER));
    assert!(!rig.machine.prepared().is_prepared());
    assert!(rig.drain().is_empty());
}

#[tokio::test]
async fn keyboard_online_joins_an_out_session() {
    let mut rig = rig();
    rig.machine.on_keyboard_online(Dhid::from("kbd-new"));
    assert!(rig.sdk.calls_of(OperationKind::Start).is_empty());

    rig.go_out().await;
    rig.registry
        .add_device(MockDevice::pointer(3, "kbd-new", LOCAL));
    rig.machine.on_keyboard_online(Dhid::from("kbd-new"));
    let call = rig.sdk.last_call(OperationKind::Start).unwrap();
    assert_eq!(call.dhids, vec![Dhid::from("kbd-new")]);
    assert_eq!((call.src, call.sink), (id(LOCAL), id(PEER)));
    rig.settle().await;
    assert!(matches!(rig.machine.state(), CooperationState::Out(_)));
    assert!(rig.drain().is_empty());
}

#[tokio::test]
async fn peer_disabling_cooperation_stops_the_session() {
    let mut rig = rig();
    rig.go_out().await;

    rig.crossing.flip(&id(PEER), false);
    let Some(ServiceEvent::CrossingSwitchChanged {
        network_id,
        enabled,
    }) = rig.events_rx.recv().await
    else {
        panic!("expected a crossing switch change");
    };
    rig.machine.on_crossing_switch_changed(&network_id, enabled);
    assert!(rig.machine.guard().is_stopping);
    rig.settle().await;
    assert_eq!(rig.machine.state(), &CooperationState::Free);
}

#[tokio::test]
async fn peer_stop_result_frees_an_out_session() {
    let mut rig = rig();
    rig.go_out().await;

    rig.machine.on_remote_stop(id(PEER));
    assert!(rig.machine.guard().is_stopping);
    rig.machine.on_remote_stop_result(id(PEER), true);

    assert_eq!(
        rig.messages(),
        vec![
            CooperationMessage::Stop,
            CooperationMessage::Close,
            CooperationMessage::StopSuccess
        ]
    );
    assert_eq!(rig.machine.state(), &CooperationState::Free);
    assert!(!rig.machine.guard().is_busy());
    assert_eq!(rig.sdk.calls_of(OperationKind::Unprepare).len(), 1);
}

#[tokio::test]
async fn pointer_coming_back_frees_an_out_session() {
    let mut rig = rig();
    rig.go_out().await;

    let here = MouseLocationPercent::new(0.0, 70.0);
    rig.machine
        .on_remote_start_result(id(PEER), true, Dhid::from("mouse-l"), here);

    assert_eq!(rig.machine.state(), &CooperationState::Free);
    assert!(rig.cursor.is_visible());
    assert_eq!(rig.cursor.location(), here);
    assert!(!rig.machine.prepared().is_prepared());
    assert_eq!(
        rig.messages(),
        vec![CooperationMessage::Close, CooperationMessage::InfoSuccess]
    );
}

#[tokio::test]
async fn outsider_cannot_take_over_an_out_session() {
    let mut rig = rig();
    rig.go_out().await;

    rig.machine.on_remote_start(id(THIRD));
    assert!(!rig.machine.guard().is_busy());
    rig.machine.on_remote_start_result(
        id(THIRD),
        true,
        Dhid::from("mouse-l"),
        MouseLocationPercent::CENTER,
    );

    assert_eq!(rig.machine.state(), &CooperationState::Out(Dhid::from("mouse-l")));
    assert_eq!(rig.machine.prepared(), &PreparedPair::new(id(LOCAL), id(PEER)));
    assert!(rig.sdk.calls_of(OperationKind::Unprepare).is_empty());
    assert!(rig.crossing.is_watched(&id(PEER)));
    assert!(rig.drain().is_empty());
}

#[tokio::test]
async fn outsider_cannot_replace_an_in_session() {
    let mut rig = rig();
    rig.go_in();

    rig.machine.on_remote_start(id(THIRD));
    assert!(!rig.machine.guard().is_busy());
    rig.machine.on_remote_start_result(
        id(THIRD),
        true,
        Dhid::from("mouse-t"),
        MouseLocationPercent::CENTER,
    );

    assert_eq!(rig.machine.state(), &CooperationState::In(Dhid::from("mouse-p")));
    assert_eq!(rig.machine.snapshot().session_peer, Some(id(PEER)));
    assert!(rig.drain().is_empty());
}

#[tokio::test]
async fn unannounced_start_result_is_ignored_while_free() {
    let mut rig = rig();
    rig.machine.on_remote_start_result(
        id(THIRD),
        true,
        Dhid::from("mouse-t"),
        MouseLocationPercent::CENTER,
    );
    assert_eq!(rig.machine.state(), &CooperationState::Free);
    assert!(rig.drain().is_empty());
}

#[tokio::test]
async fn peer_result_during_local_transition_is_dropped() {
    let mut rig = rig();
    rig.sdk.set_behaviour(OperationKind::Prepare, Behaviour::Silent);
    rig.machine.start_cooperation(id(PEER), MOUSE).unwrap();
    rig.drain();

    rig.machine.on_remote_start_result(
        id(THIRD),
        true,
        Dhid::from("mouse-t"),
        MouseLocationPercent::CENTER,
    );
    assert_eq!(rig.machine.state(), &CooperationState::Free);
    assert!(rig.machine.guard().is_starting);
    assert!(rig.drain().is_empty());
}

#[tokio::test]
async fn relay_announce_moves_the_sink() {
    let mut rig = rig();
    rig.go_out().await;

    rig.machine.on_relay_announce(id(THIRD));
    assert_eq!(rig.machine.prepared().sink, id(THIRD));
    assert!(rig.crossing.is_watched(&id(THIRD)));
    assert!(!rig.crossing.is_watched(&id(PEER)));

    rig.machine.stop_cooperation().unwrap();
    let stop = rig.sdk.last_call(OperationKind::Stop).unwrap();
    assert_eq!((stop.src, stop.sink), (id(LOCAL), id(THIRD)));
}

#[tokio::test]
async fn relayed_keys_tracked_while_out() {
    let mut rig = rig();
    rig.go_out().await;

    let key = |code, value| RelayEvent {
        source: RelaySource::Keyboard,
        code,
        value,
    };
    assert!(rig.sdk.emit_relay(key(30, 1)));
    assert!(rig.sdk.emit_relay(key(31, 1)));
    assert!(rig.sdk.emit_relay(key(30, 0)));
    rig.sdk.emit_relay(RelayEvent {
        source: RelaySource::Mouse,
        code: 272,
        value: 1,
    });
    rig.settle().await;
    assert_eq!(rig.machine.snapshot().relayed_keys, vec![31]);

    rig.machine.stop_cooperation().unwrap();
    rig.settle().await;
    assert!(rig.machine.snapshot().relayed_keys.is_empty());
    assert!(!rig.sdk.emit_relay(key(32, 1)));
}

#[tokio::test(start_paused = true)]
async fn silent_prepare_times_out_after_retries() {
    let mut config = Config::default();
    config.remote_input.timeout_ms = 1000;
    config.remote_input.retries = 2;
    let mut rig = rig_with(&config);
    rig.sdk.set_behaviour(OperationKind::Prepare, Behaviour::Silent);
    let started = tokio::time::Instant::now();

    rig.machine.start_cooperation(id(PEER), MOUSE).unwrap();
    while rig.machine.guard().is_busy() {
        let event = rig.gateway_rx.recv().await.unwrap();
        rig.machine.handle_gateway_event(event);
    }

    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3050),
        "gave up after {elapsed:?}"
    );
    let notices = rig.drain();
    assert_eq!(notices[1].message, CooperationMessage::OpenFail);
    assert_eq!(notices[1].reason, Some(FailureReason::RemoteTimeout));
    assert_eq!(notices[2].reason, Some(FailureReason::PrepareFailed));
    assert_eq!(rig.machine.state(), &CooperationState::Free);

    // a reply after the timeout is ignored
    rig.sdk.last_call(OperationKind::Prepare).unwrap().succeed();
    rig.settle().await;
    assert!(rig.drain().is_empty());
    assert!(!rig.machine.prepared().is_prepared());
}
