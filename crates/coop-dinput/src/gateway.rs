//! Façade over the D-input SDK.

use std::sync::Arc;
use std::time::Duration;

use coop_types::{Dhid, NetworkId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::DInputError;
use crate::event::{GatewayEvent, RelayEvent};
use crate::sdk::{DInputSdk, RelaySink, ReplySink};
use crate::tracker::{AsyncOpTracker, OpPayload, OperationKind, RequestId, Resolved};

/// Timeout policy for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// How long to wait for an answer before each retry.
    pub timeout: Duration,
    /// Extra waits granted to a slow remote before giving up.
    pub retries: u8,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            retries: 2,
        }
    }
}

/// What [`RemoteInputGateway::handle_event`] produced.
#[derive(Debug)]
pub enum GatewayOutput<C> {
    Resolved(Resolved<C>),
    Relay(RelayEvent),
}

/// Issues remote input calls and resolves each one exactly once.
///
/// `C` is the caller's completion: whatever it needs to continue once the
/// call is answered. The gateway never runs completions; it hands them back
/// from [`handle_event`](Self::handle_event).
pub struct RemoteInputGateway<C> {
    sdk: Arc<dyn DInputSdk>,
    tracker: AsyncOpTracker<C>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    relay_subscribed: bool,
}

impl<C> RemoteInputGateway<C> {
    /// Create a gateway and the receiver its callbacks and timers post to.
    ///
    /// The receiver must be drained on the task that owns the gateway.
    pub fn new(
        sdk: Arc<dyn DInputSdk>,
        config: GatewayConfig,
    ) -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let tracker = AsyncOpTracker::new(config.timeout, config.retries, events.clone());
        (
            Self {
                sdk,
                tracker,
                events,
                relay_subscribed: false,
            },
            rx,
        )
    }

    pub fn prepare_remote_input(
        &mut self,
        src: &NetworkId,
        sink: &NetworkId,
        completion: C,
    ) -> RequestId {
        info!(%src, %sink, "preparing remote input");
        let payload = OpPayload::pair(src.clone(), sink.clone());
        self.issue(OperationKind::Prepare, payload, completion, |sdk, p, reply| {
            sdk.prepare_remote_input(&p.src, &p.sink, reply)
        })
    }

    pub fn unprepare_remote_input(
        &mut self,
        src: &NetworkId,
        sink: &NetworkId,
        completion: C,
    ) -> RequestId {
        info!(%src, %sink, "unpreparing remote input");
        let payload = OpPayload::pair(src.clone(), sink.clone());
        self.issue(OperationKind::Unprepare, payload, completion, |sdk, p, reply| {
            sdk.unprepare_remote_input(&p.src, &p.sink, reply)
        })
    }

    pub fn start_remote_input(
        &mut self,
        src: &NetworkId,
        sink: &NetworkId,
        dhids: Vec<Dhid>,
        completion: C,
    ) -> RequestId {
        info!(%src, %sink, devices = dhids.len(), "starting remote input");
        let payload = OpPayload::with_dhids(src.clone(), sink.clone(), dhids);
        self.issue(OperationKind::Start, payload, completion, |sdk, p, reply| {
            sdk.start_remote_input(&p.src, &p.sink, &p.dhids, reply)
        })
    }

    pub fn stop_remote_input(
        &mut self,
        src: &NetworkId,
        sink: &NetworkId,
        dhids: Vec<Dhid>,
        completion: C,
    ) -> RequestId {
        info!(%src, %sink, devices = dhids.len(), "stopping remote input");
        let payload = OpPayload::with_dhids(src.clone(), sink.clone(), dhids);
        self.issue(OperationKind::Stop, payload, completion, |sdk, p, reply| {
            sdk.stop_remote_input(&p.src, &p.sink, &p.dhids, reply)
        })
    }

    /// Start receiving relay events. Idempotent.
    pub fn subscribe_relay(&mut self) -> Result<(), DInputError> {
        if self.relay_subscribed {
            return Ok(());
        }
        self.sdk
            .register_relay_listener(RelaySink::new(self.events.clone()))?;
        self.relay_subscribed = true;
        debug!("relay listener registered");
        Ok(())
    }

    /// Stop receiving relay events. Idempotent.
    pub fn unsubscribe_relay(&mut self) -> Result<(), DInputError> {
        if !self.relay_subscribed {
            return Ok(());
        }
        self.relay_subscribed = false;
        self.sdk.unregister_relay_listener()?;
        debug!("relay listener unregistered");
        Ok(())
    }

    #[must_use]
    pub fn is_relay_subscribed(&self) -> bool {
        self.relay_subscribed
    }

    /// Feed back one event from the gateway channel.
    pub fn handle_event(&mut self, event: GatewayEvent) -> Option<GatewayOutput<C>> {
        let resolved = match event {
            GatewayEvent::Reply(reply) => self.tracker.on_reply(reply),
            GatewayEvent::TimerFired { kind, request_id } => self.tracker.on_timer(kind, request_id),
            GatewayEvent::IssueFailed { kind, request_id } => {
                self.tracker.on_issue_failed(kind, request_id)
            }
            GatewayEvent::Superseded { request_id } => self.tracker.take_superseded(request_id),
            GatewayEvent::Relay(relay) => {
                if !self.relay_subscribed {
                    debug!(?relay, "relay event after unsubscribe dropped");
                    return None;
                }
                return Some(GatewayOutput::Relay(relay));
            }
        };
        resolved.map(GatewayOutput::Resolved)
    }

    /// Forget every pending call; their completions never run.
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.tracker.cancel_all();
        if dropped > 0 {
            info!(dropped, "pending remote calls abandoned");
        }
        dropped
    }

    #[must_use]
    pub fn is_pending(&self, kind: OperationKind) -> bool {
        self.tracker.is_pending(kind)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.tracker.pending_count()
    }

    fn issue(
        &mut self,
        kind: OperationKind,
        payload: OpPayload,
        completion: C,
        call: impl FnOnce(&dyn DInputSdk, &OpPayload, ReplySink) -> Result<(), DInputError>,
    ) -> RequestId {
        let request_id = self.tracker.register(kind, payload.clone(), completion);
        let reply = ReplySink::new(kind, request_id, self.events.clone());
        if let Err(e) = call(self.sdk.as_ref(), &payload, reply) {
            warn!(%kind, request = %request_id, error = %e, "remote input call refused");
            if self
                .events
                .send(GatewayEvent::IssueFailed { kind, request_id })
                .is_err()
            {
                debug!("gateway channel closed");
            }
        }
        request_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{RelaySource, STATUS_OK};
    use crate::mock::{Behaviour, MockSdk, MockSdkHandle};
    use crate::tracker::OpOutcome;

    /// Completion used by these tests: just a label.
    type Label = &'static str;

    fn gateway(config: GatewayConfig) -> (
        RemoteInputGateway<Label>,
        mpsc::UnboundedReceiver<GatewayEvent>,
        MockSdkHandle,
    ) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let sdk = MockSdk::new();
        let handle = sdk.handle();
        let (gw, rx) = RemoteInputGateway::new(Arc::new(sdk), config);
        (gw, rx, handle)
    }

    /// Drain the channel until something resolves.
    async fn next_output(
        gw: &mut RemoteInputGateway<Label>,
        rx: &mut mpsc::UnboundedReceiver<GatewayEvent>,
    ) -> GatewayOutput<Label> {
        loop {
            let event = rx.recv().await.expect("gateway channel open");
            if let Some(out) = gw.handle_event(event) {
                return out;
            }
        }
    }

    fn resolved(out: GatewayOutput<Label>) -> Resolved<Label> {
        match out {
            GatewayOutput::Resolved(r) => r,
            GatewayOutput::Relay(e) => panic!("unexpected relay event {e:?}"),
        }
    }

    fn ids(a: &str, b: &str) -> (NetworkId, NetworkId) {
        (NetworkId::from(a), NetworkId::from(b))
    }

    #[tokio::test]
    async fn completion_never_runs_inside_issue() {
        let (mut gw, mut rx, sdk) = gateway(GatewayConfig::default());
        let (src, sink) = ids("local", "peer");

        gw.prepare_remote_input(&src, &sink, "prepared");
        // the mock answered synchronously, yet the request is still pending
        assert!(gw.is_pending(OperationKind::Prepare));
        assert_eq!(sdk.calls_of(OperationKind::Prepare).len(), 1);

        let r = resolved(next_output(&mut gw, &mut rx).await);
        assert_eq!(r.completion, "prepared");
        assert_eq!(r.outcome, OpOutcome::Succeeded);
        assert!(!gw.is_pending(OperationKind::Prepare));
    }

    #[tokio::test]
    async fn start_needs_both_shapes() {
        let (mut gw, mut rx, sdk) = gateway(GatewayConfig::default());
        sdk.set_behaviour(OperationKind::Start, Behaviour::Silent);
        let (src, sink) = ids("local", "peer");
        let dhids = vec![Dhid::from("mouse"), Dhid::from("kbd")];

        gw.start_remote_input(&src, &sink, dhids.clone(), "started");
        let call = sdk.last_call(OperationKind::Start).expect("start issued");
        assert_eq!(call.dhids, dhids);

        call.reply.network_pair(&src, &sink, STATUS_OK);
        let event = rx.recv().await.unwrap();
        assert!(gw.handle_event(event).is_none());

        call.reply.dhids(&dhids, STATUS_OK);
        let r = resolved(next_output(&mut gw, &mut rx).await);
        assert_eq!(r.outcome, OpOutcome::Succeeded);
    }

    #[tokio::test]
    async fn refused_call_fails_through_the_channel() {
        let (mut gw, mut rx, sdk) = gateway(GatewayConfig::default());
        sdk.set_behaviour(OperationKind::Stop, Behaviour::Refuse);
        let (src, sink) = ids("local", "peer");

        gw.stop_remote_input(&src, &sink, vec![Dhid::from("mouse")], "stopped");
        assert!(gw.is_pending(OperationKind::Stop));

        let r = resolved(next_output(&mut gw, &mut rx).await);
        assert_eq!(r.outcome, OpOutcome::Rejected);
        assert_eq!(r.completion, "stopped");
    }

    #[tokio::test]
    async fn remote_failure_is_rejected() {
        let (mut gw, mut rx, sdk) = gateway(GatewayConfig::default());
        sdk.set_behaviour(OperationKind::Prepare, Behaviour::Fail);
        let (src, sink) = ids("local", "peer");

        gw.prepare_remote_input(&src, &sink, "prepared");
        let r = resolved(next_output(&mut gw, &mut rx).await);
        assert_eq!(r.outcome, OpOutcome::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_remote_times_out_once() {
        let config = GatewayConfig {
            timeout: Duration::from_secs(1),
            retries: 2,
        };
        let (mut gw, mut rx, sdk) = gateway(config);
        sdk.set_behaviour(OperationKind::Unprepare, Behaviour::Silent);
        let (src, sink) = ids("local", "peer");

        gw.unprepare_remote_input(&src, &sink, "unprepared");
        let r = resolved(next_output(&mut gw, &mut rx).await);
        assert_eq!(r.outcome, OpOutcome::TimedOut);

        // the remote finally answers: nothing left to resolve
        let call = sdk.last_call(OperationKind::Unprepare).unwrap();
        call.succeed();
        let late = rx.recv().await.unwrap();
        assert!(gw.handle_event(late).is_none());
        assert_eq!(gw.pending_count(), 0);
    }

    #[tokio::test]
    async fn relay_events_only_while_subscribed() {
        let (mut gw, mut rx, sdk) = gateway(GatewayConfig::default());
        let event = RelayEvent {
            source: RelaySource::Keyboard,
            code: 30,
            value: 1,
        };
        assert!(!sdk.emit_relay(event));

        gw.subscribe_relay().unwrap();
        gw.subscribe_relay().unwrap();
        assert!(sdk.has_relay_listener());
        assert!(sdk.emit_relay(event));
        match next_output(&mut gw, &mut rx).await {
            GatewayOutput::Relay(got) => assert_eq!(got, event),
            GatewayOutput::Resolved(r) => panic!("unexpected resolution {:?}", r.kind),
        }

        gw.unsubscribe_relay().unwrap();
        assert!(!sdk.has_relay_listener());
        assert!(!gw.is_relay_subscribed());
    }

    #[tokio::test]
    async fn cancel_all_silences_pending_calls() {
        let (mut gw, mut rx, sdk) = gateway(GatewayConfig::default());
        sdk.set_behaviour(OperationKind::Prepare, Behaviour::Silent);
        let (src, sink) = ids("local", "peer");

        gw.prepare_remote_input(&src, &sink, "prepared");
        assert_eq!(gw.cancel_all(), 1);

        sdk.last_call(OperationKind::Prepare).unwrap().succeed();
        let event = rx.recv().await.unwrap();
        assert!(gw.handle_event(event).is_none());
    }
}
