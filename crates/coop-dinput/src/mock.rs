//! Mock D-input SDK for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use coop_types::{Dhid, NetworkId};

use crate::error::DInputError;
use crate::event::{RelayEvent, STATUS_OK};
use crate::sdk::{DInputSdk, RelaySink, ReplySink};
use crate::tracker::OperationKind;

/// Status the mock answers failures with.
pub const STATUS_FAIL: i32 = -1;

/// How the mock answers a given kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Answer success on every callback shape.
    Succeed,
    /// Answer failure on the network-pair shape.
    Fail,
    /// Never answer; tests reply by hand or let the timeout fire.
    Silent,
    /// Refuse the call synchronously.
    Refuse,
}

/// One call received by the mock.
#[derive(Debug, Clone)]
pub struct SdkCall {
    pub kind: OperationKind,
    pub src: NetworkId,
    pub sink: NetworkId,
    pub dhids: Vec<Dhid>,
    pub reply: ReplySink,
}

impl SdkCall {
    /// Answer on both shapes the way a healthy SDK would.
    pub fn succeed(&self) {
        self.reply.network_pair(&self.src, &self.sink, STATUS_OK);
        if matches!(self.kind, OperationKind::Start | OperationKind::Stop) {
            self.reply.dhids(&self.dhids, STATUS_OK);
        }
    }

    pub fn fail(&self) {
        self.reply.network_pair(&self.src, &self.sink, STATUS_FAIL);
    }
}

#[derive(Default)]
struct MockSdkState {
    behaviours: HashMap<OperationKind, Behaviour>,
    calls: Vec<SdkCall>,
    relay: Option<RelaySink>,
}

/// Mock SDK. Every kind defaults to [`Behaviour::Succeed`].
#[derive(Default)]
pub struct MockSdk {
    state: Arc<Mutex<MockSdkState>>,
}

impl MockSdk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a clonable handle for steering and observing the mock.
    pub fn handle(&self) -> MockSdkHandle {
        MockSdkHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn call(
        &self,
        kind: OperationKind,
        src: &NetworkId,
        sink: &NetworkId,
        dhids: &[Dhid],
        reply: ReplySink,
    ) -> Result<(), DInputError> {
        let call = SdkCall {
            kind,
            src: src.clone(),
            sink: sink.clone(),
            dhids: dhids.to_vec(),
            reply,
        };
        let behaviour = {
            let mut state = self.state.lock().unwrap();
            let behaviour = state
                .behaviours
                .get(&kind)
                .copied()
                .unwrap_or(Behaviour::Succeed);
            if behaviour != Behaviour::Refuse {
                state.calls.push(call.clone());
            }
            behaviour
        };
        match behaviour {
            Behaviour::Succeed => call.succeed(),
            Behaviour::Fail => call.fail(),
            Behaviour::Silent => {}
            Behaviour::Refuse => return Err(DInputError::Refused(format!("mock refused {kind}"))),
        }
        Ok(())
    }
}

impl DInputSdk for MockSdk {
    fn prepare_remote_input(
        &self,
        src: &NetworkId,
        sink: &NetworkId,
        reply: ReplySink,
    ) -> Result<(), DInputError> {
        self.call(OperationKind::Prepare, src, sink, &[], reply)
    }

    fn unprepare_remote_input(
        &self,
        src: &NetworkId,
        sink: &NetworkId,
        reply: ReplySink,
    ) -> Result<(), DInputError> {
        self.call(OperationKind::Unprepare, src, sink, &[], reply)
    }

    fn start_remote_input(
        &self,
        src: &NetworkId,
        sink: &NetworkId,
        dhids: &[Dhid],
        reply: ReplySink,
    ) -> Result<(), DInputError> {
        self.call(OperationKind::Start, src, sink, dhids, reply)
    }

    fn stop_remote_input(
        &self,
        src: &NetworkId,
        sink: &NetworkId,
        dhids: &[Dhid],
        reply: ReplySink,
    ) -> Result<(), DInputError> {
        self.call(OperationKind::Stop, src, sink, dhids, reply)
    }

    fn register_relay_listener(&self, sink: RelaySink) -> Result<(), DInputError> {
        let mut state = self.state.lock().unwrap();
        if state.relay.is_some() {
            return Err(DInputError::RelayAlreadyRegistered);
        }
        state.relay = Some(sink);
        Ok(())
    }

    fn unregister_relay_listener(&self) -> Result<(), DInputError> {
        self.state.lock().unwrap().relay = None;
        Ok(())
    }
}

/// Clonable steering handle for [`MockSdk`].
#[derive(Clone)]
pub struct MockSdkHandle {
    state: Arc<Mutex<MockSdkState>>,
}

impl MockSdkHandle {
    pub fn set_behaviour(&self, kind: OperationKind, behaviour: Behaviour) {
        self.state.lock().unwrap().behaviours.insert(kind, behaviour);
    }

    /// Snapshot of every call issued so far.
    pub fn calls(&self) -> Vec<SdkCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_of(&self, kind: OperationKind) -> Vec<SdkCall> {
        self.calls().into_iter().filter(|c| c.kind == kind).collect()
    }

    /// The most recent call of `kind`, for answering by hand.
    pub fn last_call(&self, kind: OperationKind) -> Option<SdkCall> {
        self.calls_of(kind).pop()
    }

    pub fn has_relay_listener(&self) -> bool {
        self.state.lock().unwrap().relay.is_some()
    }

    /// Push a relay event as the SDK would. Returns false with no listener.
    pub fn emit_relay(&self, event: RelayEvent) -> bool {
        match &self.state.lock().unwrap().relay {
            Some(sink) => {
                sink.post(event);
                true
            }
            None => false,
        }
    }
}
