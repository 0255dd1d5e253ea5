//! The cooperation state machine.
//!
//! [`CooperationStateMachine`] owns the single live [`CooperationState`], the
//! prepared pair and the transition guard. It is driven from one task: IPC
//! requests, peer signals and gateway events all arrive through the service
//! loop, so no method here needs a lock.
//!
//! Remote calls never complete inline. Each one carries a [`Continuation`]
//! describing what to do next, and the gateway hands it back through
//! [`CooperationStateMachine::handle_gateway_event`] once the call resolves.

mod completion;
mod free;
mod inbound;
mod outbound;
mod prepare;

use std::collections::BTreeSet;
use std::sync::Arc;

use coop_device::{CrossingSwitch, CursorService, DeviceRegistry, RemoteMgr};
use coop_dinput::{
    DInputSdk, GatewayEvent, GatewayOutput, RelayEvent, RelaySource, RemoteInputGateway,
};
use coop_types::{
    CooperationMessage, CooperationNotice, CooperationState, DeviceId, Dhid, EventVerdict,
    FailureReason, MouseLocationPercent, NetworkId, PeerSignal, PointerEvent, PreparedPair,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::CoopError;
use crate::notifier::{CooperationObserver, CooperationSessionNotifier, SubscriptionId};
use crate::outbox::{OutboxWorker, PeerNotify, PeerOutbox};
use crate::service::ServiceEvent;

pub(crate) use completion::Continuation;
pub(crate) use prepare::StartPlan;

/// External services the machine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn DeviceRegistry>,
    pub remote: Arc<dyn RemoteMgr>,
    pub cursor: Arc<dyn CursorService>,
    pub crossing: Arc<dyn CrossingSwitch>,
    pub dinput: Arc<dyn DInputSdk>,
}

/// Set while a start or stop is in flight; new requests are refused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransitionGuard {
    pub is_starting: bool,
    pub is_stopping: bool,
}

impl TransitionGuard {
    #[must_use]
    pub fn is_busy(self) -> bool {
        self.is_starting || self.is_stopping
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Point-in-time view of the machine, published after every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CooperationSnapshot {
    pub state: CooperationState,
    pub guard: TransitionGuard,
    pub prepared: PreparedPair,
    pub session_peer: Option<NetworkId>,
    pub enabled: bool,
    /// Keyboard codes held down on the relayed keyboard while Out.
    pub relayed_keys: Vec<u32>,
    pub pending_remote_calls: usize,
}

/// Owns who holds the shared pointer and serializes every transition.
pub struct CooperationStateMachine {
    state: CooperationState,
    guard: TransitionGuard,
    prepared: PreparedPair,
    /// The other end of the active session.
    session_peer: Option<NetworkId>,
    /// Peer whose start/stop announcement set the guard.
    remote_transition: Option<NetworkId>,
    /// Cursor location captured when the last start was requested.
    start_location: MouseLocationPercent,
    default_location: MouseLocationPercent,
    relayed_keys: BTreeSet<u32>,
    watched: Option<NetworkId>,
    gateway: RemoteInputGateway<Continuation>,
    notifier: CooperationSessionNotifier,
    outbox: PeerOutbox,
    collab: Collaborators,
    events: mpsc::Sender<ServiceEvent>,
    pid: u32,
}

impl CooperationStateMachine {
    /// Create a machine in the Free state.
    ///
    /// The returned receiver carries gateway replies and timer expiries; feed
    /// each one back through [`handle_gateway_event`](Self::handle_gateway_event).
    /// The worker delivers peer notifications and must be run on its own task.
    /// `events` is where crossing-switch listeners post their changes.
    pub fn new(
        config: &Config,
        collab: Collaborators,
        events: mpsc::Sender<ServiceEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<GatewayEvent>, OutboxWorker) {
        let (gateway, gateway_rx) = RemoteInputGateway::new(
            Arc::clone(&collab.dinput),
            config.remote_input.gateway_config(),
        );
        let (outbox, worker) = PeerOutbox::new(
            Arc::clone(&collab.remote),
            config.remote_input.notify_timeout(),
        );
        let machine = Self {
            state: CooperationState::Free,
            guard: TransitionGuard::default(),
            prepared: PreparedPair::default(),
            session_peer: None,
            remote_transition: None,
            start_location: MouseLocationPercent::CENTER,
            default_location: config.cursor.default_location(),
            relayed_keys: BTreeSet::new(),
            watched: None,
            gateway,
            notifier: CooperationSessionNotifier::new(),
            outbox,
            collab,
            events,
            pid: std::process::id(),
        };
        (machine, gateway_rx, worker)
    }

    #[must_use]
    pub fn state(&self) -> &CooperationState {
        &self.state
    }

    #[must_use]
    pub fn guard(&self) -> TransitionGuard {
        self.guard
    }

    #[must_use]
    pub fn prepared(&self) -> &PreparedPair {
        &self.prepared
    }

    #[must_use]
    pub fn snapshot(&self) -> CooperationSnapshot {
        CooperationSnapshot {
            state: self.state.clone(),
            guard: self.guard,
            prepared: self.prepared.clone(),
            session_peer: self.session_peer.clone(),
            enabled: self.collab.crossing.get_state(&self.local()),
            relayed_keys: self.relayed_keys.iter().copied().collect(),
            pending_remote_calls: self.gateway.pending_count(),
        }
    }

    pub fn subscribe(&mut self, observer: Arc<dyn CooperationObserver>) -> SubscriptionId {
        self.notifier.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // -----------------------------------------------------------------------
    // IPC operations
    // -----------------------------------------------------------------------

    /// Share `device` with `target`, or hand a consumed pointer on.
    ///
    /// `Ok` means the request was accepted; the outcome is published later as
    /// `InfoSuccess` or `InfoFail`.
    pub fn start_cooperation(
        &mut self,
        target: NetworkId,
        device: DeviceId,
    ) -> Result<(), CoopError> {
        if self.guard.is_busy() {
            debug!(%target, ?device, "start refused: transition in flight");
            return Err(CoopError::Busy);
        }
        if !self.collab.crossing.get_state(&self.local()) {
            return Err(CoopError::NotEnabled);
        }
        let route = match self.state.clone() {
            CooperationState::Free => self.plan_free_start(&target, device)?,
            CooperationState::In(shared) => self.plan_in_start(&target, device, &shared)?,
            CooperationState::Out(_) => return Err(CoopError::WrongState(self.state.clone())),
        };

        info!(%target, ?device, state = %self.state, "starting cooperation");
        self.guard.is_starting = true;
        self.start_location = self.collab.cursor.location_percent();
        self.publish(CooperationMessage::InfoStart, &target);

        match route {
            StartRoute::Share(plan) => self.run_free_start(plan),
            StartRoute::ComeBack(plan) => self.run_come_back(plan),
            StartRoute::Relay(plan) => {
                self.notify_peer(PeerNotify::AnnounceStart {
                    local: self.local(),
                    remote: plan.target.clone(),
                });
                self.prepare_and_start(plan);
            }
        }
        Ok(())
    }

    /// End the active session.
    ///
    /// `Ok` means the request was accepted; the outcome is published later as
    /// `CloseSuccess` or `CloseFail`.
    pub fn stop_cooperation(&mut self) -> Result<(), CoopError> {
        if self.guard.is_busy() {
            debug!("stop refused: transition in flight");
            return Err(CoopError::Busy);
        }
        let route = match self.state.clone() {
            CooperationState::Free => return Err(CoopError::WrongState(CooperationState::Free)),
            CooperationState::In(shared) => self.plan_in_stop(&shared)?,
            CooperationState::Out(shared) => self.plan_out_stop(&shared)?,
        };

        info!(peer = %route.peer, state = %self.state, "stopping cooperation");
        self.guard.is_stopping = true;
        self.publish(CooperationMessage::Stop, &route.peer);
        self.gateway.stop_remote_input(
            &route.src,
            &route.sink,
            route.dhids,
            Continuation::Stopped { peer: route.peer },
        );
        Ok(())
    }

    /// Turn cooperation on or off for this device.
    pub fn enable_cooperation(&mut self, enabled: bool) -> Result<(), CoopError> {
        let local = self.local();
        self.collab
            .crossing
            .update_state(enabled, std::slice::from_ref(&local))
            .map_err(|e| CoopError::ServiceUnavailable(e.to_string()))?;
        info!(enabled, "cooperation switch updated");
        let message = if enabled {
            CooperationMessage::StateOn
        } else {
            CooperationMessage::StateOff
        };
        self.publish(message, &local);

        if !enabled && !self.state.is_free() {
            if let Err(e) = self.stop_cooperation() {
                warn!(error = %e, "could not stop session after disabling cooperation");
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get_cooperation_state(&self, network_id: &NetworkId) -> bool {
        self.collab.crossing.get_state(network_id)
    }

    /// Decide whether a raw local event reaches local delivery.
    pub fn check_pointer_event(&mut self, event: &PointerEvent) -> EventVerdict {
        if self.guard.is_busy() {
            return EventVerdict::Suppress;
        }
        let device = event.device_id;
        let registry = &self.collab.registry;
        let belongs = match &self.state {
            CooperationState::Free => {
                return if registry.is_remote(device) {
                    EventVerdict::Suppress
                } else {
                    EventVerdict::Forward
                };
            }
            CooperationState::In(_) => registry.is_remote(device),
            CooperationState::Out(shared) => registry.dhid_of(device).as_ref() == Some(shared),
        };
        if belongs {
            return EventVerdict::Forward;
        }
        if event.action.is_motion() {
            self.implicit_stop(device);
        }
        EventVerdict::Suppress
    }

    fn implicit_stop(&mut self, device: DeviceId) {
        info!(?device, state = %self.state, "local motion ends the session");
        if let Err(e) = self.stop_cooperation() {
            debug!(error = %e, "implicit stop not issued");
        }
    }

    /// A paired device went away.
    pub fn on_device_offline(&mut self, id: &NetworkId) {
        if self.participates(id) {
            let dropped = self.gateway.cancel_all();
            warn!(peer = %id, state = %self.state, dropped, "session peer offline, resetting");
            self.guard.clear();
            self.remote_transition = None;
            self.set_state(CooperationState::Free);
            self.reset_cursor();
            self.prepared.clear();
            self.end_session();
            self.publish(CooperationMessage::Close, id);
            return;
        }
        if self.state.is_free() && self.prepared.involves(id) {
            debug!(peer = %id, "clearing prepared pair of offline device");
            self.prepared.clear();
        }
        if self.remote_transition.as_ref() == Some(id) {
            debug!(peer = %id, "announcing peer offline, releasing guard");
            self.guard.clear();
            self.remote_transition = None;
        }
    }

    /// A keyboard was plugged in locally.
    pub fn on_keyboard_online(&mut self, dhid: Dhid) {
        match &self.state {
            CooperationState::Out(_) => self.out_keyboard_online(dhid),
            CooperationState::Free | CooperationState::In(_) => {
                debug!(%dhid, state = %self.state, "keyboard online ignored");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Peer signals
    // -----------------------------------------------------------------------

    pub fn on_peer_signal(&mut self, signal: PeerSignal) {
        match signal {
            PeerSignal::StartRequest { from } => self.on_remote_start(from),
            PeerSignal::StartResult {
                from,
                success,
                dhid,
                location,
            } => self.on_remote_start_result(from, success, dhid, location),
            PeerSignal::StopRequest { from } => self.on_remote_stop(from),
            PeerSignal::StopResult { from, success } => self.on_remote_stop_result(from, success),
            PeerSignal::RelayAnnounce { new_sink } => self.on_relay_announce(new_sink),
        }
    }

    /// A peer is about to share its input with us.
    pub fn on_remote_start(&mut self, from: NetworkId) {
        if self.guard.is_busy() {
            warn!(peer = %from, "remote start while a transition is in flight, ignored");
            return;
        }
        if !self.state.is_free() && !self.participates(&from) {
            warn!(peer = %from, state = %self.state, "remote start from outside the session refused");
            return;
        }
        info!(peer = %from, "peer starting cooperation");
        self.guard.is_starting = true;
        self.remote_transition = Some(from.clone());
        self.publish(CooperationMessage::InfoStart, &from);
    }

    /// A peer finished a start that involves us.
    pub fn on_remote_start_result(
        &mut self,
        from: NetworkId,
        success: bool,
        dhid: Dhid,
        location: MouseLocationPercent,
    ) {
        let announced = self.remote_transition.as_ref() == Some(&from);
        if !self.release_remote_guard(&from) {
            return;
        }
        if !announced && !self.participates(&from) {
            warn!(peer = %from, state = %self.state, "unannounced start result from outside the session ignored");
            return;
        }
        if !success {
            info!(peer = %from, "peer start failed");
            self.publish_failed(CooperationMessage::InfoFail, &from, FailureReason::RemoteRejected);
            return;
        }

        match self.state.clone() {
            CooperationState::Free => {
                info!(peer = %from, %dhid, "consuming peer input");
                self.set_state(CooperationState::In(dhid));
                self.show_cursor_at(location);
                self.begin_session(from.clone());
            }
            CooperationState::Out(_) => {
                info!(peer = %from, "shared pointer came back");
                self.set_state(CooperationState::Free);
                self.show_cursor_at(location);
                self.unprepare(&from);
                self.end_session();
            }
            CooperationState::In(old) => {
                info!(peer = %from, %old, new = %dhid, "consumed pointer replaced");
                self.set_state(CooperationState::In(dhid));
                self.show_cursor_at(location);
                self.begin_session(from.clone());
            }
        }
        self.publish(CooperationMessage::InfoSuccess, &from);
    }

    /// A peer is about to stop the session.
    pub fn on_remote_stop(&mut self, from: NetworkId) {
        if self.guard.is_busy() {
            warn!(peer = %from, "remote stop while a transition is in flight, ignored");
            return;
        }
        if !self.participates(&from) {
            debug!(peer = %from, "remote stop from a non-participant ignored");
            return;
        }
        self.guard.is_stopping = true;
        self.remote_transition = Some(from.clone());
        self.publish(CooperationMessage::Stop, &from);
    }

    /// A peer finished stopping the session.
    pub fn on_remote_stop_result(&mut self, from: NetworkId, success: bool) {
        if !self.release_remote_guard(&from) {
            return;
        }
        if !self.participates(&from) {
            debug!(peer = %from, state = %self.state, "stop result from a non-participant ignored");
            return;
        }
        if !success {
            self.publish_failed(CooperationMessage::CloseFail, &from, FailureReason::RemoteRejected);
            return;
        }
        info!(peer = %from, "peer stopped the session");
        self.set_state(CooperationState::Free);
        self.reset_cursor();
        self.unprepare(&from);
        self.end_session();
        self.publish(CooperationMessage::StopSuccess, &from);
    }

    /// The device consuming our pointer handed it on to `new_sink`.
    pub fn on_relay_announce(&mut self, new_sink: NetworkId) {
        if !matches!(self.state, CooperationState::Out(_)) {
            warn!(sink = %new_sink, state = %self.state, "relay announce outside Out ignored");
            return;
        }
        info!(old = ?self.session_peer, new = %new_sink, "shared pointer relayed");
        self.prepared.sink = new_sink.clone();
        self.unwatch();
        self.begin_session(new_sink);
    }

    /// Clear a guard set by `from`. Returns false when a local transition
    /// owns the guard and the signal must be dropped.
    fn release_remote_guard(&mut self, from: &NetworkId) -> bool {
        if self.remote_transition.as_ref() == Some(from) {
            self.guard.clear();
            self.remote_transition = None;
            return true;
        }
        if self.guard.is_busy() {
            warn!(peer = %from, guard = ?self.guard, "peer result during a local transition dropped");
            return false;
        }
        true
    }

    /// A watched peer toggled its crossing switch.
    pub fn on_crossing_switch_changed(&mut self, network_id: &NetworkId, enabled: bool) {
        debug!(peer = %network_id, enabled, "crossing switch changed");
        if enabled || !self.participates(network_id) {
            return;
        }
        info!(peer = %network_id, "peer disabled cooperation, stopping");
        if let Err(e) = self.stop_cooperation() {
            warn!(peer = %network_id, error = %e, "could not stop after peer disabled cooperation");
        }
    }

    // -----------------------------------------------------------------------
    // Gateway
    // -----------------------------------------------------------------------

    /// Apply one event from the gateway channel.
    pub fn handle_gateway_event(&mut self, event: GatewayEvent) {
        match self.gateway.handle_event(event) {
            Some(GatewayOutput::Resolved(resolved)) => self.resume(resolved),
            Some(GatewayOutput::Relay(relay)) => self.on_relay_event(relay),
            None => {}
        }
    }

    fn on_relay_event(&mut self, event: RelayEvent) {
        if !matches!(self.state, CooperationState::Out(_)) || event.source != RelaySource::Keyboard
        {
            return;
        }
        match event.value {
            1 => {
                self.relayed_keys.insert(event.code);
            }
            0 => {
                self.relayed_keys.remove(&event.code);
            }
            _ => {}
        }
    }

    /// Drop pending work and listeners before the service exits.
    pub fn shutdown(&mut self) {
        let dropped = self.gateway.cancel_all();
        if let Err(e) = self.gateway.unsubscribe_relay() {
            warn!(error = %e, "failed to unregister relay listener");
        }
        self.unwatch();
        info!(dropped, state = %self.state, "cooperation machine shut down");
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn local(&self) -> NetworkId {
        self.collab.registry.local_network_id()
    }

    /// Whether `id` is the other end of the active session.
    fn participates(&self, id: &NetworkId) -> bool {
        match &self.state {
            CooperationState::Free => false,
            CooperationState::Out(_) => {
                self.session_peer.as_ref() == Some(id)
                    || (self.prepared.is_prepared() && &self.prepared.sink == id)
            }
            CooperationState::In(shared) => {
                self.collab.registry.origin_network_of_dhid(shared).as_ref() == Some(id)
                    || self.session_peer.as_ref() == Some(id)
            }
        }
    }

    /// Hardware ids travelling with `shared`.
    fn dhids_of_shared(&self, shared: &Dhid) -> Vec<Dhid> {
        let registry = &self.collab.registry;
        let dhids = registry
            .device_of_dhid(shared)
            .map(|device| registry.pointer_and_keyboard_dhids_of(device))
            .unwrap_or_default();
        if dhids.is_empty() {
            vec![shared.clone()]
        } else {
            dhids
        }
    }

    fn set_state(&mut self, next: CooperationState) {
        if self.state == next {
            return;
        }
        let was_out = matches!(self.state, CooperationState::Out(_));
        let is_out = matches!(next, CooperationState::Out(_));
        info!(from = %self.state, to = %next, "cooperation state changed");
        self.state = next;

        if was_out && !is_out {
            self.relayed_keys.clear();
            if let Err(e) = self.gateway.unsubscribe_relay() {
                warn!(error = %e, "failed to unregister relay listener");
            }
        } else if is_out && !was_out {
            if let Err(e) = self.gateway.subscribe_relay() {
                warn!(error = %e, "failed to register relay listener");
            }
        }
    }

    fn begin_session(&mut self, peer: NetworkId) {
        self.unwatch();
        self.watch(&peer);
        self.session_peer = Some(peer);
    }

    fn end_session(&mut self) {
        self.unwatch();
        self.session_peer = None;
    }

    fn watch(&mut self, peer: &NetworkId) {
        let events = self.events.clone();
        let listener = Box::new(move |network_id: NetworkId, enabled: bool| {
            if events
                .try_send(ServiceEvent::CrossingSwitchChanged {
                    network_id,
                    enabled,
                })
                .is_err()
            {
                warn!("service queue full, crossing switch change dropped");
            }
        });
        match self.collab.crossing.register_listener(peer, listener) {
            Ok(()) => self.watched = Some(peer.clone()),
            Err(e) => warn!(peer = %peer, error = %e, "failed to watch crossing switch"),
        }
    }

    fn unwatch(&mut self) {
        if let Some(peer) = self.watched.take() {
            if let Err(e) = self.collab.crossing.unregister_listener(&peer) {
                warn!(peer = %peer, error = %e, "failed to unwatch crossing switch");
            }
        }
    }

    /// Tear down the prepared pair, if any.
    fn unprepare(&mut self, peer: &NetworkId) {
        if !self.prepared.is_prepared() {
            return;
        }
        let pair = std::mem::take(&mut self.prepared);
        self.gateway.unprepare_remote_input(
            &pair.src,
            &pair.sink,
            Continuation::Unprepared { pair: pair.clone() },
        );
        self.publish(CooperationMessage::Close, peer);
    }

    fn hide_cursor(&self) {
        if let Err(e) = self.collab.cursor.set_visible(self.pid, false) {
            warn!(error = %e, "failed to hide cursor");
        }
    }

    fn show_cursor_at(&self, location: MouseLocationPercent) {
        let cursor = &self.collab.cursor;
        if let Err(e) = cursor
            .set_visible(self.pid, true)
            .and_then(|()| cursor.set_absolute_location(location))
        {
            warn!(error = %e, "failed to place cursor");
        }
    }

    /// Visible only with a local pointer, at the configured default spot.
    fn reset_cursor(&self) {
        let cursor = &self.collab.cursor;
        let visible = self.collab.registry.has_local_pointer();
        if let Err(e) = cursor
            .set_visible(self.pid, visible)
            .and_then(|()| cursor.set_absolute_location(self.default_location))
        {
            warn!(error = %e, "failed to reset cursor");
        }
    }

    fn notify_peer(&self, notify: PeerNotify) {
        self.outbox.send(notify);
    }

    fn publish(&self, message: CooperationMessage, peer: &NetworkId) {
        self.notifier
            .publish(&CooperationNotice::new(message, peer.clone()));
    }

    fn publish_failed(&self, message: CooperationMessage, peer: &NetworkId, reason: FailureReason) {
        self.notifier
            .publish(&CooperationNotice::failed(message, peer.clone(), reason));
    }
}

/// How an accepted start proceeds.
enum StartRoute {
    /// Free: share a local device.
    Share(StartPlan),
    /// In, target is the origin: hand the consumed pointer back.
    ComeBack(StartPlan),
    /// In, target is a third device.
    Relay(StartPlan),
}

/// Arguments of the stop call for the active session.
struct StopRoute {
    peer: NetworkId,
    src: NetworkId,
    sink: NetworkId,
    dhids: Vec<Dhid>,
}

#[cfg(test)]
mod tests;
