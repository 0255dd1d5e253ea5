//! What happens when a remote call resolves.

use std::sync::Arc;

use coop_dinput::Resolved;
use coop_types::{
    CooperationMessage, CooperationState, DeviceId, Dhid, FailureReason, NetworkId, PreparedPair,
};
use tracing::{debug, info, warn};

use super::{CooperationStateMachine, StartPlan};
use crate::outbox::PeerNotify;

/// The next step of a multi-call sequence, stored with the pending call.
#[derive(Debug)]
pub(crate) enum Continuation {
    /// Prepare answered; start sharing next.
    Prepared(StartPlan),
    /// Start answered; finish, or stop the original link of a relay.
    Started(StartPlan),
    /// The original link of a relay was stopped.
    OriginStopped(StartPlan),
    /// Best-effort undo of a half-applied relay.
    RelayRolledBack { target: NetworkId },
    /// The consumed pointer went back to its origin.
    CameBack { target: NetworkId, device: DeviceId },
    Stopped { peer: NetworkId },
    Unprepared { pair: PreparedPair },
    KeyboardAdded { dhid: Dhid },
}

impl CooperationStateMachine {
    pub(super) fn resume(&mut self, resolved: Resolved<Continuation>) {
        let Resolved {
            kind,
            request_id,
            outcome,
            completion,
        } = resolved;
        debug!(%kind, request = %request_id, ?outcome, "remote call resolved");
        let result = outcome.failure_reason().map_or(Ok(()), Err);

        match completion {
            Continuation::Prepared(plan) => match result {
                Ok(()) => {
                    self.prepared = PreparedPair::new(plan.src.clone(), plan.target.clone());
                    self.publish(CooperationMessage::OpenSuccess, &plan.target);
                    self.start_shared_input(plan);
                }
                Err(reason) => {
                    warn!(src = %plan.src, sink = %plan.target, %reason, "prepare failed");
                    self.prepared.clear();
                    self.publish_failed(CooperationMessage::OpenFail, &plan.target, reason);
                    self.on_start_finished(plan.target, plan.device, Err(FailureReason::PrepareFailed));
                }
            },
            Continuation::Started(plan) => match result {
                Ok(()) if plan.relay => self.stop_origin_link(plan),
                _ => self.on_start_finished(plan.target, plan.device, result),
            },
            Continuation::OriginStopped(plan) => {
                if let Err(reason) = result {
                    warn!(origin = %plan.src, target = %plan.target, %reason, "original link still up, rolling relay back");
                    let src = plan.src.clone();
                    let target = plan.target.clone();
                    self.gateway.stop_remote_input(
                        &src,
                        &target,
                        plan.dhids,
                        Continuation::RelayRolledBack {
                            target: target.clone(),
                        },
                    );
                    self.on_start_finished(target, plan.device, Err(FailureReason::PartialRelayFailure));
                } else {
                    self.on_start_finished(plan.target, plan.device, Ok(()));
                }
            }
            Continuation::RelayRolledBack { target } => match result {
                Ok(()) => info!(%target, "relay rolled back"),
                Err(reason) => warn!(%target, %reason, "relay rollback failed"),
            },
            Continuation::CameBack { target, device } => {
                self.on_start_finished(target, device, result);
            }
            Continuation::Stopped { peer } => self.on_stop_finished(peer, result),
            Continuation::Unprepared { pair } => match result {
                Ok(()) => debug!(src = %pair.src, sink = %pair.sink, "pair unprepared"),
                Err(reason) => warn!(src = %pair.src, sink = %pair.sink, %reason, "unprepare failed"),
            },
            Continuation::KeyboardAdded { dhid } => match result {
                Ok(()) => info!(%dhid, "keyboard joined the session"),
                Err(reason) => warn!(%dhid, %reason, "keyboard could not join the session"),
            },
        }
    }

    /// Terminal step of every start. Clears the guard unconditionally.
    pub fn on_start_finished(
        &mut self,
        target: NetworkId,
        device: DeviceId,
        outcome: Result<(), FailureReason>,
    ) {
        self.guard.clear();
        let registry = Arc::clone(&self.collab.registry);

        if let Err(reason) = outcome {
            warn!(%target, %device, %reason, state = %self.state, "start failed");
            self.prepared.clear();
            let dhid = self
                .state
                .shared_device()
                .cloned()
                .or_else(|| registry.dhid_of(device))
                .unwrap_or_default();
            self.send_start_result(&target, false, &dhid);
            self.publish_failed(CooperationMessage::InfoFail, &target, reason);
            return;
        }

        match self.state.clone() {
            CooperationState::Free => {
                let dhid = registry.dhid_of(device).unwrap_or_default();
                self.set_state(CooperationState::Out(dhid.clone()));
                self.hide_cursor();
                self.send_start_result(&target, true, &dhid);
                self.begin_session(target.clone());
            }
            CooperationState::In(shared) => {
                let origin = registry
                    .origin_network_of_dhid(&shared)
                    .or_else(|| self.session_peer.clone());
                self.set_state(CooperationState::Free);
                self.reset_cursor();
                self.send_start_result(&target, true, &shared);
                if let Some(origin) = origin.filter(|o| *o != self.local() && *o != target) {
                    self.notify_peer(PeerNotify::RelayAnnounce {
                        sink: origin,
                        source: target.clone(),
                    });
                }
                self.end_session();
            }
            CooperationState::Out(shared) => {
                warn!(%target, %shared, "start finished while Out, state kept");
            }
        }
        self.publish(CooperationMessage::InfoSuccess, &target);
    }

    /// Terminal step of every local stop. Clears the guard unconditionally.
    pub fn on_stop_finished(&mut self, peer: NetworkId, outcome: Result<(), FailureReason>) {
        self.guard.clear();
        if let Err(reason) = outcome {
            warn!(%peer, %reason, state = %self.state, "stop failed");
            self.publish_failed(CooperationMessage::CloseFail, &peer, reason);
            return;
        }

        self.set_state(CooperationState::Free);
        self.reset_cursor();
        self.notify_peer(PeerNotify::StopResult {
            target: peer.clone(),
            success: true,
        });
        self.unprepare(&peer);
        self.end_session();
        self.publish(CooperationMessage::CloseSuccess, &peer);
    }

    fn send_start_result(&self, target: &NetworkId, success: bool, dhid: &Dhid) {
        self.notify_peer(PeerNotify::StartResult {
            target: target.clone(),
            success,
            dhid: dhid.clone(),
            location: self.start_location,
        });
    }
}
