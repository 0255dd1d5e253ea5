//! In: we consume a remote pointer. A start hands it back or relays it.

use coop_types::{DeviceId, Dhid, NetworkId};
use tracing::info;

use super::free::validate_target;
use super::{Continuation, CooperationStateMachine, StartPlan, StartRoute, StopRoute};
use crate::error::CoopError;

impl CooperationStateMachine {
    /// Network physically hosting the consumed pointer.
    fn origin_of(&self, shared: &Dhid) -> Option<NetworkId> {
        self.collab
            .registry
            .origin_network_of_dhid(shared)
            .or_else(|| self.session_peer.clone())
    }

    pub(super) fn plan_in_start(
        &self,
        target: &NetworkId,
        device: DeviceId,
        shared: &Dhid,
    ) -> Result<StartRoute, CoopError> {
        validate_target(target, &self.local())?;
        let origin = self.origin_of(shared).ok_or(CoopError::NotPrepared)?;
        if *target == origin {
            let mut plan = StartPlan::new(target.clone(), device, origin, false);
            plan.dhids = self.dhids_of_shared(shared);
            Ok(StartRoute::ComeBack(plan))
        } else {
            Ok(StartRoute::Relay(StartPlan::new(
                target.clone(),
                device,
                origin,
                true,
            )))
        }
    }

    /// Stop the origin's link to us; the pointer is local again.
    pub(super) fn run_come_back(&mut self, plan: StartPlan) {
        info!(origin = %plan.src, "handing pointer back to its origin");
        let local = self.local();
        self.gateway.stop_remote_input(
            &plan.src,
            &local,
            plan.dhids,
            Continuation::CameBack {
                target: plan.target,
                device: plan.device,
            },
        );
    }

    /// Second leg of a relay: the new link is up, drop the one to us.
    pub(super) fn stop_origin_link(&mut self, plan: StartPlan) {
        info!(origin = %plan.src, target = %plan.target, "relay started, stopping original link");
        let local = self.local();
        let src = plan.src.clone();
        let dhids = plan.dhids.clone();
        self.gateway
            .stop_remote_input(&src, &local, dhids, Continuation::OriginStopped(plan));
    }

    pub(super) fn plan_in_stop(&self, shared: &Dhid) -> Result<StopRoute, CoopError> {
        let origin = self.origin_of(shared).ok_or(CoopError::NotPrepared)?;
        Ok(StopRoute {
            peer: origin.clone(),
            src: origin,
            sink: self.local(),
            dhids: self.dhids_of_shared(shared),
        })
    }
}
