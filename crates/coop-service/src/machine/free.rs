//! Free: nothing is shared; a start donates a local device.

use coop_types::{DeviceId, NetworkId};

use super::{CooperationStateMachine, StartPlan, StartRoute};
use crate::error::CoopError;
use crate::outbox::PeerNotify;

/// A start target must name some other device.
pub(super) fn validate_target(target: &NetworkId, local: &NetworkId) -> Result<(), CoopError> {
    if target.is_empty() {
        return Err(CoopError::InvalidArgument("empty network id".into()));
    }
    if target == local {
        return Err(CoopError::InvalidArgument(format!(
            "cannot cooperate with self ({target})"
        )));
    }
    Ok(())
}

impl CooperationStateMachine {
    pub(super) fn plan_free_start(
        &self,
        target: &NetworkId,
        device: DeviceId,
    ) -> Result<StartRoute, CoopError> {
        validate_target(target, &self.local())?;
        let src = self
            .collab
            .registry
            .origin_network_of(device)
            .ok_or_else(|| CoopError::InvalidArgument(format!("unknown device {device}")))?;
        Ok(StartRoute::Share(StartPlan::new(
            target.clone(),
            device,
            src,
            false,
        )))
    }

    pub(super) fn run_free_start(&mut self, plan: StartPlan) {
        self.notify_peer(PeerNotify::AnnounceStart {
            local: self.local(),
            remote: plan.target.clone(),
        });
        self.prepare_and_start(plan);
    }
}
