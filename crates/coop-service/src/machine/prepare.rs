//! Prepare-then-start, shared by the Free start and the In relay.

use coop_types::{DeviceId, Dhid, FailureReason, NetworkId};
use tracing::{debug, warn};

use super::{Continuation, CooperationStateMachine};

/// Everything a start needs to carry across its remote calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StartPlan {
    pub target: NetworkId,
    pub device: DeviceId,
    /// Network physically hosting the shared device.
    pub src: NetworkId,
    /// Filled in once the shareable devices are known.
    pub dhids: Vec<Dhid>,
    /// The original link from `src` must be stopped after the start.
    pub relay: bool,
}

impl StartPlan {
    pub fn new(target: NetworkId, device: DeviceId, src: NetworkId, relay: bool) -> Self {
        Self {
            target,
            device,
            src,
            dhids: Vec::new(),
            relay,
        }
    }
}

impl CooperationStateMachine {
    /// Prepare `(src, target)` unless it already is, then start sharing.
    pub(super) fn prepare_and_start(&mut self, plan: StartPlan) {
        if self.prepared.matches(&plan.src, &plan.target) {
            debug!(src = %plan.src, sink = %plan.target, "pair already prepared");
            self.start_shared_input(plan);
            return;
        }
        let src = plan.src.clone();
        let sink = plan.target.clone();
        self.gateway
            .prepare_remote_input(&src, &sink, Continuation::Prepared(plan));
    }

    /// Start relaying the device and its keyboards over the prepared pair.
    pub(super) fn start_shared_input(&mut self, mut plan: StartPlan) {
        plan.dhids = self
            .collab
            .registry
            .pointer_and_keyboard_dhids_of(plan.device);
        if plan.dhids.is_empty() {
            warn!(device = %plan.device, "nothing to share");
            self.on_start_finished(plan.target, plan.device, Err(FailureReason::NoShareableDevice));
            return;
        }
        let src = plan.src.clone();
        let sink = plan.target.clone();
        let dhids = plan.dhids.clone();
        self.gateway
            .start_remote_input(&src, &sink, dhids, Continuation::Started(plan));
    }
}
