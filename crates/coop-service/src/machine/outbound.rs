//! Out: a local device is donated to a peer.

use coop_types::Dhid;
use tracing::{debug, info, warn};

use super::{Continuation, CooperationStateMachine, StopRoute};
use crate::error::CoopError;

impl CooperationStateMachine {
    pub(super) fn plan_out_stop(&self, shared: &Dhid) -> Result<StopRoute, CoopError> {
        if !self.prepared.is_prepared() {
            return Err(CoopError::NotPrepared);
        }
        let peer = self
            .session_peer
            .clone()
            .unwrap_or_else(|| self.prepared.sink.clone());
        Ok(StopRoute {
            peer,
            src: self.prepared.src.clone(),
            sink: self.prepared.sink.clone(),
            dhids: self.dhids_of_shared(shared),
        })
    }

    /// A local keyboard joins the running session; the state is unchanged.
    pub(super) fn out_keyboard_online(&mut self, dhid: Dhid) {
        if !self.prepared.is_prepared() {
            warn!(%dhid, "keyboard online while Out without a prepared pair");
            return;
        }
        let local = self.local();
        if let Some(origin) = self.collab.registry.origin_network_of_dhid(&dhid) {
            if origin != local {
                debug!(%dhid, %origin, "remote keyboard not shared");
                return;
            }
        }
        info!(%dhid, sink = %self.prepared.sink, "sharing new keyboard");
        let pair = self.prepared.clone();
        self.gateway.start_remote_input(
            &pair.src,
            &pair.sink,
            vec![dhid.clone()],
            Continuation::KeyboardAdded { dhid },
        );
    }
}
