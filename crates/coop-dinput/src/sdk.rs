//! The D-input SDK boundary.

use coop_types::{Dhid, NetworkId};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::DInputError;
use crate::event::{GatewayEvent, RelayEvent, Reply, ReplyPart};
use crate::tracker::{OperationKind, RequestId};

/// Adapter over the platform's remote input SDK.
///
/// Every call returns as soon as the request is handed off. The result, if
/// any, arrives later through the supplied [`ReplySink`], on whatever thread
/// the SDK chooses. An `Err` return means the request was never issued.
pub trait DInputSdk: Send + Sync + 'static {
    /// Pair the sharing sessions of `src` and `sink`.
    fn prepare_remote_input(
        &self,
        src: &NetworkId,
        sink: &NetworkId,
        reply: ReplySink,
    ) -> Result<(), DInputError>;

    fn unprepare_remote_input(
        &self,
        src: &NetworkId,
        sink: &NetworkId,
        reply: ReplySink,
    ) -> Result<(), DInputError>;

    /// Start relaying `dhids` from `src` to `sink`.
    fn start_remote_input(
        &self,
        src: &NetworkId,
        sink: &NetworkId,
        dhids: &[Dhid],
        reply: ReplySink,
    ) -> Result<(), DInputError>;

    fn stop_remote_input(
        &self,
        src: &NetworkId,
        sink: &NetworkId,
        dhids: &[Dhid],
        reply: ReplySink,
    ) -> Result<(), DInputError>;

    /// Subscribe to mouse/keyboard state changes of relayed devices.
    fn register_relay_listener(&self, sink: RelaySink) -> Result<(), DInputError>;

    fn unregister_relay_listener(&self) -> Result<(), DInputError>;
}

/// Handed to the SDK with each request; answers are posted, never applied.
///
/// Cloneable so an SDK can answer both callback shapes from different
/// threads.
#[derive(Debug, Clone)]
pub struct ReplySink {
    kind: OperationKind,
    request_id: RequestId,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ReplySink {
    pub(crate) fn new(
        kind: OperationKind,
        request_id: RequestId,
        tx: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Self {
        Self {
            kind,
            request_id,
            tx,
        }
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Answer keyed by network pair.
    pub fn network_pair(&self, src: &NetworkId, sink: &NetworkId, status: i32) {
        self.post(
            ReplyPart::NetworkPair {
                src: src.clone(),
                sink: sink.clone(),
            },
            status,
        );
    }

    /// Answer keyed by hardware ids.
    pub fn dhids(&self, dhids: &[Dhid], status: i32) {
        self.post(ReplyPart::Dhids(dhids.to_vec()), status);
    }

    fn post(&self, part: ReplyPart, status: i32) {
        let reply = Reply {
            kind: self.kind,
            request_id: self.request_id,
            part,
            status,
        };
        if self.tx.send(GatewayEvent::Reply(reply)).is_err() {
            debug!(kind = ?self.kind, request = %self.request_id, "gateway gone, reply dropped");
        }
    }
}

/// Handed to the SDK when subscribing to relay events.
#[derive(Debug, Clone)]
pub struct RelaySink {
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl RelaySink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        Self { tx }
    }

    pub fn post(&self, event: RelayEvent) {
        if self.tx.send(GatewayEvent::Relay(event)).is_err() {
            debug!("gateway gone, relay event dropped");
        }
    }
}
