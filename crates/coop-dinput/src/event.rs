//! Messages posted from SDK callbacks and timers to the gateway owner.

use coop_types::{Dhid, NetworkId};

use crate::tracker::{OperationKind, RequestId};

/// Status value the SDK reports for success. Anything else is a failure.
pub const STATUS_OK: i32 = 0;

/// Everything that can re-enter the gateway from another thread.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A native result callback.
    Reply(Reply),
    /// The SDK refused the call synchronously.
    IssueFailed {
        kind: OperationKind,
        request_id: RequestId,
    },
    /// A timeout timer fired.
    TimerFired {
        kind: OperationKind,
        request_id: RequestId,
    },
    /// A pending request was replaced by a newer one of the same kind.
    Superseded { request_id: RequestId },
    /// Mouse/keyboard state relayed by the remote input service.
    Relay(RelayEvent),
}

/// One native result callback, tagged with the request it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub kind: OperationKind,
    pub request_id: RequestId,
    pub part: ReplyPart,
    pub status: i32,
}

impl Reply {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// The two callback shapes the SDK answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPart {
    /// Answer keyed by the `(src, sink)` network pair.
    NetworkPair { src: NetworkId, sink: NetworkId },
    /// Answer keyed by the hardware ids that were started or stopped.
    Dhids(Vec<Dhid>),
}

impl ReplyPart {
    pub(crate) fn shape(&self) -> PartShape {
        match self {
            Self::NetworkPair { .. } => PartShape::NetworkPair,
            Self::Dhids(_) => PartShape::Dhids,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PartShape {
    NetworkPair,
    Dhids,
}

/// Which kind of simulated device a relay event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaySource {
    Mouse,
    Keyboard,
}

/// A state change of a device whose input is being relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayEvent {
    pub source: RelaySource,
    /// Key or button code.
    pub code: u32,
    /// 1 pressed, 0 released, 2 repeat.
    pub value: i32,
}
