//! Session notices and peer-to-peer cooperation signals.

use serde::{Deserialize, Serialize};

use crate::id::{Dhid, NetworkId};
use crate::screen::MouseLocationPercent;

/// Lifecycle message published to cooperation observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CooperationMessage {
    /// Sharing session with a peer was prepared.
    OpenSuccess,
    OpenFail,
    /// A start (local or remote-initiated) is in flight.
    InfoStart,
    InfoSuccess,
    InfoFail,
    /// Sharing session was torn down.
    Close,
    /// A locally requested stop completed.
    CloseSuccess,
    /// A stop failed; the state is unchanged.
    CloseFail,
    /// A stop (local or remote-initiated) is in flight.
    Stop,
    /// The peer stopped the session.
    StopSuccess,
    /// Cooperation switched on locally.
    StateOn,
    StateOff,
}

impl std::fmt::Display for CooperationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Why a transition did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    RemoteTimeout,
    RemoteRejected,
    NoShareableDevice,
    PrepareFailed,
    /// The new link was started but the original one could not be stopped.
    PartialRelayFailure,
    /// A newer request of the same kind replaced this one.
    Superseded,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RemoteTimeout => "remote call timed out",
            Self::RemoteRejected => "remote call rejected",
            Self::NoShareableDevice => "no shareable device",
            Self::PrepareFailed => "prepare failed",
            Self::PartialRelayFailure => "relay partially applied",
            Self::Superseded => "superseded by a newer request",
        };
        f.write_str(s)
    }
}

/// A notice delivered to every subscribed observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooperationNotice {
    pub message: CooperationMessage,
    /// The peer this notice is about (empty for local-only notices).
    pub network_id: NetworkId,
    pub reason: Option<FailureReason>,
}

impl CooperationNotice {
    #[must_use]
    pub fn new(message: CooperationMessage, network_id: NetworkId) -> Self {
        Self {
            message,
            network_id,
            reason: None,
        }
    }

    #[must_use]
    pub fn failed(message: CooperationMessage, network_id: NetworkId, reason: FailureReason) -> Self {
        Self {
            message,
            network_id,
            reason: Some(reason),
        }
    }
}

/// Signals received from a peer's cooperation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerSignal {
    /// The peer is about to start sharing its input with us.
    StartRequest { from: NetworkId },

    /// Outcome of the peer's start.
    StartResult {
        from: NetworkId,
        success: bool,
        /// The pointer the peer now shares.
        dhid: Dhid,
        /// Where to place our cursor.
        location: MouseLocationPercent,
    },

    /// The peer is about to stop the session.
    StopRequest { from: NetworkId },

    StopResult { from: NetworkId, success: bool },

    /// The device consuming our input relayed it to `new_sink`.
    RelayAnnounce { new_sink: NetworkId },
}
