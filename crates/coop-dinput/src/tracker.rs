//! Exactly-once tracking of pending remote operations.

use std::collections::HashMap;
use std::time::Duration;

use coop_types::{Dhid, FailureReason, NetworkId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::event::{GatewayEvent, PartShape, Reply, ReplyPart};

/// What a remote operation does. At most one operation of each kind is
/// pending at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Prepare,
    Unprepare,
    Start,
    Stop,
}

impl OperationKind {
    /// Callback shapes that must all report success before the operation
    /// completes. Start/stop are answered both by network pair and by dhid
    /// list.
    pub(crate) fn required_parts(self) -> &'static [PartShape] {
        match self {
            Self::Prepare | Self::Unprepare => &[PartShape::NetworkPair],
            Self::Start | Self::Stop => &[PartShape::NetworkPair, PartShape::Dhids],
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Prepare => "prepare",
            Self::Unprepare => "unprepare",
            Self::Start => "start",
            Self::Stop => "stop",
        };
        f.write_str(s)
    }
}

/// Unique, monotonically increasing id of an issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Arguments of an issued request, kept to validate the echo in replies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpPayload {
    pub src: NetworkId,
    pub sink: NetworkId,
    pub dhids: Vec<Dhid>,
}

impl OpPayload {
    #[must_use]
    pub fn pair(src: NetworkId, sink: NetworkId) -> Self {
        Self {
            src,
            sink,
            dhids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_dhids(src: NetworkId, sink: NetworkId, dhids: Vec<Dhid>) -> Self {
        Self { src, sink, dhids }
    }

    fn accepts(&self, part: &ReplyPart) -> bool {
        match part {
            ReplyPart::NetworkPair { src, sink } => src == &self.src && sink == &self.sink,
            ReplyPart::Dhids(dhids) => {
                let mut got = dhids.clone();
                let mut want = self.dhids.clone();
                got.sort();
                want.sort();
                got == want
            }
        }
    }
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    Succeeded,
    /// The remote side answered with a failure status, or refused the call.
    Rejected,
    /// No answer within the timeout and retry budget.
    TimedOut,
    /// Replaced by a newer request of the same kind.
    Superseded,
}

impl OpOutcome {
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }

    #[must_use]
    pub fn failure_reason(self) -> Option<FailureReason> {
        match self {
            Self::Succeeded => None,
            Self::Rejected => Some(FailureReason::RemoteRejected),
            Self::TimedOut => Some(FailureReason::RemoteTimeout),
            Self::Superseded => Some(FailureReason::Superseded),
        }
    }
}

/// A finished request, handing its completion back to the owner.
#[derive(Debug)]
pub struct Resolved<C> {
    pub kind: OperationKind,
    pub request_id: RequestId,
    pub outcome: OpOutcome,
    pub completion: C,
}

struct PendingOperation<C> {
    request_id: RequestId,
    payload: OpPayload,
    retries_remaining: u8,
    timer: JoinHandle<()>,
    outstanding: Vec<PartShape>,
    completion: C,
}

/// Pending remote operations keyed by kind.
///
/// The tracker never invokes anything itself. Each `on_*` method returns the
/// [`Resolved`] operation at most once, and the caller decides what the
/// completion `C` means.
pub struct AsyncOpTracker<C> {
    pending: HashMap<OperationKind, PendingOperation<C>>,
    superseded: HashMap<RequestId, Resolved<C>>,
    next_id: u64,
    timeout: Duration,
    retries: u8,
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl<C> AsyncOpTracker<C> {
    /// Timers post [`GatewayEvent::TimerFired`] onto `events`.
    pub fn new(timeout: Duration, retries: u8, events: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        Self {
            pending: HashMap::new(),
            superseded: HashMap::new(),
            next_id: 0,
            timeout,
            retries,
            events,
        }
    }

    /// Register a new request and arm its timer.
    ///
    /// A request of the same kind that is still pending is superseded: it
    /// resolves later through [`GatewayEvent::Superseded`].
    pub fn register(&mut self, kind: OperationKind, payload: OpPayload, completion: C) -> RequestId {
        self.next_id += 1;
        let request_id = RequestId(self.next_id);
        let timer = arm_timer(&self.events, self.timeout, kind, request_id);

        let entry = PendingOperation {
            request_id,
            payload,
            retries_remaining: self.retries,
            timer,
            outstanding: kind.required_parts().to_vec(),
            completion,
        };

        if let Some(old) = self.pending.insert(kind, entry) {
            old.timer.abort();
            debug!(%kind, old = %old.request_id, new = %request_id, "pending request superseded");
            self.superseded.insert(
                old.request_id,
                Resolved {
                    kind,
                    request_id: old.request_id,
                    outcome: OpOutcome::Superseded,
                    completion: old.completion,
                },
            );
            if self
                .events
                .send(GatewayEvent::Superseded {
                    request_id: old.request_id,
                })
                .is_err()
            {
                debug!("gateway channel closed");
            }
        }

        debug!(%kind, request = %request_id, "request registered");
        request_id
    }

    /// Apply a native reply.
    pub fn on_reply(&mut self, reply: Reply) -> Option<Resolved<C>> {
        let Some(entry) = self.pending.get_mut(&reply.kind) else {
            debug!(kind = %reply.kind, request = %reply.request_id, "reply for no pending request dropped");
            return None;
        };
        if entry.request_id != reply.request_id {
            debug!(
                kind = %reply.kind,
                stale = %reply.request_id,
                current = %entry.request_id,
                "stale reply dropped"
            );
            return None;
        }
        if !entry.payload.accepts(&reply.part) {
            warn!(kind = %reply.kind, request = %reply.request_id, part = ?reply.part, "malformed reply dropped");
            return None;
        }
        if !reply.is_success() {
            debug!(kind = %reply.kind, request = %reply.request_id, status = reply.status, "remote rejected request");
            return self.resolve(reply.kind, OpOutcome::Rejected);
        }

        let shape = reply.part.shape();
        let Some(pos) = entry.outstanding.iter().position(|s| *s == shape) else {
            debug!(kind = %reply.kind, request = %reply.request_id, ?shape, "duplicate reply dropped");
            return None;
        };
        entry.outstanding.remove(pos);
        if entry.outstanding.is_empty() {
            self.resolve(reply.kind, OpOutcome::Succeeded)
        } else {
            None
        }
    }

    /// Apply a timer expiry: re-arm while retries remain, then give up.
    pub fn on_timer(&mut self, kind: OperationKind, request_id: RequestId) -> Option<Resolved<C>> {
        let entry = self.pending.get_mut(&kind)?;
        if entry.request_id != request_id {
            return None;
        }
        if entry.retries_remaining > 0 {
            entry.retries_remaining -= 1;
            entry.timer = arm_timer(&self.events, self.timeout, kind, request_id);
            warn!(
                %kind,
                request = %request_id,
                retries_left = entry.retries_remaining,
                "remote call slow, waiting again"
            );
            return None;
        }
        warn!(%kind, request = %request_id, "remote call timed out");
        self.resolve(kind, OpOutcome::TimedOut)
    }

    /// The SDK refused the call before it was sent.
    pub fn on_issue_failed(
        &mut self,
        kind: OperationKind,
        request_id: RequestId,
    ) -> Option<Resolved<C>> {
        match self.pending.get(&kind) {
            Some(entry) if entry.request_id == request_id => {
                self.resolve(kind, OpOutcome::Rejected)
            }
            _ => None,
        }
    }

    pub fn take_superseded(&mut self, request_id: RequestId) -> Option<Resolved<C>> {
        self.superseded.remove(&request_id)
    }

    /// Drop every pending request without resolving it. Returns how many
    /// were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.pending.len() + self.superseded.len();
        for (_, entry) in self.pending.drain() {
            entry.timer.abort();
        }
        self.superseded.clear();
        dropped
    }

    #[must_use]
    pub fn is_pending(&self, kind: OperationKind) -> bool {
        self.pending.contains_key(&kind)
    }

    #[must_use]
    pub fn pending_request(&self, kind: OperationKind) -> Option<RequestId> {
        self.pending.get(&kind).map(|e| e.request_id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn resolve(&mut self, kind: OperationKind, outcome: OpOutcome) -> Option<Resolved<C>> {
        let entry = self.pending.remove(&kind)?;
        entry.timer.abort();
        Some(Resolved {
            kind,
            request_id: entry.request_id,
            outcome,
            completion: entry.completion,
        })
    }
}

impl<C> Drop for AsyncOpTracker<C> {
    fn drop(&mut self) {
        for entry in self.pending.values() {
            entry.timer.abort();
        }
    }
}

fn arm_timer(
    events: &mpsc::UnboundedSender<GatewayEvent>,
    timeout: Duration,
    kind: OperationKind,
    request_id: RequestId,
) -> JoinHandle<()> {
    let tx = events.clone();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let _ = tx.send(GatewayEvent::TimerFired { kind, request_id });
    })
}
