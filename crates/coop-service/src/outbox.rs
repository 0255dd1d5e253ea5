//! Peer notifications sent off the service task.
//!
//! Every [`RemoteMgr`] call is a notify nobody waits on. The machine queues
//! them on a [`PeerOutbox`]; an [`OutboxWorker`] task delivers them in order,
//! each bounded by the notify timeout, so a slow peer never stalls the loop.

use std::sync::Arc;
use std::time::Duration;

use coop_device::{DeviceError, RemoteMgr};
use coop_types::{Dhid, MouseLocationPercent, NetworkId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One queued call into [`RemoteMgr`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerNotify {
    AnnounceStart {
        local: NetworkId,
        remote: NetworkId,
    },
    StartResult {
        target: NetworkId,
        success: bool,
        dhid: Dhid,
        location: MouseLocationPercent,
    },
    StopResult {
        target: NetworkId,
        success: bool,
    },
    RelayAnnounce {
        sink: NetworkId,
        source: NetworkId,
    },
}

impl PeerNotify {
    fn peer(&self) -> &NetworkId {
        match self {
            Self::AnnounceStart { remote, .. } => remote,
            Self::StartResult { target, .. } | Self::StopResult { target, .. } => target,
            Self::RelayAnnounce { sink, .. } => sink,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::AnnounceStart { .. } => "announce_start",
            Self::StartResult { .. } => "start_result",
            Self::StopResult { .. } => "stop_result",
            Self::RelayAnnounce { .. } => "relay_announce",
        }
    }
}

/// Sending half, owned by the state machine. Never blocks.
#[derive(Clone)]
pub struct PeerOutbox {
    tx: mpsc::UnboundedSender<PeerNotify>,
}

impl PeerOutbox {
    pub fn new(remote: Arc<dyn RemoteMgr>, timeout: Duration) -> (Self, OutboxWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { tx },
            OutboxWorker {
                remote,
                rx,
                timeout,
            },
        )
    }

    pub fn send(&self, notify: PeerNotify) {
        if let Err(e) = self.tx.send(notify) {
            debug!(call = e.0.name(), peer = %e.0.peer(), "outbox closed, notification dropped");
        }
    }
}

/// Delivers queued notifications one at a time.
pub struct OutboxWorker {
    remote: Arc<dyn RemoteMgr>,
    rx: mpsc::UnboundedReceiver<PeerNotify>,
    timeout: Duration,
}

impl OutboxWorker {
    /// Deliver until every [`PeerOutbox`] is dropped.
    pub async fn run(mut self) {
        while let Some(notify) = self.rx.recv().await {
            self.deliver(&notify).await;
        }
        debug!("peer outbox drained");
    }

    /// Deliver whatever is queued right now.
    pub async fn flush(&mut self) {
        while let Ok(notify) = self.rx.try_recv() {
            self.deliver(&notify).await;
        }
    }

    async fn deliver(&self, notify: &PeerNotify) {
        let remote = &self.remote;
        let call = async {
            match notify {
                PeerNotify::AnnounceStart { local, remote: to } => {
                    remote.announce_start(local, to).await
                }
                PeerNotify::StartResult {
                    target,
                    success,
                    dhid,
                    location,
                } => remote.start_result(target, *success, dhid, *location).await,
                PeerNotify::StopResult { target, success } => {
                    remote.stop_result(target, *success).await
                }
                PeerNotify::RelayAnnounce { sink, source } => {
                    remote.relay_announce(sink, source).await
                }
            }
        };
        let outcome: Result<Result<(), DeviceError>, _> =
            tokio::time::timeout(self.timeout, call).await;
        match outcome {
            Ok(Ok(())) => debug!(call = notify.name(), peer = %notify.peer(), "peer notified"),
            Ok(Err(e)) => {
                warn!(call = notify.name(), peer = %notify.peer(), error = %e, "peer notification failed");
            }
            Err(_) => warn!(
                call = notify.name(),
                peer = %notify.peer(),
                timeout_ms = self.timeout.as_millis(),
                "peer notification timed out"
            ),
        }
    }
}
