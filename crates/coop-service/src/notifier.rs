//! Publish/subscribe hub for cooperation lifecycle notices.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use coop_types::CooperationNotice;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Receives cooperation notices.
///
/// Called synchronously on the service task; implementations must not block.
pub trait CooperationObserver: Send + Sync + 'static {
    fn on_notice(&self, notice: &CooperationNotice);
}

impl<F> CooperationObserver for F
where
    F: Fn(&CooperationNotice) + Send + Sync + 'static,
{
    fn on_notice(&self, notice: &CooperationNotice) {
        self(notice);
    }
}

/// Handle returned by [`CooperationSessionNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivers every published notice to all observers, in subscription order.
///
/// A panicking observer is logged and skipped; the rest still get the notice.
#[derive(Default)]
pub struct CooperationSessionNotifier {
    observers: Vec<(SubscriptionId, Arc<dyn CooperationObserver>)>,
    next_id: u64,
}

impl CooperationSessionNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn CooperationObserver>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.observers.push((id, observer));
        debug!(subscription = %id, "observer subscribed");
        id
    }

    /// Returns whether `id` was subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    /// Deliver `notice`. Returns how many observers took it without panicking.
    pub fn publish(&self, notice: &CooperationNotice) -> usize {
        debug!(
            message = %notice.message,
            peer = %notice.network_id,
            reason = ?notice.reason,
            "publishing notice"
        );
        let mut delivered = 0;
        for (id, observer) in &self.observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_notice(notice))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    error!(subscription = %id, message = %notice.message, "observer panicked");
                }
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

/// Observer forwarding notices into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<CooperationNotice>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CooperationNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CooperationObserver for ChannelObserver {
    fn on_notice(&self, notice: &CooperationNotice) {
        // receiver dropped: the subscriber went away
        let _ = self.tx.send(notice.clone());
    }
}
