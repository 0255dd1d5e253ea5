//! Cooperation core.
//!
//! Implements the state machine deciding which device owns the shared
//! pointer, the Free/In/Out start and stop protocols, the session notifier,
//! and the serialized service loop that IPC handlers talk to.

pub mod config;
pub mod error;
pub mod machine;
pub mod notifier;
pub mod outbox;
pub mod service;
pub mod setup;

pub use config::Config;
pub use error::{CoopError, ServiceError};
pub use machine::{Collaborators, CooperationSnapshot, CooperationStateMachine, TransitionGuard};
pub use notifier::{ChannelObserver, CooperationObserver, CooperationSessionNotifier, SubscriptionId};
pub use outbox::{OutboxWorker, PeerNotify, PeerOutbox};
pub use service::{CooperationHandle, CooperationService, Request, ServiceEvent};
