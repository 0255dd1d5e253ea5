//! Shared types for input cooperation.
//!
//! This crate contains the types shared across the workspace: network and
//! device identifiers, the cooperation state, cursor location percentages,
//! pointer events, session notices, and peer signals.

pub mod event;
pub mod id;
pub mod message;
pub mod screen;
pub mod state;

pub use event::{EventVerdict, PointerAction, PointerEvent};
pub use id::{DeviceId, Dhid, NetworkId};
pub use message::{CooperationMessage, CooperationNotice, FailureReason, PeerSignal};
pub use screen::{MouseLocationPercent, ScreenGeometry};
pub use state::{CooperationState, PreparedPair};
