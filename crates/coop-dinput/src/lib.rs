//! Remote input gateway for input cooperation.
//!
//! The D-input service pairs devices' sharing sessions and relays a physical
//! device's events to another machine. Its SDK is callback based and
//! unreliable: a request gets at most one eventual answer, sometimes split
//! over two callback shapes, sometimes none at all. This crate wraps it so
//! that every logical request resolves exactly once.
//!
//! - [`DInputSdk`] is the boundary trait the platform SDK is adapted to.
//! - [`AsyncOpTracker`] owns pending requests, their timers and retries.
//! - [`RemoteInputGateway`] is the façade the state machine calls.
//!
//! Callbacks never touch tracker state. They post a [`GatewayEvent`] onto an
//! unbounded channel, and the channel's owner feeds it back through
//! [`RemoteInputGateway::handle_event`] on its own task.

pub mod error;
pub mod event;
pub mod gateway;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod sdk;
pub mod tracker;

pub use error::DInputError;
pub use event::{GatewayEvent, RelayEvent, RelaySource, Reply, ReplyPart, STATUS_OK};
pub use gateway::{GatewayConfig, GatewayOutput, RemoteInputGateway};
pub use sdk::{DInputSdk, RelaySink, ReplySink};
pub use tracker::{AsyncOpTracker, OpOutcome, OpPayload, OperationKind, RequestId, Resolved};
