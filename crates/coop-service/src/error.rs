//! Cooperation errors.

use coop_types::{CooperationState, FailureReason};
use thiserror::Error;

/// Errors returned to IPC callers of the cooperation API.
///
/// Start and stop return `Ok` once a request is accepted; remote failures
/// arrive later as notices carrying a [`FailureReason`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoopError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("a cooperation transition is already in flight")]
    Busy,

    #[error("cooperation is disabled on this device")]
    NotEnabled,

    #[error("operation not valid in state {0}")]
    WrongState(CooperationState),

    #[error("remote call timed out")]
    RemoteTimeout,

    #[error("remote call rejected")]
    RemoteRejected,

    #[error("device has nothing to share")]
    NoShareableDevice,

    #[error("no sharing session prepared")]
    NotPrepared,

    #[error("preparing the sharing session failed")]
    PrepareFailed,

    #[error("relay partially applied: new link started, original link still up")]
    PartialRelayFailure,

    #[error("superseded by a newer request")]
    Superseded,

    #[error("cooperation service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl CoopError {
    /// Stable status code reported over IPC.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => 401,
            Self::NotEnabled => 402,
            Self::WrongState(_) => 403,
            Self::Busy => 409,
            Self::Superseded => 410,
            Self::NoShareableDevice => 422,
            Self::NotPrepared => 424,
            Self::ServiceUnavailable(_) => 500,
            Self::PrepareFailed => 502,
            Self::RemoteRejected => 503,
            Self::RemoteTimeout => 504,
            Self::PartialRelayFailure => 507,
        }
    }

    /// Every variant with a representative value, for status tables.
    pub fn catalogue() -> Vec<Self> {
        vec![
            Self::InvalidArgument(String::new()),
            Self::NotEnabled,
            Self::WrongState(CooperationState::Free),
            Self::Busy,
            Self::Superseded,
            Self::NoShareableDevice,
            Self::NotPrepared,
            Self::ServiceUnavailable(String::new()),
            Self::PrepareFailed,
            Self::RemoteRejected,
            Self::RemoteTimeout,
            Self::PartialRelayFailure,
        ]
    }
}

impl From<FailureReason> for CoopError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::RemoteTimeout => Self::RemoteTimeout,
            FailureReason::RemoteRejected => Self::RemoteRejected,
            FailureReason::NoShareableDevice => Self::NoShareableDevice,
            FailureReason::PrepareFailed => Self::PrepareFailed,
            FailureReason::PartialRelayFailure => Self::PartialRelayFailure,
            FailureReason::Superseded => Self::Superseded,
        }
    }
}

/// Status code for an IPC result: `0` on success.
pub fn ipc_status(result: &Result<(), CoopError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.status_code(),
    }
}

/// Service setup and runtime errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("device error: {0}")]
    Device(#[from] coop_device::DeviceError),

    #[error("remote input error: {0}")]
    DInput(#[from] coop_dinput::DInputError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
