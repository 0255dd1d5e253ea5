//! Collaborator errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("cursor service error: {0}")]
    Cursor(String),

    #[error("crossing switch error: {0}")]
    CrossingSwitch(String),

    #[error("backend not available on this platform")]
    Unavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
