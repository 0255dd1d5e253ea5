//! D-input boundary errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DInputError {
    #[error("remote input service refused the call: {0}")]
    Refused(String),

    #[error("relay listener already registered")]
    RelayAlreadyRegistered,

    #[error("remote input service not available")]
    Unavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
