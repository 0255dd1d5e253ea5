//! Cooperation roles and the prepared session pair.

use serde::{Deserialize, Serialize};

use crate::id::{Dhid, NetworkId};

/// The role the local device currently holds in a cooperation session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CooperationState {
    /// No input is being shared.
    #[default]
    Free,
    /// Consuming the input of a remote device (the shared pointer's dhid).
    In(Dhid),
    /// Donating a local device's input to a remote device.
    Out(Dhid),
}

impl CooperationState {
    /// The shared device, if a session is active.
    #[must_use]
    pub fn shared_device(&self) -> Option<&Dhid> {
        match self {
            Self::Free => None,
            Self::In(dhid) | Self::Out(dhid) => Some(dhid),
        }
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }
}

impl std::fmt::Display for CooperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "Free"),
            Self::In(dhid) => write!(f, "In({dhid})"),
            Self::Out(dhid) => write!(f, "Out({dhid})"),
        }
    }
}

/// The two devices whose sharing sessions are paired with the remote
/// input subsystem. Both fields empty means "not prepared".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedPair {
    pub src: NetworkId,
    pub sink: NetworkId,
}

impl PreparedPair {
    #[must_use]
    pub fn new(src: NetworkId, sink: NetworkId) -> Self {
        Self { src, sink }
    }

    #[must_use]
    pub fn is_prepared(&self) -> bool {
        !self.src.is_empty() && !self.sink.is_empty()
    }

    #[must_use]
    pub fn matches(&self, src: &NetworkId, sink: &NetworkId) -> bool {
        self.is_prepared() && &self.src == src && &self.sink == sink
    }

    /// Whether `id` is either end of the pair.
    #[must_use]
    pub fn involves(&self, id: &NetworkId) -> bool {
        self.is_prepared() && (&self.src == id || &self.sink == id)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
