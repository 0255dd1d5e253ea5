//! Raw pointer/key events as seen by the cooperation filter.

use serde::{Deserialize, Serialize};

use crate::id::DeviceId;

/// A raw local input event, tagged with the device that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    /// Which device produced this event.
    pub device_id: DeviceId,
    /// Microsecond timestamp (monotonic).
    pub timestamp_us: u64,
    pub action: PointerAction,
}

impl PointerEvent {
    #[must_use]
    pub fn new(device_id: DeviceId, action: PointerAction) -> Self {
        Self {
            device_id,
            timestamp_us: 0,
            action,
        }
    }
}

/// What the event does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PointerAction {
    /// Relative pointer motion.
    Motion { dx: i32, dy: i32 },
    ButtonDown { button: u32 },
    ButtonUp { button: u32 },
    /// Scroll axis movement.
    Axis { vertical: f64, horizontal: f64 },
    KeyDown { code: u32 },
    KeyUp { code: u32 },
}

impl PointerAction {
    #[must_use]
    pub fn is_motion(&self) -> bool {
        matches!(self, Self::Motion { .. })
    }
}

/// Outcome of filtering an event against the current cooperation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventVerdict {
    /// Hand the event to normal local delivery.
    Forward,
    /// Drop it; the local pipeline treats it as never having happened.
    Suppress,
}
