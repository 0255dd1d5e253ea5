//! Screen geometry and device-independent cursor locations.

use serde::{Deserialize, Serialize};

/// Screen geometry for a device's display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ScreenGeometry {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Cursor position as a percentage of the screen, so that the receiving
/// device can re-anchor the cursor regardless of its own resolution.
///
/// Both coordinates are clamped to `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawLocation")]
pub struct MouseLocationPercent {
    x_pct: f64,
    y_pct: f64,
}

/// Wire shape; decoded values go through [`MouseLocationPercent::new`].
#[derive(Deserialize)]
struct RawLocation {
    x_pct: f64,
    y_pct: f64,
}

impl From<RawLocation> for MouseLocationPercent {
    fn from(raw: RawLocation) -> Self {
        Self::new(raw.x_pct, raw.y_pct)
    }
}

impl MouseLocationPercent {
    /// Screen centre.
    pub const CENTER: Self = Self {
        x_pct: 50.0,
        y_pct: 50.0,
    };

    #[must_use]
    pub fn new(x_pct: f64, y_pct: f64) -> Self {
        Self {
            x_pct: clamp_percent(x_pct),
            y_pct: clamp_percent(y_pct),
        }
    }

    #[must_use]
    pub fn x_pct(&self) -> f64 {
        self.x_pct
    }

    #[must_use]
    pub fn y_pct(&self) -> f64 {
        self.y_pct
    }

    /// Convert a pixel position on `screen` to a percentage.
    #[must_use]
    pub fn from_position(px: i32, py: i32, screen: &ScreenGeometry) -> Self {
        if screen.width == 0 || screen.height == 0 {
            return Self::CENTER;
        }
        Self::new(
            f64::from(px) * 100.0 / f64::from(screen.width),
            f64::from(py) * 100.0 / f64::from(screen.height),
        )
    }

    /// Convert back to a pixel position on `screen`, clamped to its bounds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_position(&self, screen: &ScreenGeometry) -> (i32, i32) {
        let axis = |pct: f64, len: u32| -> i32 {
            let max = f64::from(len.saturating_sub(1));
            (pct * f64::from(len) / 100.0).round().clamp(0.0, max) as i32
        };
        (axis(self.x_pct, screen.width), axis(self.y_pct, screen.height))
    }
}

impl Default for MouseLocationPercent {
    fn default() -> Self {
        Self::CENTER
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        50.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
