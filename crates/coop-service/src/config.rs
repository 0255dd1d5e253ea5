//! Service configuration loaded from TOML.

use std::time::Duration;

use coop_dinput::GatewayConfig;
use coop_types::MouseLocationPercent;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub remote_input: RemoteInputConfig,
    #[serde(default)]
    pub cursor: CursorConfig,
}

/// Service runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Capacity of the request/event queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            log_level: default_log_level(),
        }
    }
}

/// Timeout policy for calls into the remote input service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteInputConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra waits after the first timeout before a call is declared failed.
    #[serde(default = "default_retries")]
    pub retries: u8,
    /// Budget for one peer notification before it is abandoned.
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
}

impl Default for RemoteInputConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            notify_timeout_ms: default_notify_timeout_ms(),
        }
    }
}

impl RemoteInputConfig {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
        }
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

/// Where the cursor goes when a session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    #[serde(default = "default_percent")]
    pub default_x_percent: f64,
    #[serde(default = "default_percent")]
    pub default_y_percent: f64,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            default_x_percent: default_percent(),
            default_y_percent: default_percent(),
        }
    }
}

impl CursorConfig {
    pub fn default_location(&self) -> MouseLocationPercent {
        MouseLocationPercent::new(self.default_x_percent, self.default_y_percent)
    }
}

fn default_queue_depth() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_retries() -> u8 {
    2
}

fn default_notify_timeout_ms() -> u64 {
    2000
}

fn default_percent() -> f64 {
    50.0
}
