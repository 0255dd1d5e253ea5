//! Boundaries to the collaborators of the cooperation core.
//!
//! This crate defines the narrow traits the state machine consumes:
//! [`DeviceRegistry`] for device topology, [`RemoteMgr`] for peer-to-peer
//! session signalling, [`CursorService`] for the local pointer, and
//! [`CrossingSwitch`] for the per-device "cooperation enabled" profile bit.
//! Platform backends live outside this workspace; the `mock` feature provides
//! recording doubles for tests and demos.

use async_trait::async_trait;
use coop_types::{DeviceId, Dhid, MouseLocationPercent, NetworkId};

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::DeviceError;

/// Read-only view of the local and remote input devices.
///
/// All queries are cheap and non-blocking.
pub trait DeviceRegistry: Send + Sync + 'static {
    /// Network id of this device.
    fn local_network_id(&self) -> NetworkId;

    /// The network that physically hosts `device`.
    fn origin_network_of(&self, device: DeviceId) -> Option<NetworkId>;

    /// The network that physically hosts the device with hardware id `dhid`.
    fn origin_network_of_dhid(&self, dhid: &Dhid) -> Option<NetworkId>;

    /// Hardware ids of `device` plus the keyboards that travel with it.
    fn pointer_and_keyboard_dhids_of(&self, device: DeviceId) -> Vec<Dhid>;

    fn dhid_of(&self, device: DeviceId) -> Option<Dhid>;

    /// Local id for a hardware id (physical or virtual device).
    fn device_of_dhid(&self, dhid: &Dhid) -> Option<DeviceId>;

    /// Whether a physical pointer is attached locally.
    fn has_local_pointer(&self) -> bool;

    /// Whether `device` is a virtual device fed by a remote share.
    fn is_remote(&self, device: DeviceId) -> bool;
}

/// Session signalling with peer cooperation services.
///
/// Every call is a fire-and-forget notify; delivery is not acknowledged.
#[async_trait]
pub trait RemoteMgr: Send + Sync + 'static {
    /// Tell `remote` that `local` is about to share its input with it.
    async fn announce_start(&self, local: &NetworkId, remote: &NetworkId)
        -> Result<(), DeviceError>;

    /// Report the outcome of a start to `target`, with the shared pointer and
    /// where the cursor left this screen.
    async fn start_result(
        &self,
        target: &NetworkId,
        success: bool,
        dhid: &Dhid,
        location: MouseLocationPercent,
    ) -> Result<(), DeviceError>;

    async fn stop_result(&self, target: &NetworkId, success: bool) -> Result<(), DeviceError>;

    /// Tell `sink` (the owner of a relayed pointer) that its input now goes
    /// to `source`.
    async fn relay_announce(&self, sink: &NetworkId, source: &NetworkId)
        -> Result<(), DeviceError>;
}

/// The local pointer.
pub trait CursorService: Send + Sync + 'static {
    fn set_visible(&self, pid: u32, visible: bool) -> Result<(), DeviceError>;

    fn set_absolute_location(&self, location: MouseLocationPercent) -> Result<(), DeviceError>;

    /// Current cursor location as a percentage of the screen.
    fn location_percent(&self) -> MouseLocationPercent;
}

/// Callback fired with `(device, enabled)` when a watched switch flips.
///
/// Invoked on arbitrary threads; implementations must only post work.
pub type CrossingListener = Box<dyn Fn(NetworkId, bool) + Send + Sync>;

/// Per-device "cooperation enabled" profile switch.
pub trait CrossingSwitch: Send + Sync + 'static {
    fn get_state(&self, device: &NetworkId) -> bool;

    fn update_state(&self, enabled: bool, devices: &[NetworkId]) -> Result<(), DeviceError>;

    fn register_listener(
        &self,
        device: &NetworkId,
        listener: CrossingListener,
    ) -> Result<(), DeviceError>;

    fn unregister_listener(&self, device: &NetworkId) -> Result<(), DeviceError>;
}
