//! Mock collaborators for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use coop_types::{DeviceId, Dhid, MouseLocationPercent, NetworkId};

use crate::error::DeviceError;
use crate::{CrossingListener, CrossingSwitch, CursorService, DeviceRegistry, RemoteMgr};

// ---------------------------------------------------------------------------
// MockRegistry
// ---------------------------------------------------------------------------

/// One device known to [`MockRegistry`].
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub id: DeviceId,
    pub dhid: Dhid,
    /// Network physically hosting the device.
    pub origin: NetworkId,
    /// Keyboards that travel with this device when it is shared.
    pub keyboards: Vec<Dhid>,
    pub is_pointer: bool,
    /// Virtual device fed by a remote share.
    pub remote: bool,
}

impl MockDevice {
    /// A physical pointer hosted on `origin`.
    pub fn pointer(id: i32, dhid: &str, origin: &str) -> Self {
        Self {
            id: DeviceId(id),
            dhid: Dhid::from(dhid),
            origin: NetworkId::from(origin),
            keyboards: Vec::new(),
            is_pointer: true,
            remote: false,
        }
    }

    #[must_use]
    pub fn with_keyboard(mut self, dhid: &str) -> Self {
        self.keyboards.push(Dhid::from(dhid));
        self
    }

    /// Mark as a virtual device mirroring a remote pointer.
    #[must_use]
    pub fn remote(mut self) -> Self {
        self.remote = true;
        self
    }
}

/// In-memory device registry. Devices can be added and removed while a test
/// runs.
pub struct MockRegistry {
    local: NetworkId,
    devices: Mutex<Vec<MockDevice>>,
}

impl MockRegistry {
    pub fn new(local: &str) -> Self {
        Self {
            local: NetworkId::from(local),
            devices: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_device(self, device: MockDevice) -> Self {
        self.add_device(device);
        self
    }

    pub fn add_device(&self, device: MockDevice) {
        self.devices.lock().unwrap().push(device);
    }

    fn find<T>(&self, pred: impl Fn(&MockDevice) -> bool, map: impl Fn(&MockDevice) -> T) -> Option<T> {
        self.devices.lock().unwrap().iter().find(|d| pred(d)).map(map)
    }
}

impl DeviceRegistry for MockRegistry {
    fn local_network_id(&self) -> NetworkId {
        self.local.clone()
    }

    fn origin_network_of(&self, device: DeviceId) -> Option<NetworkId> {
        self.find(|d| d.id == device, |d| d.origin.clone())
    }

    fn origin_network_of_dhid(&self, dhid: &Dhid) -> Option<NetworkId> {
        self.find(
            |d| &d.dhid == dhid || d.keyboards.contains(dhid),
            |d| d.origin.clone(),
        )
    }

    fn pointer_and_keyboard_dhids_of(&self, device: DeviceId) -> Vec<Dhid> {
        self.find(
            |d| d.id == device,
            |d| {
                let mut dhids = vec![d.dhid.clone()];
                dhids.extend(d.keyboards.iter().cloned());
                dhids
            },
        )
        .unwrap_or_default()
    }

    fn dhid_of(&self, device: DeviceId) -> Option<Dhid> {
        self.find(|d| d.id == device, |d| d.dhid.clone())
    }

    fn device_of_dhid(&self, dhid: &Dhid) -> Option<DeviceId> {
        self.find(|d| &d.dhid == dhid, |d| d.id)
    }

    fn has_local_pointer(&self) -> bool {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.is_pointer && !d.remote && d.origin == self.local)
    }

    fn is_remote(&self, device: DeviceId) -> bool {
        self.find(|d| d.id == device, |d| d.remote).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// MockRemoteMgr
// ---------------------------------------------------------------------------

/// A signal sent through [`MockRemoteMgr`].
#[derive(Debug, Clone, PartialEq)]
pub enum SentSignal {
    AnnounceStart {
        local: NetworkId,
        remote: NetworkId,
    },
    StartResult {
        target: NetworkId,
        success: bool,
        dhid: Dhid,
        location: MouseLocationPercent,
    },
    StopResult {
        target: NetworkId,
        success: bool,
    },
    RelayAnnounce {
        sink: NetworkId,
        source: NetworkId,
    },
}

/// Records every signal instead of sending it.
#[derive(Default)]
pub struct MockRemoteMgr {
    sent: Mutex<Vec<SentSignal>>,
    unreachable: AtomicBool,
}

impl MockRemoteMgr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentSignal> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, signal: SentSignal) -> Result<(), DeviceError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DeviceError::PeerUnreachable(format!("{signal:?}")));
        }
        self.sent.lock().unwrap().push(signal);
        Ok(())
    }
}

#[async_trait]
impl RemoteMgr for MockRemoteMgr {
    async fn announce_start(
        &self,
        local: &NetworkId,
        remote: &NetworkId,
    ) -> Result<(), DeviceError> {
        self.record(SentSignal::AnnounceStart {
            local: local.clone(),
            remote: remote.clone(),
        })
    }

    async fn start_result(
        &self,
        target: &NetworkId,
        success: bool,
        dhid: &Dhid,
        location: MouseLocationPercent,
    ) -> Result<(), DeviceError> {
        self.record(SentSignal::StartResult {
            target: target.clone(),
            success,
            dhid: dhid.clone(),
            location,
        })
    }

    async fn stop_result(&self, target: &NetworkId, success: bool) -> Result<(), DeviceError> {
        self.record(SentSignal::StopResult {
            target: target.clone(),
            success,
        })
    }

    async fn relay_announce(
        &self,
        sink: &NetworkId,
        source: &NetworkId,
    ) -> Result<(), DeviceError> {
        self.record(SentSignal::RelayAnnounce {
            sink: sink.clone(),
            source: source.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockCursor
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CursorState {
    visible: bool,
    location: MouseLocationPercent,
}

/// Cursor double tracking visibility and location.
pub struct MockCursor {
    state: Mutex<CursorState>,
}

impl Default for MockCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCursor {
    /// A visible cursor at the screen centre.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CursorState {
                visible: true,
                location: MouseLocationPercent::CENTER,
            }),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().unwrap().visible
    }

    pub fn location(&self) -> MouseLocationPercent {
        self.state.lock().unwrap().location
    }

    /// Move the cursor as if the user had dragged it.
    pub fn move_to(&self, location: MouseLocationPercent) {
        self.state.lock().unwrap().location = location;
    }
}

impl CursorService for MockCursor {
    fn set_visible(&self, _pid: u32, visible: bool) -> Result<(), DeviceError> {
        self.state.lock().unwrap().visible = visible;
        Ok(())
    }

    fn set_absolute_location(&self, location: MouseLocationPercent) -> Result<(), DeviceError> {
        self.state.lock().unwrap().location = location;
        Ok(())
    }

    fn location_percent(&self) -> MouseLocationPercent {
        self.location()
    }
}

// ---------------------------------------------------------------------------
// MockCrossingSwitch
// ---------------------------------------------------------------------------

/// Crossing switch double. Devices default to enabled.
#[derive(Default)]
pub struct MockCrossingSwitch {
    states: Mutex<HashMap<NetworkId, bool>>,
    listeners: Mutex<HashMap<NetworkId, CrossingListener>>,
}

impl MockCrossingSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip a device's switch and fire its listener, as the profile service
    /// would when a peer toggles cooperation.
    pub fn flip(&self, device: &NetworkId, enabled: bool) {
        self.states.lock().unwrap().insert(device.clone(), enabled);
        if let Some(listener) = self.listeners.lock().unwrap().get(device) {
            listener(device.clone(), enabled);
        }
    }

    pub fn is_watched(&self, device: &NetworkId) -> bool {
        self.listeners.lock().unwrap().contains_key(device)
    }
}

impl CrossingSwitch for MockCrossingSwitch {
    fn get_state(&self, device: &NetworkId) -> bool {
        self.states
            .lock()
            .unwrap()
            .get(device)
            .copied()
            .unwrap_or(true)
    }

    fn update_state(&self, enabled: bool, devices: &[NetworkId]) -> Result<(), DeviceError> {
        let mut states = self.states.lock().unwrap();
        for device in devices {
            states.insert(device.clone(), enabled);
        }
        Ok(())
    }

    fn register_listener(
        &self,
        device: &NetworkId,
        listener: CrossingListener,
    ) -> Result<(), DeviceError> {
        self.listeners
            .lock()
            .unwrap()
            .insert(device.clone(), listener);
        Ok(())
    }

    fn unregister_listener(&self, device: &NetworkId) -> Result<(), DeviceError> {
        self.listeners.lock().unwrap().remove(device);
        Ok(())
    }
}
