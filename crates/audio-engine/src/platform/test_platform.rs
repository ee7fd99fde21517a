//! In-memory platform for integration testing.
//!
//! Device lists are mutable through a shared handle and events are injected
//! on demand, mirroring how a hot-plug or default-device switch would arrive
//! from the OS.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::platform::{AudioPlatform, PlatformEvent, PlatformEventCallback};
use crate::types::{AudioDeviceInfo, DeviceId};

#[derive(Default)]
struct PlatformState {
    output_devices: Vec<AudioDeviceInfo>,
    input_devices: Vec<AudioDeviceInfo>,
    default_output: Option<DeviceId>,
    default_input: Option<DeviceId>,
    callback: Option<Arc<PlatformEventCallback>>,
}

/// Mock [`AudioPlatform`] with device selection support.
pub struct MockAudioPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl MockAudioPlatform {
    /// A platform with empty device lists.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PlatformState::default())),
        }
    }

    /// Handle for mutating device lists and firing events.
    pub fn handle(&self) -> MockPlatformHandle {
        MockPlatformHandle {
            state: self.state.clone(),
        }
    }
}

impl Default for MockAudioPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPlatform for MockAudioPlatform {
    fn supports_device_selection(&self) -> bool {
        true
    }

    fn output_devices(&self) -> Vec<AudioDeviceInfo> {
        self.state.lock().output_devices.clone()
    }

    fn input_devices(&self) -> Vec<AudioDeviceInfo> {
        self.state.lock().input_devices.clone()
    }

    fn default_output_device(&self) -> Option<DeviceId> {
        self.state.lock().default_output
    }

    fn default_input_device(&self) -> Option<DeviceId> {
        self.state.lock().default_input
    }

    fn set_event_callback(&mut self, callback: Option<PlatformEventCallback>) {
        self.state.lock().callback = callback.map(Arc::new);
    }
}

/// Mutation and event-injection handle for a [`MockAudioPlatform`].
#[derive(Clone)]
pub struct MockPlatformHandle {
    state: Arc<Mutex<PlatformState>>,
}

impl MockPlatformHandle {
    /// Replace the output device list.
    pub fn set_output_devices(&self, devices: Vec<AudioDeviceInfo>) {
        self.state.lock().output_devices = devices;
    }

    /// Replace the input device list.
    pub fn set_input_devices(&self, devices: Vec<AudioDeviceInfo>) {
        self.state.lock().input_devices = devices;
    }

    /// Set the system default output device id.
    pub fn set_default_output(&self, device: Option<DeviceId>) {
        self.state.lock().default_output = device;
    }

    /// Set the system default input device id.
    pub fn set_default_input(&self, device: Option<DeviceId>) {
        self.state.lock().default_input = device;
    }

    /// Deliver an event through the installed callback. Returns false when
    /// no callback is installed.
    pub fn fire(&self, event: PlatformEvent) -> bool {
        // Clone the callback out so it runs without the state lock held and
        // may re-enter the platform from the control task.
        let callback = self.state.lock().callback.clone();
        match callback {
            Some(callback) => {
                (*callback)(event);
                true
            }
            None => false,
        }
    }
}
