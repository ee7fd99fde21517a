//! Platform capability surface.
//!
//! Desktop platforms enumerate concrete devices and report default-device
//! and device-list changes; mobile platforms instead deliver audio-session
//! interruptions. Both arrive through one event callback which may fire from
//! any OS thread — the engine marshals every event onto its control task.
//! Platforms without a capability supply the no-op implementation.

pub mod test_platform;

use crate::types::{AudioDeviceInfo, DeviceId};

/// An OS-level audio event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    /// The set of audio devices changed.
    DeviceListChanged,
    /// The system default output device moved.
    DefaultOutputChanged,
    /// The system default input device moved.
    DefaultInputChanged,
    /// An audio-session interruption began.
    InterruptionBegan,
    /// An audio-session interruption ended.
    InterruptionEnded {
        /// Whether the OS suggests resuming. Read and ignored.
        should_resume: bool,
    },
}

/// Event delivery callback. May be invoked from arbitrary threads.
pub type PlatformEventCallback = Box<dyn Fn(PlatformEvent) + Send + Sync>;

/// Host platform capabilities consumed by the engine.
pub trait AudioPlatform: Send {
    /// Whether this platform supports selecting specific hardware devices
    /// (desktop). When false the device-selection applier steps are skipped.
    fn supports_device_selection(&self) -> bool;

    /// Concrete output devices, without the synthetic default slot.
    fn output_devices(&self) -> Vec<AudioDeviceInfo>;

    /// Concrete input devices, without the synthetic default slot.
    fn input_devices(&self) -> Vec<AudioDeviceInfo>;

    /// Id of the current system default output device, when known.
    fn default_output_device(&self) -> Option<DeviceId>;

    /// Id of the current system default input device, when known.
    fn default_input_device(&self) -> Option<DeviceId>;

    /// Install or remove the event callback. The platform must stop
    /// delivering events after removal.
    fn set_event_callback(&mut self, callback: Option<PlatformEventCallback>);
}

/// Platform with no devices, no selection support, and no events.
pub struct NullAudioPlatform;

impl NullAudioPlatform {
    /// Create the no-op platform.
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullAudioPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPlatform for NullAudioPlatform {
    fn supports_device_selection(&self) -> bool {
        false
    }

    fn output_devices(&self) -> Vec<AudioDeviceInfo> {
        Vec::new()
    }

    fn input_devices(&self) -> Vec<AudioDeviceInfo> {
        Vec::new()
    }

    fn default_output_device(&self) -> Option<DeviceId> {
        None
    }

    fn default_input_device(&self) -> Option<DeviceId> {
        None
    }

    fn set_event_callback(&mut self, _callback: Option<PlatformEventCallback>) {}
}
