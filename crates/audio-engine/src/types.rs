//! Core audio types shared across the engine.

use std::fmt;

/// Sample representation of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    /// Signed 16-bit integer samples, the transport's native format.
    Int16,
    /// 32-bit float samples, the host graph's native format.
    Float32,
}

/// A PCM stream format as negotiated with the host graph or the transport.
///
/// A format with a zero sample rate or zero channel count means the
/// corresponding hardware endpoint is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Samples per second.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Sample representation.
    pub kind: SampleKind,
}

impl AudioFormat {
    /// An Int16 format at the given rate and channel count.
    pub fn int16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            kind: SampleKind::Int16,
        }
    }

    /// A Float32 format at the given rate and channel count.
    pub fn float32(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            kind: SampleKind::Float32,
        }
    }

    /// Whether the format describes a usable endpoint.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }

    /// Frames contained in one 10 ms transport chunk at this rate.
    pub fn frames_per_chunk(&self) -> usize {
        (self.sample_rate / 100) as usize
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {:?}",
            self.sample_rate, self.channels, self.kind
        )
    }
}

/// Opaque hardware device identifier.
///
/// The zero value is the "default device" sentinel: the engine follows
/// whatever the OS currently names the default and tracks changes to that
/// binding through the state's update counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// The "default device" sentinel.
    pub const UNKNOWN: DeviceId = DeviceId(0);

    /// Whether this is the default-device sentinel.
    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "default")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Descriptive information about one audio device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    /// Hardware identifier; [`DeviceId::UNKNOWN`] for the synthetic default
    /// slot.
    pub id: DeviceId,
    /// Stable unique identifier as reported by the OS.
    pub unique_id: String,
    /// Human-readable label.
    pub label: String,
    /// Whether this entry is the system default device.
    pub is_default: bool,
}

impl AudioDeviceInfo {
    /// Create a device entry.
    pub fn new(id: DeviceId, unique_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id,
            unique_id: unique_id.into(),
            label: label.into(),
            is_default: false,
        }
    }

    /// The synthetic leading "default" slot returned by device enumeration.
    pub fn default_slot() -> Self {
        Self {
            id: DeviceId::UNKNOWN,
            unique_id: "default".to_string(),
            label: "Default".to_string(),
            is_default: true,
        }
    }
}

/// How the engine renders audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Rendering through a real audio device, driven by the device clock.
    #[default]
    Device,
    /// Caller-driven rendering: a dedicated thread pulls fixed-size chunks
    /// through the graph's manual render block.
    Manual,
}

/// The mechanism by which `input_muted` takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MuteMode {
    /// Flip the muted flag on the voice-processing input node.
    #[default]
    VoiceProcessing,
    /// Tear the input side of the engine down entirely while muted.
    RestartEngine,
    /// Zero the input mixer node's output volume.
    InputMixer,
}

/// Voice activity detected on a muted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechActivityEvent {
    /// The muted talker started speaking.
    Started,
    /// The muted talker stopped speaking.
    Ended,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_validity() {
        assert!(AudioFormat::int16(48_000, 1).is_valid());
        assert!(!AudioFormat::int16(0, 1).is_valid());
        assert!(!AudioFormat::float32(44_100, 0).is_valid());
    }

    #[test]
    fn test_frames_per_chunk() {
        assert_eq!(AudioFormat::int16(48_000, 1).frames_per_chunk(), 480);
        assert_eq!(AudioFormat::int16(44_100, 1).frames_per_chunk(), 441);
        assert_eq!(AudioFormat::int16(8_000, 1).frames_per_chunk(), 80);
    }

    #[test]
    fn test_device_id_sentinel() {
        assert!(DeviceId::UNKNOWN.is_unknown());
        assert!(DeviceId::default().is_unknown());
        assert!(!DeviceId(37).is_unknown());
        assert_eq!(DeviceId(37).to_string(), "37");
        assert_eq!(DeviceId::UNKNOWN.to_string(), "default");
    }

    #[test]
    fn test_default_slot_leads_enumeration() {
        let slot = AudioDeviceInfo::default_slot();
        assert!(slot.id.is_unknown());
        assert!(slot.is_default);
    }
}
