//! Aven Audio Engine
//!
//! A real-time audio device engine that sits between a 10 ms PCM audio
//! processing stack (the transport) and the host platform's audio node graph.
//! The engine translates high-level intent ("enable input", "start playout",
//! "mute microphone", "switch to manual rendering", "change input device")
//! into an ordered, minimally-disruptive sequence of graph-level operations.
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - **State**: plain-data [`EngineState`] plus the [`state::EngineStateUpdate`]
//!   diff that classifies a transition
//! - **Engine**: the [`AudioEngineDevice`] control surface and the appliers
//!   that walk a diff through the audio graph
//! - **Graph**: abstract host-graph traits ([`AudioGraph`], [`AudioBackend`])
//!   with an in-memory test implementation
//! - **Buffers**: the [`AudioDeviceBuffer`]/[`FineAudioBuffer`] pair that
//!   adapts arbitrary hardware callback sizes to the 10 ms transport cadence
//! - **Platform**: device enumeration and OS event delivery behind
//!   [`AudioPlatform`]
//!
//! All externally settable knobs funnel through a single state-transition
//! driver on a dedicated control task; OS callbacks and render callbacks
//! marshal onto that task before touching engine state.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aven_audio_engine::{
//!     AudioEngineDevice, EngineConfig,
//!     graph::test_graph::MockAudioBackend,
//!     platform::NullAudioPlatform,
//!     observer::NoopObserver,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MockAudioBackend::new();
//! let engine = AudioEngineDevice::new(
//!     EngineConfig::default(),
//!     Box::new(backend),
//!     Box::new(NullAudioPlatform::new()),
//!     Arc::new(NoopObserver),
//! )
//! .await;
//!
//! engine.init().await?;
//! engine.init_recording().await?;
//! engine.start_recording().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod graph;
pub mod observer;
pub mod platform;
pub mod state;
pub mod types;

pub use buffer::{AudioDeviceBuffer, AudioTransport, FineAudioBuffer};
pub use config::EngineConfig;
pub use engine::AudioEngineDevice;
pub use error::{EngineError, EngineResult};
pub use graph::{AudioBackend, AudioGraph, GraphNode};
pub use observer::AudioEngineObserver;
pub use platform::{AudioPlatform, PlatformEvent};
pub use state::EngineState;
pub use types::{
    AudioDeviceInfo, AudioFormat, DeviceId, MuteMode, RenderMode, SampleKind, SpeechActivityEvent,
};

/// Default engine configuration constants.
pub mod defaults {
    /// Transport chunk interval. The engine always exchanges PCM with the
    /// transport in chunks of this many milliseconds.
    pub const FRAME_INTERVAL_MS: u32 = 10;

    /// Sample rate used by the manual rendering engine.
    pub const MANUAL_RENDER_SAMPLE_RATE: u32 = 48_000;

    /// Channel count used by the manual rendering engine (mono).
    pub const MANUAL_RENDER_CHANNELS: u16 = 1;

    /// Maximum frame count per manual render call, and the capacity of the
    /// manual-mode render and read PCM buffers.
    pub const MANUAL_RENDER_MAX_FRAMES: u32 = 3072;

    /// Number of times a failed engine start is retried.
    pub const ENGINE_START_RETRY_COUNT: u32 = 10;

    /// Sleep between engine start attempts, in milliseconds.
    pub const ENGINE_START_RETRY_DELAY_MS: u64 = 100;

    /// Settle sleep after `prepare` on platforms with device selection, in
    /// milliseconds. Works around a race when another process holds voice
    /// processing.
    pub const PREPARE_SETTLE_DELAY_MS: u64 = 100;

    /// Debounce window for default-device change notifications, in
    /// milliseconds.
    pub const DEFAULT_DEVICE_DEBOUNCE_MS: u64 = 500;

    /// Fixed playout delay estimate reported to the caller, in milliseconds.
    pub const FIXED_PLAYOUT_DELAY_MS: u16 = 10;
}
