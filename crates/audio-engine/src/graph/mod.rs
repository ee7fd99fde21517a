//! Abstract host audio graph.
//!
//! The engine never talks to platform audio APIs directly. It drives a
//! [`AudioGraph`] — one engine object with input, output, and mixer
//! endpoints plus dynamically attached source, sink, and mixer nodes —
//! created through an [`AudioBackend`]. A production backend wraps the
//! platform's node graph; [`test_graph`] provides an in-memory
//! implementation for integration testing.

pub mod test_graph;

use crate::error::EngineResult;
use crate::types::{AudioFormat, DeviceId, SpeechActivityEvent};

/// Reference to a node inside one graph instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphNode {
    /// The hardware input endpoint.
    InputNode,
    /// The hardware output endpoint.
    OutputNode,
    /// The engine's built-in main mixer.
    MainMixer,
    /// A dynamically attached source node.
    Source(u32),
    /// A dynamically attached sink node.
    Sink(u32),
    /// A dynamically attached mixer node.
    Mixer(u32),
}

/// Render callback of a source node: fill the frame buffer with Int16 mono
/// samples. The graph up-converts to its internal float format.
pub type SourceRenderCallback = Box<dyn FnMut(&mut [i16]) + Send>;

/// Receive callback of a sink node: Float32 samples plus the monotonic
/// capture timestamp in nanoseconds.
pub type SinkDataCallback = Box<dyn FnMut(&[f32], u64) + Send>;

/// Muted-talker voice activity notification. May fire from any thread.
pub type SpeechActivityCallback = Box<dyn Fn(SpeechActivityEvent) + Send + Sync>;

/// Fired when the host reconfigures the graph behind the engine's back.
/// May fire from any thread.
pub type ConfigurationChangeCallback = Box<dyn Fn() + Send + Sync>;

/// Caller-driven render entry point: render up to `frames` Int16 mono frames
/// into the buffer, returning the frames actually rendered.
pub type ManualRenderBlock = Box<dyn FnMut(u32, &mut [i16]) -> EngineResult<u32> + Send>;

/// One host engine object and its node graph.
///
/// All methods are called from the engine's control task; the callbacks
/// handed in may fire from arbitrary host threads.
pub trait AudioGraph: Send {
    /// Hardware format of the output endpoint. Invalid when no output
    /// device is usable.
    fn output_hardware_format(&self) -> AudioFormat;

    /// Hardware format of the input endpoint. Invalid when no input device
    /// is usable.
    fn input_hardware_format(&self) -> AudioFormat;

    /// Attach a source node rendering through `callback` in `format`.
    fn attach_source_node(
        &mut self,
        format: &AudioFormat,
        callback: SourceRenderCallback,
    ) -> EngineResult<GraphNode>;

    /// Attach a sink node receiving through `callback` in `format`.
    fn attach_sink_node(
        &mut self,
        format: &AudioFormat,
        callback: SinkDataCallback,
    ) -> EngineResult<GraphNode>;

    /// Attach an auxiliary mixer node.
    fn attach_mixer_node(&mut self) -> EngineResult<GraphNode>;

    /// Detach a previously attached node. Returns
    /// [`EngineError::NodeNotAttached`](crate::error::EngineError::NodeNotAttached)
    /// when the node is not attached.
    fn detach_node(&mut self, node: GraphNode) -> EngineResult<()>;

    /// Connect `from` to `to` using `format`.
    fn connect(&mut self, from: GraphNode, to: GraphNode, format: &AudioFormat)
        -> EngineResult<()>;

    /// Whether anything is connected into `node`.
    fn has_inputs(&self, node: GraphNode) -> bool;

    /// Toggle voice processing on the input endpoint.
    fn set_voice_processing_enabled(&mut self, enabled: bool) -> EngineResult<()>;

    /// Current voice-processing flag of the input endpoint.
    fn voice_processing_enabled(&self) -> bool;

    /// Mute or unmute the voice-processing input.
    fn set_voice_processing_input_muted(&mut self, muted: bool);

    /// Current voice-processing input mute flag.
    fn voice_processing_input_muted(&self) -> bool;

    /// Bypass or engage voice processing.
    fn set_voice_processing_bypassed(&mut self, bypassed: bool);

    /// Current bypass flag.
    fn voice_processing_bypassed(&self) -> bool;

    /// Toggle automatic gain control.
    fn set_agc_enabled(&mut self, enabled: bool);

    /// Current AGC flag.
    fn agc_enabled(&self) -> bool;

    /// Configure ducking of other audio while the input is active.
    fn set_ducking(&mut self, advanced: bool, level: i64);

    /// Install or remove the muted-talker activity callback.
    fn set_speech_activity_callback(&mut self, callback: Option<SpeechActivityCallback>);

    /// Set the output volume of an attached mixer node.
    fn set_mixer_output_volume(&mut self, node: GraphNode, volume: f32);

    /// Bind the input endpoint to a specific hardware device.
    fn bind_input_device(&mut self, device: DeviceId) -> EngineResult<()>;

    /// Bind the output endpoint to a specific hardware device.
    fn bind_output_device(&mut self, device: DeviceId) -> EngineResult<()>;

    /// Pre-allocate resources ahead of `start`.
    fn prepare(&mut self);

    /// Start the engine object.
    fn start(&mut self) -> EngineResult<()>;

    /// Stop the engine object.
    fn stop(&mut self);

    /// Whether the engine object is running.
    fn is_running(&self) -> bool;

    /// Install or remove the configuration-change callback.
    fn set_configuration_change_callback(&mut self, callback: Option<ConfigurationChangeCallback>);

    /// Put the engine into realtime manual rendering mode.
    fn enable_manual_rendering(
        &mut self,
        format: &AudioFormat,
        max_frames: u32,
    ) -> EngineResult<()>;

    /// Obtain the manual render entry point. Only meaningful after
    /// [`AudioGraph::enable_manual_rendering`].
    fn manual_render_block(&mut self) -> ManualRenderBlock;

    /// Diagnostic dump of the node graph.
    fn debug_description(&self) -> String;
}

/// Factory for host engine objects. One graph is created per engine object
/// lifetime; recreate means discard and build a fresh one.
pub trait AudioBackend: Send {
    /// Create a fresh engine object.
    fn create_graph(&mut self) -> EngineResult<Box<dyn AudioGraph>>;
}
