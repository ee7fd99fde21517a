//! In-memory audio graph for integration testing.
//!
//! [`MockAudioBackend`] builds [`MockAudioGraph`] instances whose entire
//! state lives behind shared handles, so tests can inspect node wiring,
//! drive render and sink callbacks as if they were hardware, and inject
//! failures (unavailable formats, start refusals) without real audio
//! hardware.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::graph::{
    AudioBackend, AudioGraph, ConfigurationChangeCallback, GraphNode, ManualRenderBlock,
    SinkDataCallback, SourceRenderCallback, SpeechActivityCallback,
};
use crate::types::{AudioFormat, DeviceId, SpeechActivityEvent};

/// Internal state of one mock graph, shared with its inspection handle.
struct GraphState {
    input_format: AudioFormat,
    output_format: AudioFormat,
    running: bool,
    prepared: bool,
    start_attempts: u32,
    start_failures_remaining: u32,
    attached: Vec<GraphNode>,
    connections: Vec<(GraphNode, GraphNode, AudioFormat)>,
    vp_enabled: bool,
    vp_input_muted: bool,
    vp_bypassed: bool,
    agc_enabled: bool,
    ducking: Option<(bool, i64)>,
    mixer_volumes: Vec<(GraphNode, f32)>,
    bound_input_device: Option<DeviceId>,
    bound_output_device: Option<DeviceId>,
    manual_mode: Option<(AudioFormat, u32)>,
    manual_renders: u64,
    manual_fill_sample: i16,
    released: bool,
    next_node_id: u32,
    source_callback: Option<(GraphNode, SourceRenderCallback)>,
    sink_callback: Option<(GraphNode, SinkDataCallback)>,
    speech_callback: Option<SpeechActivityCallback>,
    configuration_callback: Option<ConfigurationChangeCallback>,
}

impl GraphState {
    fn new(input_format: AudioFormat, output_format: AudioFormat, start_failures: u32) -> Self {
        Self {
            input_format,
            output_format,
            running: false,
            prepared: false,
            start_attempts: 0,
            start_failures_remaining: start_failures,
            attached: Vec::new(),
            connections: Vec::new(),
            vp_enabled: false,
            vp_input_muted: false,
            vp_bypassed: false,
            agc_enabled: false,
            ducking: None,
            mixer_volumes: Vec::new(),
            bound_input_device: None,
            bound_output_device: None,
            manual_mode: None,
            manual_renders: 0,
            manual_fill_sample: 0,
            released: false,
            next_node_id: 1,
            source_callback: None,
            sink_callback: None,
            speech_callback: None,
            configuration_callback: None,
        }
    }

    fn node_exists(&self, node: GraphNode) -> bool {
        matches!(
            node,
            GraphNode::InputNode | GraphNode::OutputNode | GraphNode::MainMixer
        ) || self.attached.contains(&node)
    }
}

/// In-memory [`AudioGraph`] implementation.
pub struct MockAudioGraph {
    state: Arc<Mutex<GraphState>>,
}

impl AudioGraph for MockAudioGraph {
    fn output_hardware_format(&self) -> AudioFormat {
        self.state.lock().output_format
    }

    fn input_hardware_format(&self) -> AudioFormat {
        self.state.lock().input_format
    }

    fn attach_source_node(
        &mut self,
        _format: &AudioFormat,
        callback: SourceRenderCallback,
    ) -> EngineResult<GraphNode> {
        let mut state = self.state.lock();
        let node = GraphNode::Source(state.next_node_id);
        state.next_node_id += 1;
        state.attached.push(node);
        state.source_callback = Some((node, callback));
        Ok(node)
    }

    fn attach_sink_node(
        &mut self,
        _format: &AudioFormat,
        callback: SinkDataCallback,
    ) -> EngineResult<GraphNode> {
        let mut state = self.state.lock();
        let node = GraphNode::Sink(state.next_node_id);
        state.next_node_id += 1;
        state.attached.push(node);
        state.sink_callback = Some((node, callback));
        Ok(node)
    }

    fn attach_mixer_node(&mut self) -> EngineResult<GraphNode> {
        let mut state = self.state.lock();
        let node = GraphNode::Mixer(state.next_node_id);
        state.next_node_id += 1;
        state.attached.push(node);
        Ok(node)
    }

    fn detach_node(&mut self, node: GraphNode) -> EngineResult<()> {
        let mut state = self.state.lock();
        let Some(index) = state.attached.iter().position(|&n| n == node) else {
            return Err(EngineError::NodeNotAttached { node });
        };
        state.attached.remove(index);
        state.connections.retain(|&(from, to, _)| from != node && to != node);
        state.mixer_volumes.retain(|&(n, _)| n != node);
        if state.source_callback.as_ref().is_some_and(|(n, _)| *n == node) {
            state.source_callback = None;
        }
        if state.sink_callback.as_ref().is_some_and(|(n, _)| *n == node) {
            state.sink_callback = None;
        }
        Ok(())
    }

    fn connect(
        &mut self,
        from: GraphNode,
        to: GraphNode,
        format: &AudioFormat,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        if !state.node_exists(from) {
            return Err(EngineError::NodeNotAttached { node: from });
        }
        if !state.node_exists(to) {
            return Err(EngineError::NodeNotAttached { node: to });
        }
        state.connections.push((from, to, *format));
        Ok(())
    }

    fn has_inputs(&self, node: GraphNode) -> bool {
        self.state
            .lock()
            .connections
            .iter()
            .any(|&(_, to, _)| to == node)
    }

    fn set_voice_processing_enabled(&mut self, enabled: bool) -> EngineResult<()> {
        self.state.lock().vp_enabled = enabled;
        Ok(())
    }

    fn voice_processing_enabled(&self) -> bool {
        self.state.lock().vp_enabled
    }

    fn set_voice_processing_input_muted(&mut self, muted: bool) {
        self.state.lock().vp_input_muted = muted;
    }

    fn voice_processing_input_muted(&self) -> bool {
        self.state.lock().vp_input_muted
    }

    fn set_voice_processing_bypassed(&mut self, bypassed: bool) {
        self.state.lock().vp_bypassed = bypassed;
    }

    fn voice_processing_bypassed(&self) -> bool {
        self.state.lock().vp_bypassed
    }

    fn set_agc_enabled(&mut self, enabled: bool) {
        self.state.lock().agc_enabled = enabled;
    }

    fn agc_enabled(&self) -> bool {
        self.state.lock().agc_enabled
    }

    fn set_ducking(&mut self, advanced: bool, level: i64) {
        self.state.lock().ducking = Some((advanced, level));
    }

    fn set_speech_activity_callback(&mut self, callback: Option<SpeechActivityCallback>) {
        self.state.lock().speech_callback = callback;
    }

    fn set_mixer_output_volume(&mut self, node: GraphNode, volume: f32) {
        let mut state = self.state.lock();
        if let Some(entry) = state.mixer_volumes.iter_mut().find(|(n, _)| *n == node) {
            entry.1 = volume;
        } else {
            state.mixer_volumes.push((node, volume));
        }
    }

    fn bind_input_device(&mut self, device: DeviceId) -> EngineResult<()> {
        self.state.lock().bound_input_device = Some(device);
        Ok(())
    }

    fn bind_output_device(&mut self, device: DeviceId) -> EngineResult<()> {
        self.state.lock().bound_output_device = Some(device);
        Ok(())
    }

    fn prepare(&mut self) {
        self.state.lock().prepared = true;
    }

    fn start(&mut self) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.start_attempts += 1;
        if state.start_failures_remaining > 0 {
            state.start_failures_remaining -= 1;
            return Err(EngineError::GraphFailure {
                reason: "simulated start failure".to_string(),
            });
        }
        state.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().running = false;
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn set_configuration_change_callback(&mut self, callback: Option<ConfigurationChangeCallback>) {
        self.state.lock().configuration_callback = callback;
    }

    fn enable_manual_rendering(
        &mut self,
        format: &AudioFormat,
        max_frames: u32,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        if state.running {
            return Err(EngineError::ManualRenderingFailure {
                reason: "cannot change rendering mode while running".to_string(),
            });
        }
        state.manual_mode = Some((*format, max_frames));
        Ok(())
    }

    fn manual_render_block(&mut self) -> ManualRenderBlock {
        let shared = self.state.clone();
        Box::new(move |frames, dst| {
            let mut state = shared.lock();
            let Some((_, max_frames)) = state.manual_mode else {
                return Err(EngineError::ManualRenderingFailure {
                    reason: "manual rendering not enabled".to_string(),
                });
            };
            if !state.running {
                return Err(EngineError::ManualRenderingFailure {
                    reason: "engine not running".to_string(),
                });
            }
            let frames = frames.min(max_frames).min(dst.len() as u32);
            let fill = state.manual_fill_sample;
            dst[..frames as usize].fill(fill);
            state.manual_renders += 1;
            Ok(frames)
        })
    }

    fn debug_description(&self) -> String {
        let state = self.state.lock();
        format!(
            "mock graph: {} attached nodes, {} connections, running={}, manual={}",
            state.attached.len(),
            state.connections.len(),
            state.running,
            state.manual_mode.is_some()
        )
    }
}

impl Drop for MockAudioGraph {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.running = false;
        state.released = true;
    }
}

/// Inspection and hardware-simulation handle for one mock graph.
#[derive(Clone)]
pub struct MockGraphHandle {
    state: Arc<Mutex<GraphState>>,
}

impl MockGraphHandle {
    /// Whether the graph is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Whether `prepare` was called.
    pub fn was_prepared(&self) -> bool {
        self.state.lock().prepared
    }

    /// Whether the graph object was dropped by the engine.
    pub fn was_released(&self) -> bool {
        self.state.lock().released
    }

    /// Total start attempts, including failed ones.
    pub fn start_attempts(&self) -> u32 {
        self.state.lock().start_attempts
    }

    /// Make the next `count` start attempts fail.
    pub fn fail_next_starts(&self, count: u32) {
        self.state.lock().start_failures_remaining = count;
    }

    /// Currently attached dynamic nodes.
    pub fn attached_nodes(&self) -> Vec<GraphNode> {
        self.state.lock().attached.clone()
    }

    /// Whether `node` is currently attached.
    pub fn has_node(&self, node: GraphNode) -> bool {
        self.state.lock().attached.contains(&node)
    }

    /// Current connections as `(from, to)` pairs.
    pub fn connections(&self) -> Vec<(GraphNode, GraphNode)> {
        self.state
            .lock()
            .connections
            .iter()
            .map(|&(from, to, _)| (from, to))
            .collect()
    }

    /// Voice-processing enabled flag.
    pub fn voice_processing_enabled(&self) -> bool {
        self.state.lock().vp_enabled
    }

    /// Voice-processing input mute flag.
    pub fn voice_processing_input_muted(&self) -> bool {
        self.state.lock().vp_input_muted
    }

    /// Voice-processing bypass flag.
    pub fn voice_processing_bypassed(&self) -> bool {
        self.state.lock().vp_bypassed
    }

    /// AGC flag.
    pub fn agc_enabled(&self) -> bool {
        self.state.lock().agc_enabled
    }

    /// Last ducking configuration applied.
    pub fn ducking(&self) -> Option<(bool, i64)> {
        self.state.lock().ducking
    }

    /// Output volume of an attached mixer node.
    pub fn mixer_volume(&self, node: GraphNode) -> Option<f32> {
        self.state
            .lock()
            .mixer_volumes
            .iter()
            .find(|(n, _)| *n == node)
            .map(|&(_, v)| v)
    }

    /// Device bound to the input endpoint.
    pub fn bound_input_device(&self) -> Option<DeviceId> {
        self.state.lock().bound_input_device
    }

    /// Device bound to the output endpoint.
    pub fn bound_output_device(&self) -> Option<DeviceId> {
        self.state.lock().bound_output_device
    }

    /// Manual rendering configuration, if enabled.
    pub fn manual_mode(&self) -> Option<(AudioFormat, u32)> {
        self.state.lock().manual_mode
    }

    /// Number of manual render calls served.
    pub fn manual_renders(&self) -> u64 {
        self.state.lock().manual_renders
    }

    /// Sample value the manual render block fills buffers with.
    pub fn set_manual_fill_sample(&self, sample: i16) {
        self.state.lock().manual_fill_sample = sample;
    }

    /// Simulate the hardware pulling `frames` of playout audio through the
    /// attached source node. Returns the rendered samples, or `None` when no
    /// source node is attached.
    pub fn drive_source(&self, frames: usize) -> Option<Vec<i16>> {
        let mut entry = self.state.lock().source_callback.take()?;
        let mut buffer = vec![0i16; frames];
        (entry.1)(&mut buffer);
        let mut state = self.state.lock();
        if state.source_callback.is_none() {
            state.source_callback = Some(entry);
        }
        Some(buffer)
    }

    /// Simulate the hardware delivering captured float audio to the attached
    /// sink node. Returns false when no sink node is attached.
    pub fn drive_sink(&self, samples: &[f32], capture_timestamp_ns: u64) -> bool {
        let Some(mut entry) = self.state.lock().sink_callback.take() else {
            return false;
        };
        (entry.1)(samples, capture_timestamp_ns);
        let mut state = self.state.lock();
        if state.sink_callback.is_none() {
            state.sink_callback = Some(entry);
        }
        true
    }

    /// Fire the muted-talker activity callback.
    pub fn fire_speech_activity(&self, event: SpeechActivityEvent) -> bool {
        let state = self.state.lock();
        if let Some(callback) = &state.speech_callback {
            callback(event);
            true
        } else {
            false
        }
    }

    /// Fire the configuration-change callback, optionally force-stopping the
    /// graph first (a spontaneous stop, as the host does on device
    /// reconfiguration).
    pub fn fire_configuration_change(&self, stop_engine: bool) -> bool {
        let mut state = self.state.lock();
        if stop_engine {
            state.running = false;
        }
        if let Some(callback) = &state.configuration_callback {
            callback();
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
struct BackendTemplate {
    input_format: AudioFormat,
    output_format: AudioFormat,
    start_failures: u32,
}

struct BackendShared {
    template: BackendTemplate,
    graphs: Vec<Arc<Mutex<GraphState>>>,
}

/// [`AudioBackend`] producing [`MockAudioGraph`] instances.
pub struct MockAudioBackend {
    shared: Arc<Mutex<BackendShared>>,
}

impl MockAudioBackend {
    /// A backend whose graphs report Float32 48 kHz mono hardware formats on
    /// both endpoints.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(BackendShared {
                template: BackendTemplate {
                    input_format: AudioFormat::float32(48_000, 1),
                    output_format: AudioFormat::float32(48_000, 1),
                    start_failures: 0,
                },
                graphs: Vec::new(),
            })),
        }
    }

    /// Handle for inspecting graphs created by this backend.
    pub fn handle(&self) -> MockBackendHandle {
        MockBackendHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for MockAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MockAudioBackend {
    fn create_graph(&mut self) -> EngineResult<Box<dyn AudioGraph>> {
        let mut shared = self.shared.lock();
        let template = shared.template.clone();
        let state = Arc::new(Mutex::new(GraphState::new(
            template.input_format,
            template.output_format,
            template.start_failures,
        )));
        shared.graphs.push(state.clone());
        Ok(Box::new(MockAudioGraph { state }))
    }
}

/// Inspection handle over every graph a [`MockAudioBackend`] created.
#[derive(Clone)]
pub struct MockBackendHandle {
    shared: Arc<Mutex<BackendShared>>,
}

impl MockBackendHandle {
    /// Number of graphs created so far.
    pub fn created_count(&self) -> usize {
        self.shared.lock().graphs.len()
    }

    /// Handle to the `index`-th created graph.
    pub fn graph(&self, index: usize) -> Option<MockGraphHandle> {
        self.shared
            .lock()
            .graphs
            .get(index)
            .cloned()
            .map(|state| MockGraphHandle { state })
    }

    /// Handle to the most recently created graph.
    pub fn latest(&self) -> Option<MockGraphHandle> {
        let shared = self.shared.lock();
        shared
            .graphs
            .last()
            .cloned()
            .map(|state| MockGraphHandle { state })
    }

    /// Hardware input format reported by graphs created after this call.
    pub fn set_input_format(&self, format: AudioFormat) {
        self.shared.lock().template.input_format = format;
    }

    /// Hardware output format reported by graphs created after this call.
    pub fn set_output_format(&self, format: AudioFormat) {
        self.shared.lock().template.output_format = format;
    }

    /// Make the next graphs fail their first `count` start attempts.
    pub fn set_start_failures(&self, count: u32) {
        self.shared.lock().template.start_failures = count;
    }
}
