//! The audio engine device and its control task.
//!
//! [`AudioEngineDevice`] is a cheap handle: every public operation posts a
//! command onto an unbounded channel consumed by a single control task that
//! owns the engine core — the engine state, the graph objects, the PCM
//! buffers, and the device vectors. Updates issued in order from one thread
//! commit in that order; OS callbacks (device list, default device,
//! configuration change, interruption, voice activity) post onto the same
//! channel and are serialized with everything else.
//!
//! The single mutation path is `ModifyEngineState`: snapshot, transform,
//! diff, dispatch to the applier for the target rendering mode, commit on
//! success. No field of the committed state is mutated anywhere else.

mod device_apply;
mod manual_apply;
mod render_loop;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{AudioDeviceBuffer, AudioTransport, FineAudioBuffer};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::graph::{AudioBackend, AudioGraph, GraphNode};
use crate::observer::AudioEngineObserver;
use crate::platform::{AudioPlatform, PlatformEvent};
use crate::state::{EngineState, EngineStateUpdate};
use crate::types::{AudioDeviceInfo, DeviceId, MuteMode, RenderMode, SpeechActivityEvent};

use render_loop::RenderLoop;

/// State transform applied by `ModifyEngineState`.
type StateTransform = Box<dyn FnOnce(EngineState) -> EngineState + Send>;

/// Map an observer return code onto the error model: non-zero vetoes the
/// transition and the code is surfaced unchanged.
fn observer_rc(rc: i32) -> EngineResult<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(EngineError::ObserverRejected { code: rc })
    }
}

/// Which default-device binding a debounced update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefaultDeviceSide {
    Output,
    Input,
}

enum EngineCommand {
    Modify {
        requires_init: bool,
        transform: StateTransform,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineState>,
    },
    Init {
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Terminate {
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Initialized {
        reply: oneshot::Sender<bool>,
    },
    IsEngineRunning {
        reply: oneshot::Sender<bool>,
    },
    RegisterTransport {
        transport: Option<Arc<dyn AudioTransport>>,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    PlayoutDevices {
        reply: oneshot::Sender<Vec<AudioDeviceInfo>>,
    },
    RecordingDevices {
        reply: oneshot::Sender<Vec<AudioDeviceInfo>>,
    },
    SetPlayoutDevice {
        index: u16,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    SetRecordingDevice {
        index: u16,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Platform {
        event: PlatformEvent,
    },
    BumpDefaultDeviceCounter {
        side: DefaultDeviceSide,
    },
    ConfigurationChange,
    SpeechActivity {
        event: SpeechActivityEvent,
    },
    Shutdown,
}

/// Handle to the audio engine device.
///
/// Clone-free by design: the engine is one long-lived object. Dropping the
/// handle shuts the control task down and releases every graph resource.
pub struct AudioEngineDevice {
    tx: mpsc::UnboundedSender<EngineCommand>,
    safety: CancellationToken,
    config: EngineConfig,
}

impl AudioEngineDevice {
    /// Create the engine and spawn its control task.
    pub async fn new(
        config: EngineConfig,
        backend: Box<dyn AudioBackend>,
        platform: Box<dyn AudioPlatform>,
        observer: Arc<dyn AudioEngineObserver>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let safety = CancellationToken::new();
        let core = EngineCore::new(
            config.clone(),
            backend,
            platform,
            observer,
            tx.clone(),
            safety.clone(),
        );
        tokio::spawn(core.run(rx));
        Self { tx, safety, config }
    }

    fn send(&self, command: EngineCommand) -> EngineResult<()> {
        self.tx
            .send(command)
            .map_err(|_| EngineError::NotInitialized)
    }

    async fn modify(
        &self,
        requires_init: bool,
        transform: impl FnOnce(EngineState) -> EngineState + Send + 'static,
    ) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Modify {
            requires_init,
            transform: Box::new(transform),
            reply,
        })?;
        rx.await.map_err(|_| EngineError::NotInitialized)?
    }

    async fn snapshot(&self) -> EngineResult<EngineState> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot { reply })?;
        rx.await.map_err(|_| EngineError::NotInitialized)
    }

    /// Initialize the engine: enumerate devices and accept lifecycle calls.
    /// Idempotent.
    pub async fn init(&self) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Init { reply })?;
        rx.await.map_err(|_| EngineError::NotInitialized)?
    }

    /// Shut everything down and drop back to the uninitialized state.
    pub async fn terminate(&self) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Terminate { reply })?;
        rx.await.map_err(|_| EngineError::NotInitialized)?
    }

    /// Whether `init` completed.
    pub async fn initialized(&self) -> EngineResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Initialized { reply })?;
        rx.await.map_err(|_| EngineError::NotInitialized)
    }

    /// Initialize the playout side.
    pub async fn init_playout(&self) -> EngineResult<()> {
        self.modify(true, |mut s| {
            s.output_enabled = true;
            s
        })
        .await
    }

    /// Whether playout is initialized.
    pub async fn playout_is_initialized(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.output_enabled)
    }

    /// Start playout. Requires `init_playout`.
    pub async fn start_playout(&self) -> EngineResult<()> {
        self.modify(true, |mut s| {
            s.output_running = true;
            s
        })
        .await
    }

    /// Stop playout and drop its initialization.
    pub async fn stop_playout(&self) -> EngineResult<()> {
        self.modify(true, |mut s| {
            s.output_running = false;
            s.output_enabled = false;
            s
        })
        .await
    }

    /// Whether the playout side is effectively running.
    pub async fn playing(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.is_output_running())
    }

    /// Initialize the recording side.
    pub async fn init_recording(&self) -> EngineResult<()> {
        self.modify(true, |mut s| {
            s.input_enabled = true;
            s
        })
        .await
    }

    /// Whether recording is initialized.
    pub async fn recording_is_initialized(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.input_enabled)
    }

    /// Start recording. Requires `init_recording`.
    pub async fn start_recording(&self) -> EngineResult<()> {
        self.modify(true, |mut s| {
            s.input_running = true;
            s
        })
        .await
    }

    /// Initialize and start recording in a single transition.
    pub async fn init_and_start_recording(&self) -> EngineResult<()> {
        self.modify(true, |mut s| {
            s.input_enabled = true;
            s.input_running = true;
            s
        })
        .await
    }

    /// Stop recording and drop its initialization.
    pub async fn stop_recording(&self) -> EngineResult<()> {
        self.modify(true, |mut s| {
            s.input_running = false;
            s.input_enabled = false;
            s
        })
        .await
    }

    /// Whether the recording side is effectively running.
    pub async fn recording(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.is_input_running())
    }

    /// Mute or unmute the microphone through the configured mute mode.
    pub async fn set_microphone_mute(&self, muted: bool) -> EngineResult<()> {
        self.modify(false, move |mut s| {
            s.input_muted = muted;
            s
        })
        .await
    }

    /// Current microphone mute flag.
    pub async fn microphone_mute(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.input_muted)
    }

    /// Select the muting mechanism.
    pub async fn set_mute_mode(&self, mode: MuteMode) -> EngineResult<()> {
        self.modify(false, move |mut s| {
            s.mute_mode = mode;
            s
        })
        .await
    }

    /// Current muting mechanism.
    pub async fn mute_mode(&self) -> EngineResult<MuteMode> {
        Ok(self.snapshot().await?.mute_mode)
    }

    /// Switch between device-clocked and caller-driven rendering.
    pub async fn set_manual_rendering_mode(&self, enabled: bool) -> EngineResult<()> {
        self.modify(false, move |mut s| {
            s.render_mode = if enabled {
                RenderMode::Manual
            } else {
                RenderMode::Device
            };
            s
        })
        .await
    }

    /// Whether manual rendering is selected.
    pub async fn manual_rendering_mode(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.render_mode == RenderMode::Manual)
    }

    /// Toggle platform voice processing on the input node.
    pub async fn set_voice_processing_enabled(&self, enabled: bool) -> EngineResult<()> {
        self.modify(false, move |mut s| {
            s.voice_processing_enabled = enabled;
            s
        })
        .await
    }

    /// Current voice-processing flag.
    pub async fn voice_processing_enabled(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.voice_processing_enabled)
    }

    /// Bypass or engage voice processing without tearing it down.
    pub async fn set_voice_processing_bypassed(&self, bypassed: bool) -> EngineResult<()> {
        self.modify(false, move |mut s| {
            s.voice_processing_bypassed = bypassed;
            s
        })
        .await
    }

    /// Current bypass flag.
    pub async fn voice_processing_bypassed(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.voice_processing_bypassed)
    }

    /// Toggle automatic gain control inside voice processing.
    pub async fn set_voice_processing_agc_enabled(&self, enabled: bool) -> EngineResult<()> {
        self.modify(false, move |mut s| {
            s.voice_processing_agc_enabled = enabled;
            s
        })
        .await
    }

    /// Current AGC flag.
    pub async fn voice_processing_agc_enabled(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.voice_processing_agc_enabled)
    }

    /// Toggle advanced ducking of other audio.
    pub async fn set_advanced_ducking(&self, enabled: bool) -> EngineResult<()> {
        self.modify(false, move |mut s| {
            s.advanced_ducking = enabled;
            s
        })
        .await
    }

    /// Current advanced-ducking flag.
    pub async fn advanced_ducking(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.advanced_ducking)
    }

    /// Set the ducking level; 0 selects the platform default.
    pub async fn set_ducking_level(&self, level: i64) -> EngineResult<()> {
        self.modify(false, move |mut s| {
            s.ducking_level = level;
            s
        })
        .await
    }

    /// Current ducking level.
    pub async fn ducking_level(&self) -> EngineResult<i64> {
        Ok(self.snapshot().await?.ducking_level)
    }

    /// Tie output enablement to input enablement while voice processing is
    /// active.
    pub async fn set_input_follow_mode(&self, enabled: bool) -> EngineResult<()> {
        self.modify(false, move |mut s| {
            s.input_follow_mode = enabled;
            s
        })
        .await
    }

    /// Current follow-mode flag.
    pub async fn input_follow_mode(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.input_follow_mode)
    }

    /// Keep the input graph initialized across stop/start cycles.
    pub async fn set_init_recording_persistent_mode(&self, enabled: bool) -> EngineResult<()> {
        self.modify(false, move |mut s| {
            s.input_enabled_persistent_mode = enabled;
            s
        })
        .await
    }

    /// Current persistent-mode flag.
    pub async fn init_recording_persistent_mode(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.input_enabled_persistent_mode)
    }

    /// Mark the input/output hardware as usable or unusable.
    pub async fn set_engine_availability(
        &self,
        input_available: bool,
        output_available: bool,
    ) -> EngineResult<()> {
        self.modify(false, move |mut s| {
            s.input_available = input_available;
            s.output_available = output_available;
            s
        })
        .await
    }

    /// Current availability flags as `(input, output)`.
    pub async fn engine_availability(&self) -> EngineResult<(bool, bool)> {
        let s = self.snapshot().await?;
        Ok((s.input_available, s.output_available))
    }

    /// Replace the whole engine state in one transition.
    pub async fn set_engine_state(&self, next: EngineState) -> EngineResult<()> {
        self.modify(false, move |_| next).await
    }

    /// Snapshot of the committed engine state.
    pub async fn engine_state(&self) -> EngineResult<EngineState> {
        self.snapshot().await
    }

    /// Whether the current-mode engine object is running.
    pub async fn is_engine_running(&self) -> EngineResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::IsEngineRunning { reply })?;
        rx.await.map_err(|_| EngineError::NotInitialized)
    }

    /// Whether an interruption is in progress.
    pub async fn is_interrupted(&self) -> EngineResult<bool> {
        Ok(self.snapshot().await?.is_interrupted)
    }

    /// An OS audio-session interruption began.
    pub async fn handle_interruption_begin(&self) -> EngineResult<()> {
        self.modify(false, |mut s| {
            s.is_interrupted = true;
            s
        })
        .await
    }

    /// An OS audio-session interruption ended. `should_resume` is read and
    /// ignored; what was enabled before the interruption is restarted.
    pub async fn handle_interruption_end(&self, should_resume: bool) -> EngineResult<()> {
        debug!(should_resume, "interruption ended");
        self.modify(false, |mut s| {
            s.is_interrupted = false;
            s
        })
        .await
    }

    /// Attach or detach the 10 ms PCM transport. Rejected while any side is
    /// enabled.
    pub async fn register_audio_transport(
        &self,
        transport: Option<Arc<dyn AudioTransport>>,
    ) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::RegisterTransport { transport, reply })?;
        rx.await.map_err(|_| EngineError::NotInitialized)?
    }

    /// Playout devices, with the synthetic "default" slot first.
    pub async fn playout_devices(&self) -> EngineResult<Vec<AudioDeviceInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::PlayoutDevices { reply })?;
        rx.await.map_err(|_| EngineError::NotInitialized)
    }

    /// Recording devices, with the synthetic "default" slot first.
    pub async fn recording_devices(&self) -> EngineResult<Vec<AudioDeviceInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::RecordingDevices { reply })?;
        rx.await.map_err(|_| EngineError::NotInitialized)
    }

    /// Select the playout device by enumeration index; index 0 is the
    /// default-device slot.
    pub async fn set_playout_device(&self, index: u16) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::SetPlayoutDevice { index, reply })?;
        rx.await.map_err(|_| EngineError::NotInitialized)?
    }

    /// Select the recording device by enumeration index; index 0 is the
    /// default-device slot.
    pub async fn set_recording_device(&self, index: u16) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::SetRecordingDevice { index, reply })?;
        rx.await.map_err(|_| EngineError::NotInitialized)?
    }

    /// Fixed playout delay estimate in milliseconds.
    pub fn playout_delay_ms(&self) -> u16 {
        self.config.fixed_playout_delay_ms
    }

    /// Stereo playout support. The engine renders mono.
    pub fn stereo_playout_available(&self) -> bool {
        false
    }

    /// Stereo recording support. The engine records mono.
    pub fn stereo_recording_available(&self) -> bool {
        false
    }
}

impl Drop for AudioEngineDevice {
    fn drop(&mut self) {
        self.safety.cancel();
        let _ = self.tx.send(EngineCommand::Shutdown);
    }
}

/// Owner of all engine state, driven by the control task.
pub(crate) struct EngineCore {
    config: EngineConfig,
    state: EngineState,
    initialized: bool,
    backend: Box<dyn AudioBackend>,
    platform: Box<dyn AudioPlatform>,
    observer: Arc<dyn AudioEngineObserver>,
    device_buffer: Arc<AudioDeviceBuffer>,
    fine_buffer: Arc<FineAudioBuffer>,
    engine_device: Option<Box<dyn AudioGraph>>,
    engine_manual: Option<Box<dyn AudioGraph>>,
    source_node: Option<GraphNode>,
    sink_node: Option<GraphNode>,
    input_mixer_node: Option<GraphNode>,
    render_loop: Option<RenderLoop>,
    epoch: Instant,
    tx: mpsc::UnboundedSender<EngineCommand>,
    safety: CancellationToken,
    output_debounce: CancellationToken,
    input_debounce: CancellationToken,
    output_devices: Vec<AudioDeviceInfo>,
    input_devices: Vec<AudioDeviceInfo>,
}

impl EngineCore {
    fn new(
        config: EngineConfig,
        backend: Box<dyn AudioBackend>,
        platform: Box<dyn AudioPlatform>,
        observer: Arc<dyn AudioEngineObserver>,
        tx: mpsc::UnboundedSender<EngineCommand>,
        safety: CancellationToken,
    ) -> Self {
        let device_buffer = AudioDeviceBuffer::new();
        let fine_buffer = FineAudioBuffer::new(device_buffer.clone());
        Self {
            config,
            state: EngineState::default(),
            initialized: false,
            backend,
            platform,
            observer,
            device_buffer,
            fine_buffer,
            engine_device: None,
            engine_manual: None,
            source_node: None,
            sink_node: None,
            input_mixer_node: None,
            render_loop: None,
            epoch: Instant::now(),
            tx,
            output_debounce: safety.child_token(),
            input_debounce: safety.child_token(),
            safety,
            output_devices: Vec::new(),
            input_devices: Vec::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineCommand>) {
        self.install_platform_callback();
        while let Some(command) = rx.recv().await {
            if matches!(command, EngineCommand::Shutdown) {
                break;
            }
            self.handle_command(command).await;
        }
        self.shutdown().await;
    }

    fn install_platform_callback(&mut self) {
        let tx = self.tx.clone();
        let safety = self.safety.clone();
        self.platform.set_event_callback(Some(Box::new(move |event| {
            if safety.is_cancelled() {
                return;
            }
            let _ = tx.send(EngineCommand::Platform { event });
        })));
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Modify {
                requires_init,
                transform,
                reply,
            } => {
                let result = if requires_init && !self.initialized {
                    Err(EngineError::NotInitialized)
                } else {
                    self.modify_engine_state(transform).await
                };
                let _ = reply.send(result);
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(self.state);
            }
            EngineCommand::Init { reply } => {
                let _ = reply.send(self.do_init());
            }
            EngineCommand::Terminate { reply } => {
                let result = self.do_terminate().await;
                let _ = reply.send(result);
            }
            EngineCommand::Initialized { reply } => {
                let _ = reply.send(self.initialized);
            }
            EngineCommand::IsEngineRunning { reply } => {
                let _ = reply.send(self.is_engine_running());
            }
            EngineCommand::RegisterTransport { transport, reply } => {
                let result = if self.state.is_any_enabled() {
                    Err(EngineError::StateTransitionRejected {
                        reason: "cannot swap transport while the engine is enabled".to_string(),
                    })
                } else {
                    self.device_buffer.register_transport(transport);
                    Ok(())
                };
                let _ = reply.send(result);
            }
            EngineCommand::PlayoutDevices { reply } => {
                let _ = reply.send(self.enumerate(&self.output_devices));
            }
            EngineCommand::RecordingDevices { reply } => {
                let _ = reply.send(self.enumerate(&self.input_devices));
            }
            EngineCommand::SetPlayoutDevice { index, reply } => {
                let result = self.set_device_by_index(index, DefaultDeviceSide::Output).await;
                let _ = reply.send(result);
            }
            EngineCommand::SetRecordingDevice { index, reply } => {
                let result = self.set_device_by_index(index, DefaultDeviceSide::Input).await;
                let _ = reply.send(result);
            }
            EngineCommand::Platform { event } => {
                self.handle_platform_event(event).await;
            }
            EngineCommand::BumpDefaultDeviceCounter { side } => {
                self.bump_default_device_counter(side).await;
            }
            EngineCommand::ConfigurationChange => {
                self.handle_configuration_change().await;
            }
            EngineCommand::SpeechActivity { event } => {
                self.observer.on_speech_activity_event(event);
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn do_init(&mut self) -> EngineResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.refresh_device_lists();
        self.initialized = true;
        info!(
            output_devices = self.output_devices.len(),
            input_devices = self.input_devices.len(),
            "engine initialized"
        );
        Ok(())
    }

    async fn do_terminate(&mut self) -> EngineResult<()> {
        if !self.initialized {
            return Ok(());
        }
        self.modify_engine_state(Box::new(|mut s| {
            s.input_enabled = false;
            s.input_running = false;
            s.output_enabled = false;
            s.output_running = false;
            s
        }))
        .await?;
        self.output_debounce.cancel();
        self.input_debounce.cancel();
        self.initialized = false;
        info!("engine terminated");
        Ok(())
    }

    async fn shutdown(&mut self) {
        let teardown = self
            .modify_engine_state(Box::new(|mut s| {
                s.input_enabled = false;
                s.input_running = false;
                s.output_enabled = false;
                s.output_running = false;
                s
            }))
            .await;
        if let Err(err) = teardown {
            warn!(code = err.code(), %err, "shutdown teardown failed");
        }
        self.output_debounce.cancel();
        self.input_debounce.cancel();
        self.platform.set_event_callback(None);
    }

    fn is_engine_running(&self) -> bool {
        match self.state.render_mode {
            RenderMode::Device => self
                .engine_device
                .as_ref()
                .map(|e| e.is_running())
                .unwrap_or(false),
            RenderMode::Manual => self
                .engine_manual
                .as_ref()
                .map(|e| e.is_running())
                .unwrap_or(false),
        }
    }

    /// The state-transition driver. Everything funnels through here.
    async fn modify_engine_state(&mut self, transform: StateTransform) -> EngineResult<()> {
        let prev = self.state;
        let next = transform(prev);
        let update = EngineStateUpdate::new(prev, next);

        if update.has_no_changes() {
            return Ok(());
        }

        if next.input_running && !next.input_enabled {
            return Err(EngineError::StateTransitionRejected {
                reason: "input running without being enabled".to_string(),
            });
        }
        if next.output_running && !next.output_enabled {
            return Err(EngineError::StateTransitionRejected {
                reason: "output running without being enabled".to_string(),
            });
        }

        if update.did_enable_manual_rendering_mode() {
            // Shut the device side down against an all-default target, then
            // bring manual up from an all-default baseline.
            let shutdown = EngineStateUpdate::new(prev, EngineState::default());
            self.apply_device_engine_state(shutdown).await?;
            let startup = EngineStateUpdate::new(EngineState::default(), next);
            self.apply_manual_engine_state(startup)?;
        } else if update.did_enable_device_rendering_mode() {
            let shutdown = EngineStateUpdate::new(prev, EngineState::default());
            self.apply_manual_engine_state(shutdown)?;
            let startup = EngineStateUpdate::new(EngineState::default(), next);
            self.apply_device_engine_state(startup).await?;
        } else {
            match next.render_mode {
                RenderMode::Device => self.apply_device_engine_state(update).await?,
                RenderMode::Manual => self.apply_manual_engine_state(update)?,
            }
        }

        self.state = next;
        self.assert_engine_invariants();
        Ok(())
    }

    /// Post-commit invariants: buffer flags track the derived predicates and
    /// exactly the engine object for the active mode exists.
    fn assert_engine_invariants(&self) {
        let state = &self.state;
        let playing = self.device_buffer.is_playing();
        if playing != state.is_output_enabled() {
            error!(
                playing,
                expected = state.is_output_enabled(),
                "buffer playing flag out of sync"
            );
            debug_assert!(false, "buffer playing flag out of sync");
        }
        let recording = self.device_buffer.is_recording();
        if recording != state.is_input_enabled() {
            error!(
                recording,
                expected = state.is_input_enabled(),
                "buffer recording flag out of sync"
            );
            debug_assert!(false, "buffer recording flag out of sync");
        }

        let (active, other) = match state.render_mode {
            RenderMode::Device => (&self.engine_device, &self.engine_manual),
            RenderMode::Manual => (&self.engine_manual, &self.engine_device),
        };
        if active.is_some() != state.is_any_enabled() || other.is_some() {
            error!(
                any_enabled = state.is_any_enabled(),
                active = active.is_some(),
                other = other.is_some(),
                "engine object lifetime out of sync"
            );
            debug_assert!(false, "engine object lifetime out of sync");
        }
        if let Some(engine) = active {
            // Device-mode interruptions stop the engine without clearing the
            // running intent; manual mode has no OS session to interrupt.
            let expected = match state.render_mode {
                RenderMode::Device => state.is_any_running() && !state.is_interrupted,
                RenderMode::Manual => state.is_any_running(),
            };
            if engine.is_running() != expected {
                error!(
                    running = engine.is_running(),
                    expected, "engine running flag out of sync"
                );
                debug_assert!(false, "engine running flag out of sync");
            }
        }
    }

    fn enumerate(&self, devices: &[AudioDeviceInfo]) -> Vec<AudioDeviceInfo> {
        let mut result = Vec::with_capacity(devices.len() + 1);
        result.push(AudioDeviceInfo::default_slot());
        result.extend(devices.iter().cloned());
        result
    }

    async fn set_device_by_index(
        &mut self,
        index: u16,
        side: DefaultDeviceSide,
    ) -> EngineResult<()> {
        let devices = match side {
            DefaultDeviceSide::Output => &self.output_devices,
            DefaultDeviceSide::Input => &self.input_devices,
        };
        let id = if index == 0 {
            DeviceId::UNKNOWN
        } else {
            devices
                .get(index as usize - 1)
                .map(|d| d.id)
                .ok_or(EngineError::DeviceNotFound)?
        };
        self.modify_engine_state(Box::new(move |mut s| {
            match side {
                DefaultDeviceSide::Output => s.output_device_id = id,
                DefaultDeviceSide::Input => s.input_device_id = id,
            }
            s
        }))
        .await
    }

    fn refresh_device_lists(&mut self) {
        self.output_devices = self.platform.output_devices();
        self.input_devices = self.platform.input_devices();
    }

    async fn handle_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::DeviceListChanged => self.handle_device_list_changed().await,
            PlatformEvent::DefaultOutputChanged => {
                self.schedule_default_device_update(DefaultDeviceSide::Output);
            }
            PlatformEvent::DefaultInputChanged => {
                self.schedule_default_device_update(DefaultDeviceSide::Input);
            }
            PlatformEvent::InterruptionBegan => {
                if let Err(err) = self
                    .modify_engine_state(Box::new(|mut s| {
                        s.is_interrupted = true;
                        s
                    }))
                    .await
                {
                    warn!(code = err.code(), %err, "interruption-begin update failed");
                }
            }
            PlatformEvent::InterruptionEnded { should_resume } => {
                debug!(should_resume, "interruption ended");
                if let Err(err) = self
                    .modify_engine_state(Box::new(|mut s| {
                        s.is_interrupted = false;
                        s
                    }))
                    .await
                {
                    warn!(code = err.code(), %err, "interruption-end update failed");
                }
            }
        }
    }

    async fn handle_device_list_changed(&mut self) {
        self.refresh_device_lists();

        let state = self.state;
        let input_missing = !state.input_device_id.is_unknown()
            && !self
                .input_devices
                .iter()
                .any(|d| d.id == state.input_device_id);
        let output_missing = !state.output_device_id.is_unknown()
            && !self
                .output_devices
                .iter()
                .any(|d| d.id == state.output_device_id);

        if input_missing || output_missing {
            info!(
                input_missing,
                output_missing, "selected device disappeared, falling back to default"
            );
            if let Err(err) = self
                .modify_engine_state(Box::new(move |mut s| {
                    if input_missing {
                        s.input_device_id = DeviceId::UNKNOWN;
                    }
                    if output_missing {
                        s.output_device_id = DeviceId::UNKNOWN;
                    }
                    s
                }))
                .await
            {
                warn!(code = err.code(), %err, "device fallback update failed");
            }
        }

        self.observer.on_devices_updated();
    }

    /// Debounce default-device churn: each event invalidates the previous
    /// pending update and schedules a fresh one, so only the last event in a
    /// window takes effect.
    fn schedule_default_device_update(&mut self, side: DefaultDeviceSide) {
        let slot = match side {
            DefaultDeviceSide::Output => &mut self.output_debounce,
            DefaultDeviceSide::Input => &mut self.input_debounce,
        };
        slot.cancel();
        let token = self.safety.child_token();
        *slot = token.clone();

        let tx = self.tx.clone();
        let delay = self.config.default_device_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if token.is_cancelled() {
                return;
            }
            let _ = tx.send(EngineCommand::BumpDefaultDeviceCounter { side });
        });
    }

    async fn bump_default_device_counter(&mut self, side: DefaultDeviceSide) {
        debug!(?side, "default device changed");
        let result = self
            .modify_engine_state(Box::new(move |mut s| {
                match side {
                    DefaultDeviceSide::Output => {
                        s.default_output_device_update_count =
                            s.default_output_device_update_count.wrapping_add(1);
                    }
                    DefaultDeviceSide::Input => {
                        s.default_input_device_update_count =
                            s.default_input_device_update_count.wrapping_add(1);
                    }
                }
                s
            }))
            .await;
        if let Err(err) = result {
            warn!(code = err.code(), %err, "default-device update failed");
        }
    }

    /// The host reconfigured the graph. Only a spontaneous stop is acted on:
    /// tear down to all-off, then re-apply the committed state.
    async fn handle_configuration_change(&mut self) {
        if self.state.render_mode != RenderMode::Device {
            // Stale notification from a released device engine.
            return;
        }
        let running = self
            .engine_device
            .as_ref()
            .map(|e| e.is_running())
            .unwrap_or(false);
        if running {
            debug!("configuration change while running, ignored");
            return;
        }
        if !self.state.is_any_running() {
            return;
        }

        info!("engine stopped on configuration change, reconfiguring");
        let snapshot = self.state;
        let all_off = EngineState {
            output_available: snapshot.output_available,
            input_available: snapshot.input_available,
            ..EngineState::default()
        };
        if let Err(err) = self.modify_engine_state(Box::new(move |_| all_off)).await {
            warn!(code = err.code(), %err, "reconfigure teardown failed");
            return;
        }
        if let Err(err) = self.modify_engine_state(Box::new(move |_| snapshot)).await {
            warn!(code = err.code(), %err, "reconfigure restore failed");
        }
    }
}
