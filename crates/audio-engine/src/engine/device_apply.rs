//! Device-mode applier.
//!
//! Walks a state diff through a fixed sequence of guarded steps against the
//! device-clocked engine object. The order is imposed by the platform (the
//! engine must be stopped before re-wiring, buffers stopped before node
//! teardown, devices bound before start) and must not be changed.
//!
//! Each successful step that needs compensation pushes a rollback entry;
//! the first failing step unwinds the list in reverse and the error is
//! returned with the committed state untouched.

use tracing::{debug, error, warn};

use crate::error::{EngineError, EngineResult};
use crate::format::Float32ToInt16Converter;
use crate::graph::{GraphNode, SinkDataCallback};
use crate::observer::InputConnectContext;
use crate::state::EngineStateUpdate;
use crate::types::{AudioFormat, MuteMode};

use super::{observer_rc, EngineCommand, EngineCore};

/// Compensating action recorded after a successful step.
pub(super) enum RollbackStep {
    ReleaseEngine,
    DetachSourceNode,
    DetachSinkNode,
    DetachInputMixerNode,
    StartPlayoutBuffer,
    StopPlayoutBuffer,
    StartRecordingBuffer,
    StopRecordingBuffer,
}

impl EngineCore {
    /// Apply a diff while rendering through a real audio device.
    pub(super) async fn apply_device_engine_state(
        &mut self,
        update: EngineStateUpdate,
    ) -> EngineResult<()> {
        let mut rollback: Vec<RollbackStep> = Vec::new();
        match self.device_apply_steps(&update, &mut rollback).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    code = err.code(),
                    %err,
                    compensations = rollback.len(),
                    "device transition failed, rolling back"
                );
                self.unwind_device_rollback(rollback);
                Err(err)
            }
        }
    }

    async fn device_apply_steps(
        &mut self,
        update: &EngineStateUpdate,
        rollback: &mut Vec<RollbackStep>,
    ) -> EngineResult<()> {
        let prev = update.prev;
        let next = update.next;
        let observer = self.observer.clone();
        let tx = self.tx.clone();
        let safety = self.safety.clone();
        let device_selection = self.platform.supports_device_selection();
        let converter_capacity = self.config.manual_render_max_frames as usize;

        // 1. Stop the engine before anything that requires it to be idle.
        let engine_was_running = self
            .engine_device
            .as_ref()
            .map(|e| e.is_running())
            .unwrap_or(false);
        if engine_was_running
            && (!next.is_any_running()
                || update.is_engine_restart_required()
                || update.did_begin_interruption()
                || update.is_engine_recreate_required())
        {
            if let Some(engine) = self.engine_device.as_mut() {
                engine.set_configuration_change_callback(None);
                engine.stop();
                debug!("engine stopped");
                observer_rc(observer.on_engine_did_stop(
                    engine.as_mut(),
                    prev.output_running,
                    prev.input_running,
                ))?;
            }
        }

        // 2. Discard the engine object when a recreate is required.
        if update.is_engine_recreate_required() {
            if let Some(mut engine) = self.engine_device.take() {
                let rc = observer.on_engine_will_release(engine.as_mut());
                if rc != 0 {
                    self.engine_device = Some(engine);
                    return Err(EngineError::ObserverRejected { code: rc });
                }
                self.source_node = None;
                self.sink_node = None;
                self.input_mixer_node = None;
                debug!("engine released for recreate");
            }
        }

        // 3. Create a fresh engine object.
        if next.is_any_enabled()
            && (!prev.is_any_enabled() || update.is_engine_recreate_required())
            && self.engine_device.is_none()
        {
            let mut engine = self.backend.create_graph()?;
            observer_rc(observer.on_engine_did_create(engine.as_mut()))?;
            self.engine_device = Some(engine);
            rollback.push(RollbackStep::ReleaseEngine);
            debug!("engine created");
        }

        // 4. Stop the playout buffer; the engine is already stopped.
        if update.did_disable_output() && self.device_buffer.is_playing() {
            self.device_buffer.stop_playout();
            rollback.push(RollbackStep::StartPlayoutBuffer);
        }

        // 5. Stop the recording buffer.
        if update.did_disable_input() && self.device_buffer.is_recording() {
            self.device_buffer.stop_recording();
            rollback.push(RollbackStep::StartRecordingBuffer);
        }

        // 6. The audio session must be configured before any node is wired.
        if update.did_any_enable() {
            if let Some(engine) = self.engine_device.as_mut() {
                observer_rc(observer.on_engine_will_enable(
                    engine.as_mut(),
                    next.output_enabled,
                    next.input_enabled,
                ))?;
            }
        }

        // 7. Align the input node's voice-processing flag with the request.
        if next.is_input_enabled() {
            if let Some(engine) = self.engine_device.as_mut() {
                if engine.voice_processing_enabled() != next.voice_processing_enabled {
                    engine
                        .set_voice_processing_enabled(next.voice_processing_enabled)
                        .map_err(|err| EngineError::VoiceProcessingFailure {
                            reason: err.to_string(),
                        })?;
                    if next.voice_processing_enabled {
                        if next.mute_mode == MuteMode::RestartEngine {
                            engine.set_voice_processing_input_muted(false);
                        }
                        let tx = tx.clone();
                        let safety = safety.clone();
                        engine.set_speech_activity_callback(Some(Box::new(move |event| {
                            if safety.is_cancelled() {
                                return;
                            }
                            let _ = tx.send(EngineCommand::SpeechActivity { event });
                        })));
                    }
                }
            }
        }

        // 8. Build the output side.
        if update.did_enable_output()
            || (update.is_engine_recreate_required() && next.is_output_enabled())
        {
            let Some(engine) = self.engine_device.as_mut() else {
                return Err(EngineError::StateTransitionRejected {
                    reason: "output enable without an engine object".to_string(),
                });
            };
            let hardware = engine.output_hardware_format();
            if !hardware.is_valid() {
                warn!(%hardware, "output hardware format unusable");
                return Err(EngineError::PlayoutDeviceNotAvailable);
            }
            let engine_format = AudioFormat::float32(hardware.sample_rate, 1);
            self.device_buffer
                .set_playout_format(hardware.sample_rate, 1);
            self.fine_buffer.reset_playout();

            // The source renders Int16 at the hardware rate; the graph
            // up-converts to its float format.
            let rtc_format = AudioFormat::int16(hardware.sample_rate, 1);
            let fine = self.fine_buffer.clone();
            let source = engine.attach_source_node(
                &rtc_format,
                Box::new(move |dst| fine.get_playout_data(dst)),
            )?;
            self.source_node = Some(source);
            rollback.push(RollbackStep::DetachSourceNode);

            observer_rc(observer.on_engine_will_connect_output(
                engine.as_mut(),
                GraphNode::MainMixer,
                GraphNode::OutputNode,
                &engine_format,
            ))?;
            engine.connect(source, GraphNode::MainMixer, &engine_format)?;
            engine.connect(GraphNode::MainMixer, GraphNode::OutputNode, &engine_format)?;
            debug!(%engine_format, "output side connected");
        }

        // 9. Tear the output side down.
        if update.did_disable_output() {
            if let Some(engine) = self.engine_device.as_mut() {
                if let Some(node) = self.source_node.take() {
                    match engine.detach_node(node) {
                        Ok(()) => {}
                        Err(err) if err.is_recoverable() => {
                            warn!(?node, "source node was not attached")
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        // 10. Build the input side.
        if update.did_enable_input()
            || (update.is_engine_recreate_required() && next.is_input_enabled())
        {
            let Some(engine) = self.engine_device.as_mut() else {
                return Err(EngineError::StateTransitionRejected {
                    reason: "input enable without an engine object".to_string(),
                });
            };
            let hardware = engine.input_hardware_format();
            if !hardware.is_valid() {
                warn!(%hardware, "input hardware format unusable");
                return Err(EngineError::RecordingDeviceNotAvailable);
            }
            let mixer = engine.attach_mixer_node()?;
            self.input_mixer_node = Some(mixer);
            rollback.push(RollbackStep::DetachInputMixerNode);

            let engine_format = AudioFormat::float32(hardware.sample_rate, 1);
            self.device_buffer
                .set_recording_format(hardware.sample_rate, 1);
            self.fine_buffer.reset_record();

            let mut converter = match Float32ToInt16Converter::new(converter_capacity) {
                Ok(converter) => converter,
                Err(err) => {
                    error!(code = err.code(), %err, "converter construction failed");
                    debug_assert!(false, "converter construction failed");
                    return Err(err);
                }
            };
            let fine = self.fine_buffer.clone();
            let receive: SinkDataCallback = Box::new(move |samples, capture_timestamp_ns| {
                let converted = converter.convert(samples);
                fine.deliver_recorded_data(converted, capture_timestamp_ns);
            });

            let context = InputConnectContext {
                input_mixer_node: Some(mixer),
            };
            observer_rc(observer.on_engine_will_connect_input(
                engine.as_mut(),
                Some(GraphNode::InputNode),
                mixer,
                &engine_format,
                &context,
            ))?;
            // The observer may have wired its own taps into the mixer.
            if !engine.has_inputs(mixer) {
                engine.connect(GraphNode::InputNode, mixer, &engine_format)?;
            }
            let sink = engine.attach_sink_node(&engine_format, receive)?;
            self.sink_node = Some(sink);
            rollback.push(RollbackStep::DetachSinkNode);
            engine.connect(mixer, sink, &engine_format)?;
            debug!(%engine_format, "input side connected");
        }

        // 11. Tear the input side down. The converter is dropped with the
        // sink node's callback.
        if update.did_disable_input() {
            if let Some(engine) = self.engine_device.as_mut() {
                engine.set_voice_processing_input_muted(false);
                for node in [self.input_mixer_node.take(), self.sink_node.take()]
                    .into_iter()
                    .flatten()
                {
                    match engine.detach_node(node) {
                        Ok(()) => {}
                        Err(err) if err.is_recoverable() => {
                            warn!(?node, "input node was not attached")
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        // 12. Node teardown finished.
        if update.did_any_disable() {
            if let Some(engine) = self.engine_device.as_mut() {
                observer_rc(observer.on_engine_did_disable(
                    engine.as_mut(),
                    next.output_enabled,
                    next.input_enabled,
                ))?;
            }
        }

        // 13. Runtime mute, no graph rewire. RestartEngine muting already
        // folded into the enable predicates and was handled above.
        if next.is_input_enabled() {
            if let Some(engine) = self.engine_device.as_mut() {
                match next.mute_mode {
                    MuteMode::VoiceProcessing => {
                        engine.set_voice_processing_input_muted(next.input_muted);
                    }
                    MuteMode::InputMixer => {
                        if let Some(mixer) = self.input_mixer_node {
                            let volume = if next.input_muted { 0.0 } else { 1.0 };
                            engine.set_mixer_output_volume(mixer, volume);
                        }
                    }
                    MuteMode::RestartEngine => {}
                }
            }
        }

        // 14. Ducking configuration.
        let ducking_changed = prev.advanced_ducking != next.advanced_ducking
            || prev.ducking_level != next.ducking_level;
        if next.is_input_enabled()
            && next.voice_processing_enabled
            && (update.did_enable_input() || ducking_changed)
        {
            if let Some(engine) = self.engine_device.as_mut() {
                engine.set_ducking(next.advanced_ducking, next.ducking_level);
            }
        }

        // 15. Bypass and AGC, set only when differing.
        if next.is_input_enabled() && next.voice_processing_enabled {
            if let Some(engine) = self.engine_device.as_mut() {
                if engine.voice_processing_bypassed() != next.voice_processing_bypassed {
                    engine.set_voice_processing_bypassed(next.voice_processing_bypassed);
                }
                if engine.agc_enabled() != next.voice_processing_agc_enabled {
                    engine.set_agc_enabled(next.voice_processing_agc_enabled);
                }
            }
        }

        // 16. Bind concrete devices; the system default stays in effect for
        // sentinel selections.
        if device_selection && (update.did_any_enable() || update.is_engine_recreate_required()) {
            if let Some(engine) = self.engine_device.as_mut() {
                if next.is_output_enabled() && !next.is_output_default_device() {
                    engine.bind_output_device(next.output_device_id)?;
                }
                if next.is_input_enabled() && !next.is_input_default_device() {
                    engine.bind_input_device(next.input_device_id)?;
                }
            }
        }

        // 17. Start the playout buffer.
        if next.is_output_enabled() && !self.device_buffer.is_playing() {
            self.fine_buffer.reset_playout();
            self.device_buffer.start_playout();
            rollback.push(RollbackStep::StopPlayoutBuffer);
        }

        // 18. Start the recording buffer.
        if next.is_input_enabled() && !self.device_buffer.is_recording() {
            self.fine_buffer.reset_record();
            self.device_buffer.start_recording();
            rollback.push(RollbackStep::StopRecordingBuffer);
        }

        // 19. Start the engine. Never while interrupted: interruption-end
        // restarts exactly what was enabled.
        if next.is_any_running()
            && !next.is_interrupted
            && (!prev.is_any_running()
                || update.did_end_interruption()
                || update.is_engine_restart_required()
                || update.is_engine_recreate_required())
        {
            let Some(engine) = self.engine_device.as_mut() else {
                return Err(EngineError::StateTransitionRejected {
                    reason: "start without an engine object".to_string(),
                });
            };
            observer_rc(observer.on_engine_will_start(
                engine.as_mut(),
                next.output_running,
                next.input_running,
            ))?;

            if device_selection {
                // Settle after prepare; an immediate start can fail while
                // another process still holds voice processing.
                engine.prepare();
                tokio::time::sleep(self.config.prepare_settle_delay).await;
            }

            let attempts = self.config.start_retry_count.max(1);
            let mut started = false;
            for attempt in 1..=attempts {
                match engine.start() {
                    Ok(()) => {
                        started = true;
                        break;
                    }
                    Err(err) => {
                        warn!(attempt, code = err.code(), %err, "engine start failed");
                        if attempt < attempts {
                            tokio::time::sleep(self.config.start_retry_delay).await;
                        }
                    }
                }
            }
            if !started {
                error!(
                    graph = %engine.debug_description(),
                    "engine failed to start after retries"
                );
                return Err(EngineError::StartFailedAfterRetries { attempts });
            }

            let tx = tx.clone();
            let safety = safety.clone();
            engine.set_configuration_change_callback(Some(Box::new(move || {
                if safety.is_cancelled() {
                    return;
                }
                let _ = tx.send(EngineCommand::ConfigurationChange);
            })));
            debug!("engine started");
        }

        // 20. Release the engine object once nothing needs it.
        if !next.is_any_enabled() {
            if let Some(mut engine) = self.engine_device.take() {
                let rc = observer.on_engine_will_release(engine.as_mut());
                if rc != 0 {
                    self.engine_device = Some(engine);
                    return Err(EngineError::ObserverRejected { code: rc });
                }
                self.source_node = None;
                self.sink_node = None;
                self.input_mixer_node = None;
                debug!("engine released");
            }
        }

        Ok(())
    }

    fn unwind_device_rollback(&mut self, mut rollback: Vec<RollbackStep>) {
        while let Some(step) = rollback.pop() {
            match step {
                RollbackStep::ReleaseEngine => {
                    self.source_node = None;
                    self.sink_node = None;
                    self.input_mixer_node = None;
                    self.engine_device = None;
                }
                RollbackStep::DetachSourceNode => {
                    Self::rollback_detach(&mut self.engine_device, self.source_node.take());
                }
                RollbackStep::DetachSinkNode => {
                    Self::rollback_detach(&mut self.engine_device, self.sink_node.take());
                }
                RollbackStep::DetachInputMixerNode => {
                    Self::rollback_detach(&mut self.engine_device, self.input_mixer_node.take());
                }
                RollbackStep::StartPlayoutBuffer => self.device_buffer.start_playout(),
                RollbackStep::StopPlayoutBuffer => self.device_buffer.stop_playout(),
                RollbackStep::StartRecordingBuffer => self.device_buffer.start_recording(),
                RollbackStep::StopRecordingBuffer => self.device_buffer.stop_recording(),
            }
        }
    }

    fn rollback_detach(
        engine: &mut Option<Box<dyn crate::graph::AudioGraph>>,
        node: Option<GraphNode>,
    ) {
        if let (Some(engine), Some(node)) = (engine.as_mut(), node) {
            if let Err(err) = engine.detach_node(node) {
                warn!(?node, code = err.code(), %err, "rollback detach failed");
            }
        }
    }
}
