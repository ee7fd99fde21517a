//! Manual-mode applier.
//!
//! Simpler than the device path: there is no hardware to negotiate with, so
//! the engine runs a fixed Int16 mono format and a dedicated render thread
//! stands in for the device clock. Failures return without compensation; the
//! committed state is untouched either way.

use tracing::{debug, error};

use crate::error::{EngineError, EngineResult};
use crate::graph::GraphNode;
use crate::observer::InputConnectContext;
use crate::state::EngineStateUpdate;
use crate::types::AudioFormat;

use super::render_loop::RenderLoop;
use super::{observer_rc, EngineCore};

impl EngineCore {
    /// Apply a diff while rendering through the caller-driven render loop.
    pub(super) fn apply_manual_engine_state(
        &mut self,
        update: EngineStateUpdate,
    ) -> EngineResult<()> {
        let prev = update.prev;
        let next = update.next;
        let observer = self.observer.clone();
        let manual_format = AudioFormat::int16(
            self.config.manual_render_sample_rate,
            crate::defaults::MANUAL_RENDER_CHANNELS,
        );
        let max_frames = self.config.manual_render_max_frames;

        // 1. Stop the engine and join the render thread. The render and
        // read buffers are owned by the loop and released with it.
        if prev.is_any_running() && !next.is_any_running() {
            if let Some(engine) = self.engine_manual.as_mut() {
                engine.stop();
            }
            if let Some(render_loop) = self.render_loop.take() {
                render_loop.stop();
            }
            if let Some(engine) = self.engine_manual.as_mut() {
                observer_rc(observer.on_engine_did_stop(
                    engine.as_mut(),
                    prev.output_running,
                    prev.input_running,
                ))?;
            }
            debug!("manual engine stopped");
        }

        // 2. Create the manual engine and put it into realtime manual
        // rendering before anything touches the graph.
        if !prev.is_any_enabled() && next.is_any_enabled() && self.engine_manual.is_none() {
            let mut engine = self.backend.create_graph()?;
            if let Err(err) = engine.enable_manual_rendering(&manual_format, max_frames) {
                error!(code = err.code(), %err, "manual rendering configuration failed");
                debug_assert!(false, "manual rendering configuration failed");
                return Err(err);
            }
            observer_rc(observer.on_engine_did_create(engine.as_mut()))?;
            self.engine_manual = Some(engine);
            debug!(%manual_format, max_frames, "manual engine created");
        }

        // 3. Stop buffers for sides going away.
        if update.did_disable_output() && self.device_buffer.is_playing() {
            self.device_buffer.stop_playout();
        }
        if update.did_disable_input() && self.device_buffer.is_recording() {
            self.device_buffer.stop_recording();
        }

        // 4.
        if update.did_any_enable() {
            if let Some(engine) = self.engine_manual.as_mut() {
                observer_rc(observer.on_engine_will_enable(
                    engine.as_mut(),
                    next.output_enabled,
                    next.input_enabled,
                ))?;
            }
        }

        // 5. Output side is just buffer bookkeeping in manual mode.
        if update.did_enable_output() {
            self.device_buffer
                .set_playout_format(manual_format.sample_rate, manual_format.channels);
            self.fine_buffer.reset_playout();
        }

        // 6. Input side: the main mixer is the nominal capture point; the
        // observer may wire taps into it before the default connection.
        if update.did_enable_input() {
            self.device_buffer
                .set_recording_format(manual_format.sample_rate, manual_format.channels);
            self.fine_buffer.reset_record();
            if let Some(engine) = self.engine_manual.as_mut() {
                let context = InputConnectContext {
                    input_mixer_node: None,
                };
                observer_rc(observer.on_engine_will_connect_input(
                    engine.as_mut(),
                    None,
                    GraphNode::MainMixer,
                    &manual_format,
                    &context,
                ))?;
                engine.connect(GraphNode::MainMixer, GraphNode::OutputNode, &manual_format)?;
            }
        }

        // 7.
        if update.did_any_disable() {
            if let Some(engine) = self.engine_manual.as_mut() {
                observer_rc(observer.on_engine_did_disable(
                    engine.as_mut(),
                    next.output_enabled,
                    next.input_enabled,
                ))?;
            }
        }

        // 8. Start buffers.
        if next.is_output_enabled() && !self.device_buffer.is_playing() {
            self.device_buffer.start_playout();
        }
        if next.is_input_enabled() && !self.device_buffer.is_recording() {
            self.device_buffer.start_recording();
        }

        // 9. Start the engine, capture its render block, spawn the render
        // thread.
        if !prev.is_any_running() && next.is_any_running() {
            let Some(engine) = self.engine_manual.as_mut() else {
                return Err(EngineError::StateTransitionRejected {
                    reason: "manual start without an engine object".to_string(),
                });
            };
            observer_rc(observer.on_engine_will_start(
                engine.as_mut(),
                next.output_running,
                next.input_running,
            ))?;
            engine
                .start()
                .map_err(|err| EngineError::ManualRenderingFailure {
                    reason: err.to_string(),
                })?;
            let block = engine.manual_render_block();
            let render_loop = RenderLoop::spawn(
                block,
                self.fine_buffer.clone(),
                manual_format,
                max_frames,
                self.epoch,
            )?;
            self.render_loop = Some(render_loop);
            debug!("manual engine started, render loop running");
        }

        // 10. Release the engine once nothing needs it.
        if !next.is_any_enabled() {
            if let Some(mut engine) = self.engine_manual.take() {
                let rc = observer.on_engine_will_release(engine.as_mut());
                if rc != 0 {
                    self.engine_manual = Some(engine);
                    return Err(EngineError::ObserverRejected { code: rc });
                }
                debug!("manual engine released");
            }
        }

        Ok(())
    }
}
