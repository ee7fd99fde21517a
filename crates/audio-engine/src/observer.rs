//! Engine lifecycle observer.
//!
//! The observer is the caller-supplied collaborator that rides along every
//! engine transition. It is a flat interface of plain function entries: the
//! `on_engine_*` hooks return an integer, 0 for success, and any non-zero
//! value vetoes the transition — the applier rolls back and surfaces the
//! code unchanged.
//!
//! Callbacks are invoked synchronously on the control task. The `engine`
//! argument is the live graph object, so `on_engine_will_connect_input` may
//! attach and wire custom tap nodes before the engine applies its default
//! wiring.

use crate::graph::{AudioGraph, GraphNode};
use crate::types::{AudioFormat, SpeechActivityEvent};

/// Context passed to [`AudioEngineObserver::on_engine_will_connect_input`].
#[derive(Debug, Clone, Copy)]
pub struct InputConnectContext {
    /// The input mixer node the engine will wire into, when one exists.
    pub input_mixer_node: Option<GraphNode>,
}

/// Observer of engine lifecycle events.
///
/// Every hook has a no-op default so implementations only override what they
/// need. The boolean pairs are the raw playout/recording intent flags of the
/// state driving the transition.
#[allow(unused_variables)]
pub trait AudioEngineObserver: Send + Sync {
    /// The set of available devices changed (desktop only).
    fn on_devices_updated(&self) {}

    /// Voice activity was detected on a muted input.
    fn on_speech_activity_event(&self, event: SpeechActivityEvent) {}

    /// A fresh engine object was created.
    fn on_engine_did_create(&self, engine: &mut dyn AudioGraph) -> i32 {
        0
    }

    /// Fired before node configuration, so the host audio session can be
    /// configured first.
    fn on_engine_will_enable(
        &self,
        engine: &mut dyn AudioGraph,
        playout_enabled: bool,
        recording_enabled: bool,
    ) -> i32 {
        0
    }

    /// Fired immediately before the engine object is started.
    fn on_engine_will_start(
        &self,
        engine: &mut dyn AudioGraph,
        playout_running: bool,
        recording_running: bool,
    ) -> i32 {
        0
    }

    /// Fired after the engine object stopped.
    fn on_engine_did_stop(
        &self,
        engine: &mut dyn AudioGraph,
        playout_running: bool,
        recording_running: bool,
    ) -> i32 {
        0
    }

    /// Fired after node teardown.
    fn on_engine_did_disable(
        &self,
        engine: &mut dyn AudioGraph,
        playout_enabled: bool,
        recording_enabled: bool,
    ) -> i32 {
        0
    }

    /// Fired before the engine object is dropped.
    fn on_engine_will_release(&self, engine: &mut dyn AudioGraph) -> i32 {
        0
    }

    /// Fired before the engine applies its default input wiring. `source` is
    /// the hardware input node (absent in manual mode) and `destination` the
    /// node the engine will feed; the observer may connect its own nodes
    /// between them, in which case the engine skips the default connection.
    fn on_engine_will_connect_input(
        &self,
        engine: &mut dyn AudioGraph,
        source: Option<GraphNode>,
        destination: GraphNode,
        format: &AudioFormat,
        context: &InputConnectContext,
    ) -> i32 {
        0
    }

    /// Fired before the engine applies its default output wiring.
    fn on_engine_will_connect_output(
        &self,
        engine: &mut dyn AudioGraph,
        source: GraphNode,
        destination: GraphNode,
        format: &AudioFormat,
    ) -> i32 {
        0
    }
}

/// Observer that accepts everything and observes nothing.
pub struct NoopObserver;

impl AudioEngineObserver for NoopObserver {}
