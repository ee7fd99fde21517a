//! Engine state and state-transition diffs.
//!
//! [`EngineState`] is the single authority for every externally settable
//! knob. It is a plain value: the control task snapshots it, runs a caller
//! transform, and diffs the pair with [`EngineStateUpdate`] to decide which
//! graph operations are required. Derived predicates are recomputed on every
//! call, never cached.

use crate::types::{DeviceId, MuteMode, RenderMode};

/// Every externally settable engine knob plus the derived predicates the
/// appliers act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineState {
    /// Input side requested (recording initialized).
    pub input_enabled: bool,
    /// Input side running (recording started).
    pub input_running: bool,
    /// Output side requested (playout initialized).
    pub output_enabled: bool,
    /// Output side running (playout started).
    pub output_running: bool,

    /// Output hardware is usable. Gates every derived output predicate.
    pub output_available: bool,
    /// Input hardware is usable. Gates every derived input predicate.
    pub input_available: bool,

    /// When true and voice processing is on, enabling input implicitly
    /// forces output on as well (the platform ties them together).
    pub input_follow_mode: bool,
    /// Keep the input graph initialized across stop/start cycles.
    pub input_enabled_persistent_mode: bool,

    /// Microphone muted, interpreted through [`EngineState::mute_mode`].
    pub input_muted: bool,
    /// An OS audio-session interruption is in progress.
    pub is_interrupted: bool,

    /// Device-clocked or caller-driven rendering.
    pub render_mode: RenderMode,
    /// Which mechanism `input_muted` uses.
    pub mute_mode: MuteMode,

    /// Platform voice processing (echo cancellation + noise suppression) on
    /// the input node.
    pub voice_processing_enabled: bool,
    /// Voice processing attached but bypassed.
    pub voice_processing_bypassed: bool,
    /// Automatic gain control inside voice processing.
    pub voice_processing_agc_enabled: bool,

    /// Advanced ducking of other audio while the input is active.
    pub advanced_ducking: bool,
    /// Ducking level; 0 selects the platform default.
    pub ducking_level: i64,

    /// Selected output device; [`DeviceId::UNKNOWN`] follows the system
    /// default.
    pub output_device_id: DeviceId,
    /// Selected input device; [`DeviceId::UNKNOWN`] follows the system
    /// default.
    pub input_device_id: DeviceId,

    /// Bumped whenever the OS reports a new system-default output device.
    pub default_output_device_update_count: u32,
    /// Bumped whenever the OS reports a new system-default input device.
    pub default_input_device_update_count: u32,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            input_enabled: false,
            input_running: false,
            output_enabled: false,
            output_running: false,
            output_available: true,
            input_available: true,
            input_follow_mode: true,
            input_enabled_persistent_mode: false,
            input_muted: true,
            is_interrupted: false,
            render_mode: RenderMode::Device,
            mute_mode: MuteMode::VoiceProcessing,
            voice_processing_enabled: true,
            voice_processing_bypassed: false,
            voice_processing_agc_enabled: true,
            advanced_ducking: true,
            ducking_level: 0,
            output_device_id: DeviceId::UNKNOWN,
            input_device_id: DeviceId::UNKNOWN,
            default_output_device_update_count: 0,
            default_input_device_update_count: 0,
        }
    }
}

impl EngineState {
    /// Output enablement follows input enablement (the platform ties the two
    /// sides together while voice processing is active).
    pub fn is_output_input_linked(&self) -> bool {
        self.input_follow_mode && self.voice_processing_enabled
    }

    /// Whether the output side of the graph should exist.
    pub fn is_output_enabled(&self) -> bool {
        let result = if self.is_output_input_linked() {
            self.is_input_enabled() || self.output_enabled
        } else {
            self.output_enabled
        };
        self.output_available && result
    }

    /// Whether the output side should be running.
    pub fn is_output_running(&self) -> bool {
        let result = if self.is_output_input_linked() {
            self.is_input_running() || self.output_running
        } else {
            self.output_running
        };
        self.output_available && result
    }

    /// Whether the input side of the graph should exist. Muting with
    /// [`MuteMode::RestartEngine`] folds into this predicate: a muted input
    /// is treated as not enabled at all.
    pub fn is_input_enabled(&self) -> bool {
        let result = !(self.mute_mode == MuteMode::RestartEngine && self.input_muted)
            && (self.input_enabled || self.input_enabled_persistent_mode);
        self.input_available && result
    }

    /// Whether the input side should be running.
    pub fn is_input_running(&self) -> bool {
        let result =
            !(self.mute_mode == MuteMode::RestartEngine && self.input_muted) && self.input_running;
        self.input_available && result
    }

    /// Either side enabled.
    pub fn is_any_enabled(&self) -> bool {
        self.is_input_enabled() || self.is_output_enabled()
    }

    /// Either side running.
    pub fn is_any_running(&self) -> bool {
        self.is_input_running() || self.is_output_running()
    }

    /// Both sides enabled.
    pub fn is_all_enabled(&self) -> bool {
        self.is_input_enabled() && self.is_output_enabled()
    }

    /// Both sides running.
    pub fn is_all_running(&self) -> bool {
        self.is_input_running() && self.is_output_running()
    }

    /// The output selection follows the system default.
    pub fn is_output_default_device(&self) -> bool {
        self.output_device_id.is_unknown()
    }

    /// The input selection follows the system default.
    pub fn is_input_default_device(&self) -> bool {
        self.input_device_id.is_unknown()
    }
}

/// A `{prev, next}` state pair with predicates classifying the transition.
#[derive(Debug, Clone, Copy)]
pub struct EngineStateUpdate {
    /// State before the transition.
    pub prev: EngineState,
    /// Requested state.
    pub next: EngineState,
}

impl EngineStateUpdate {
    /// Build a diff.
    pub fn new(prev: EngineState, next: EngineState) -> Self {
        Self { prev, next }
    }

    /// The transform was a no-op.
    pub fn has_no_changes(&self) -> bool {
        self.prev == self.next
    }

    /// The output side goes from disabled to enabled.
    pub fn did_enable_output(&self) -> bool {
        !self.prev.is_output_enabled() && self.next.is_output_enabled()
    }

    /// The input side goes from disabled to enabled.
    pub fn did_enable_input(&self) -> bool {
        !self.prev.is_input_enabled() && self.next.is_input_enabled()
    }

    /// The output side goes from enabled to disabled.
    pub fn did_disable_output(&self) -> bool {
        self.prev.is_output_enabled() && !self.next.is_output_enabled()
    }

    /// The input side goes from enabled to disabled.
    pub fn did_disable_input(&self) -> bool {
        self.prev.is_input_enabled() && !self.next.is_input_enabled()
    }

    /// Either side becomes enabled.
    pub fn did_any_enable(&self) -> bool {
        self.did_enable_output() || self.did_enable_input()
    }

    /// Either side becomes disabled.
    pub fn did_any_disable(&self) -> bool {
        self.did_disable_output() || self.did_disable_input()
    }

    /// An interruption starts with this update.
    pub fn did_begin_interruption(&self) -> bool {
        !self.prev.is_interrupted && self.next.is_interrupted
    }

    /// An interruption ends with this update.
    pub fn did_end_interruption(&self) -> bool {
        self.prev.is_interrupted && !self.next.is_interrupted
    }

    /// The set of graph nodes required changes with this update.
    pub fn did_update_audio_graph(&self) -> bool {
        (self.prev.is_input_enabled() != self.next.is_input_enabled())
            || (self.prev.is_output_enabled() != self.next.is_output_enabled())
    }

    /// Voice processing is toggled.
    pub fn did_update_voice_processing_enabled(&self) -> bool {
        self.prev.voice_processing_enabled != self.next.voice_processing_enabled
    }

    /// The output device selection changed.
    pub fn did_update_output_device(&self) -> bool {
        self.prev.output_device_id != self.next.output_device_id
    }

    /// The input device selection changed.
    pub fn did_update_input_device(&self) -> bool {
        self.prev.input_device_id != self.next.input_device_id
    }

    /// The OS default output device moved.
    pub fn did_update_default_output_device(&self) -> bool {
        self.prev.default_output_device_update_count != self.next.default_output_device_update_count
    }

    /// The OS default input device moved.
    pub fn did_update_default_input_device(&self) -> bool {
        self.prev.default_input_device_update_count != self.next.default_input_device_update_count
    }

    /// The muting mechanism changed.
    pub fn did_update_mute_mode(&self) -> bool {
        self.prev.mute_mode != self.next.mute_mode
    }

    /// The engine must be stopped, re-wired, and restarted (same object).
    pub fn is_engine_restart_required(&self) -> bool {
        self.did_update_audio_graph() || self.did_update_voice_processing_enabled()
    }

    /// The engine object must be discarded and rebuilt.
    pub fn is_engine_recreate_required(&self) -> bool {
        // Device id specified
        let device = self.did_update_output_device() || self.did_update_input_device();

        // Default device updated while the selection follows the default
        let default_device = (self.did_update_default_output_device()
            && self.next.is_output_default_device())
            || (self.did_update_default_input_device() && self.next.is_input_default_device());

        // Special case: the node graph cannot reliably drop input-side nodes
        // in place when going from output+input to output only.
        let special_case = (self.prev.is_output_enabled() && self.next.is_output_enabled())
            && (self.prev.is_input_enabled() && !self.next.is_input_enabled());

        device || default_device || special_case
    }

    /// Switches into manual rendering mode.
    pub fn did_enable_manual_rendering_mode(&self) -> bool {
        self.prev.render_mode != RenderMode::Manual && self.next.render_mode == RenderMode::Manual
    }

    /// Switches into device rendering mode.
    pub fn did_enable_device_rendering_mode(&self) -> bool {
        self.prev.render_mode != RenderMode::Device && self.next.render_mode == RenderMode::Device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(f: impl FnOnce(&mut EngineState)) -> EngineStateUpdate {
        let prev = EngineState::default();
        let mut next = prev;
        f(&mut next);
        EngineStateUpdate::new(prev, next)
    }

    #[test]
    fn test_defaults() {
        let state = EngineState::default();
        assert!(state.input_follow_mode);
        assert!(state.input_muted);
        assert!(state.voice_processing_enabled);
        assert!(state.advanced_ducking);
        assert!(!state.is_any_enabled());
        assert!(state.is_output_default_device());
        assert!(state.is_input_default_device());
    }

    #[test]
    fn test_follow_mode_links_output_to_input() {
        let mut state = EngineState::default();
        state.input_enabled = true;
        assert!(state.is_input_enabled());
        // output_enabled itself stays false, only the derived predicate raises
        assert!(!state.output_enabled);
        assert!(state.is_output_enabled());

        state.input_follow_mode = false;
        assert!(!state.is_output_enabled());

        state.input_follow_mode = true;
        state.voice_processing_enabled = false;
        assert!(!state.is_output_enabled());
    }

    #[test]
    fn test_restart_engine_mute_folds_into_enablement() {
        let mut state = EngineState::default();
        state.input_enabled = true;
        state.input_running = true;
        state.mute_mode = MuteMode::RestartEngine;

        state.input_muted = false;
        assert!(state.is_input_enabled());
        assert!(state.is_input_running());

        state.input_muted = true;
        assert!(!state.is_input_enabled());
        assert!(!state.is_input_running());
    }

    #[test]
    fn test_voice_processing_mute_does_not_fold() {
        let mut state = EngineState::default();
        state.input_enabled = true;
        state.input_running = true;
        state.input_muted = true;
        assert!(state.is_input_enabled());
        assert!(state.is_input_running());
    }

    #[test]
    fn test_persistent_mode_keeps_input_enabled() {
        let mut state = EngineState::default();
        state.input_enabled_persistent_mode = true;
        assert!(state.is_input_enabled());
        assert!(!state.is_input_running());
    }

    #[test]
    fn test_availability_gates_predicates() {
        let mut state = EngineState::default();
        state.input_enabled = true;
        state.input_running = true;
        assert!(state.is_input_running());

        state.input_available = false;
        assert!(!state.is_input_enabled());
        assert!(!state.is_input_running());
        // linked output follows the gated input predicate
        assert!(!state.is_output_enabled());
    }

    #[test]
    fn test_no_changes() {
        let update = diff(|_| {});
        assert!(update.has_no_changes());
        assert!(!update.did_any_enable());
    }

    #[test]
    fn test_enable_input_enables_linked_output() {
        let update = diff(|next| next.input_enabled = true);
        assert!(update.did_enable_input());
        assert!(update.did_enable_output());
        assert!(update.did_update_audio_graph());
        assert!(update.is_engine_restart_required());
        assert!(!update.is_engine_recreate_required());
    }

    #[test]
    fn test_interruption_predicates() {
        let update = diff(|next| next.is_interrupted = true);
        assert!(update.did_begin_interruption());
        assert!(!update.did_end_interruption());
        assert!(!update.did_update_audio_graph());
    }

    #[test]
    fn test_device_change_requires_recreate() {
        let update = diff(|next| next.input_device_id = DeviceId(7));
        assert!(update.is_engine_recreate_required());
    }

    #[test]
    fn test_default_device_bump_requires_recreate_only_when_following_default() {
        let update = diff(|next| next.default_output_device_update_count = 1);
        assert!(update.is_engine_recreate_required());

        // An explicit selection ignores default-device movement.
        let mut prev = EngineState::default();
        prev.output_device_id = DeviceId(9);
        let mut next = prev;
        next.default_output_device_update_count = 1;
        let update = EngineStateUpdate::new(prev, next);
        assert!(!update.is_engine_recreate_required());
    }

    #[test]
    fn test_output_only_downgrade_is_special_cased() {
        let mut prev = EngineState::default();
        prev.input_enabled = true;
        prev.output_enabled = true;
        let mut next = prev;
        next.input_enabled = false;
        let update = EngineStateUpdate::new(prev, next);
        assert!(update.did_disable_input());
        assert!(!update.did_disable_output());
        assert!(update.is_engine_recreate_required());
    }

    #[test]
    fn test_render_mode_switch_predicates() {
        let update = diff(|next| next.render_mode = RenderMode::Manual);
        assert!(update.did_enable_manual_rendering_mode());
        assert!(!update.did_enable_device_rendering_mode());

        let mut prev = EngineState::default();
        prev.render_mode = RenderMode::Manual;
        let mut next = prev;
        next.render_mode = RenderMode::Device;
        let update = EngineStateUpdate::new(prev, next);
        assert!(update.did_enable_device_rendering_mode());
    }
}
