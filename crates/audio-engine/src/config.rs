//! Engine configuration.

use std::time::Duration;

use crate::defaults;

/// Tunables for the engine's retry, debounce, and manual-rendering behavior.
///
/// The defaults reproduce the production timings; tests shrink the retry
/// delays to keep wall-clock time down.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of attempts before an engine start is reported as failed.
    pub start_retry_count: u32,
    /// Sleep between engine start attempts.
    pub start_retry_delay: Duration,
    /// Settle sleep after `prepare` on platforms with device selection.
    pub prepare_settle_delay: Duration,
    /// Debounce window for default-device change notifications.
    pub default_device_debounce: Duration,
    /// Sample rate of the manual rendering engine.
    pub manual_render_sample_rate: u32,
    /// Maximum frames per manual render call.
    pub manual_render_max_frames: u32,
    /// Fixed playout delay estimate reported to the caller.
    pub fixed_playout_delay_ms: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_retry_count: defaults::ENGINE_START_RETRY_COUNT,
            start_retry_delay: Duration::from_millis(defaults::ENGINE_START_RETRY_DELAY_MS),
            prepare_settle_delay: Duration::from_millis(defaults::PREPARE_SETTLE_DELAY_MS),
            default_device_debounce: Duration::from_millis(defaults::DEFAULT_DEVICE_DEBOUNCE_MS),
            manual_render_sample_rate: defaults::MANUAL_RENDER_SAMPLE_RATE,
            manual_render_max_frames: defaults::MANUAL_RENDER_MAX_FRAMES,
            fixed_playout_delay_ms: defaults::FIXED_PLAYOUT_DELAY_MS,
        }
    }
}

impl EngineConfig {
    /// A configuration with near-zero sleeps, for tests that exercise the
    /// retry and settle paths without paying for them in wall-clock time.
    pub fn fast() -> Self {
        Self {
            start_retry_delay: Duration::from_millis(1),
            prepare_settle_delay: Duration::from_millis(1),
            ..Self::default()
        }
    }
}
