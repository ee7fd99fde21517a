//! Manual-mode render loop.
//!
//! A dedicated OS thread stands in for the hardware callback cadence: every
//! 10 ms it pulls playout PCM from the fine buffer into the read buffer
//! (keeping the playout pipeline ticking even though no hardware consumes
//! it), drives the manual render block, and delivers the rendered samples as
//! recorded data with a monotonic capture timestamp. Pacing uses absolute
//! deadlines from the loop start, so sleep jitter does not accumulate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::buffer::FineAudioBuffer;
use crate::error::{EngineError, EngineResult};
use crate::graph::ManualRenderBlock;
use crate::types::AudioFormat;

/// Handle to the running render thread.
pub(super) struct RenderLoop {
    quit: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RenderLoop {
    /// Spawn the render thread.
    pub(super) fn spawn(
        block: ManualRenderBlock,
        fine_buffer: Arc<FineAudioBuffer>,
        format: AudioFormat,
        max_frames: u32,
        epoch: Instant,
    ) -> EngineResult<Self> {
        let quit = Arc::new(AtomicBool::new(false));
        let quit_flag = quit.clone();
        let handle = thread::Builder::new()
            .name("audio-engine-render".to_string())
            .spawn(move || {
                run_render_loop(block, fine_buffer, format, max_frames, epoch, quit_flag);
            })
            .map_err(|err| EngineError::ResourceFailure {
                reason: format!("render thread spawn failed: {err}"),
            })?;
        Ok(Self {
            quit,
            handle: Some(handle),
        })
    }

    /// Signal the loop and join the thread.
    pub(super) fn stop(mut self) {
        self.signal_and_join();
    }

    fn signal_and_join(&mut self) {
        self.quit.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("render thread panicked");
            }
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.signal_and_join();
    }
}

fn run_render_loop(
    mut block: ManualRenderBlock,
    fine_buffer: Arc<FineAudioBuffer>,
    format: AudioFormat,
    max_frames: u32,
    epoch: Instant,
    quit: Arc<AtomicBool>,
) {
    let frames_per_chunk = ((format.sample_rate as f64) / 100.0).round() as usize;
    let chunk_ms = ((1000 * frames_per_chunk) as f64 / format.sample_rate as f64).round() as u64;
    let capacity = max_frames as usize;
    let mut read_buffer = vec![0i16; capacity];
    let mut render_buffer = vec![0i16; capacity];

    debug!(frames_per_chunk, chunk_ms, "render loop started");
    let start = Instant::now();
    let mut iteration: u64 = 0;

    while !quit.load(Ordering::Acquire) {
        // Keep the playout pipeline ticking; nothing consumes the result.
        fine_buffer.get_playout_data(&mut read_buffer[..frames_per_chunk]);

        match block(
            frames_per_chunk as u32,
            &mut render_buffer[..frames_per_chunk],
        ) {
            Ok(rendered) => {
                let capture_timestamp_ns = epoch.elapsed().as_nanos() as u64;
                fine_buffer.deliver_recorded_data(
                    &render_buffer[..rendered as usize],
                    capture_timestamp_ns,
                );
            }
            Err(err) => {
                warn!(code = err.code(), %err, "manual render failed");
            }
        }

        iteration += 1;
        let next_wakeup = start + Duration::from_millis(iteration * chunk_ms);
        let now = Instant::now();
        if next_wakeup > now {
            thread::sleep(next_wakeup - now);
        }
    }
    debug!(iteration, "render loop stopped");
}
