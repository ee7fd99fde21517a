//! PCM buffering between the engine and the audio transport.
//!
//! The transport exchanges audio in exact 10 ms chunks at the negotiated
//! sample rate. Hardware and manual-render callbacks do not: they arrive with
//! whatever frame count the host graph chose. [`AudioDeviceBuffer`] owns the
//! transport reference plus the playing/recording lifecycle flags, and
//! [`FineAudioBuffer`] adapts arbitrary frame counts to the 10 ms cadence,
//! carrying partial chunks across calls.
//!
//! Both types are internally locked: the control task drives the lifecycle
//! while render and sink callbacks stream samples from their own threads.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::types::AudioFormat;

/// The 10 ms PCM producer/consumer the engine serves.
///
/// `pull_playout_data` and `deliver_recorded_data` are called only from
/// [`FineAudioBuffer`], always with exactly one chunk's worth of samples.
pub trait AudioTransport: Send + Sync {
    /// Fill `dst` with playout samples. Returns the number of samples
    /// written; the remainder is zero-filled by the caller.
    fn pull_playout_data(&self, dst: &mut [i16], sample_rate: u32, channels: u16) -> usize;

    /// Consume one chunk of recorded samples with its capture timestamp.
    fn deliver_recorded_data(
        &self,
        samples: &[i16],
        sample_rate: u32,
        channels: u16,
        capture_timestamp_ns: u64,
    );
}

#[derive(Default)]
struct DeviceBufferInner {
    transport: Option<Arc<dyn AudioTransport>>,
    playing: bool,
    recording: bool,
    playout_format: Option<AudioFormat>,
    recording_format: Option<AudioFormat>,
}

/// Transport attachment point plus playout/recording lifecycle flags.
pub struct AudioDeviceBuffer {
    inner: Mutex<DeviceBufferInner>,
}

impl AudioDeviceBuffer {
    /// Create an empty buffer with no transport attached.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(DeviceBufferInner::default()),
        })
    }

    /// Attach or detach the transport.
    pub fn register_transport(&self, transport: Option<Arc<dyn AudioTransport>>) {
        self.inner.lock().transport = transport;
    }

    /// Set the negotiated playout format.
    pub fn set_playout_format(&self, sample_rate: u32, channels: u16) {
        let mut inner = self.inner.lock();
        inner.playout_format = Some(AudioFormat::int16(sample_rate, channels));
        debug!(sample_rate, channels, "playout format configured");
    }

    /// Set the negotiated recording format.
    pub fn set_recording_format(&self, sample_rate: u32, channels: u16) {
        let mut inner = self.inner.lock();
        inner.recording_format = Some(AudioFormat::int16(sample_rate, channels));
        debug!(sample_rate, channels, "recording format configured");
    }

    /// The negotiated playout format, if configured.
    pub fn playout_format(&self) -> Option<AudioFormat> {
        self.inner.lock().playout_format
    }

    /// The negotiated recording format, if configured.
    pub fn recording_format(&self) -> Option<AudioFormat> {
        self.inner.lock().recording_format
    }

    /// Mark playout as running.
    pub fn start_playout(&self) {
        self.inner.lock().playing = true;
    }

    /// Mark playout as stopped.
    pub fn stop_playout(&self) {
        self.inner.lock().playing = false;
    }

    /// Mark recording as running.
    pub fn start_recording(&self) {
        self.inner.lock().recording = true;
    }

    /// Mark recording as stopped.
    pub fn stop_recording(&self) {
        self.inner.lock().recording = false;
    }

    /// Whether playout is running.
    pub fn is_playing(&self) -> bool {
        self.inner.lock().playing
    }

    /// Whether recording is running.
    pub fn is_recording(&self) -> bool {
        self.inner.lock().recording
    }

    /// Pull exactly one chunk from the transport into `dst`, zero-filling
    /// when no transport is attached, playout is stopped, or the transport
    /// comes up short.
    fn request_playout_chunk(&self, dst: &mut [i16]) {
        let (transport, format, playing) = {
            let inner = self.inner.lock();
            (inner.transport.clone(), inner.playout_format, inner.playing)
        };
        let written = match (transport, format, playing) {
            (Some(transport), Some(format), true) => {
                transport.pull_playout_data(dst, format.sample_rate, format.channels)
            }
            _ => 0,
        };
        dst[written..].fill(0);
    }

    /// Hand exactly one recorded chunk to the transport. Dropped when no
    /// transport is attached or recording is stopped.
    fn deliver_recorded_chunk(&self, samples: &[i16], capture_timestamp_ns: u64) {
        let (transport, format, recording) = {
            let inner = self.inner.lock();
            (
                inner.transport.clone(),
                inner.recording_format,
                inner.recording,
            )
        };
        if let (Some(transport), Some(format), true) = (transport, format, recording) {
            transport.deliver_recorded_data(
                samples,
                format.sample_rate,
                format.channels,
                capture_timestamp_ns,
            );
        }
    }
}

#[derive(Default)]
struct FineBufferInner {
    playout_queue: VecDeque<i16>,
    record_queue: VecDeque<i16>,
    record_timestamp_ns: u64,
}

/// Adapts arbitrary callback frame counts to the transport's 10 ms cadence.
///
/// Playout: callbacks of any size are served from a queue that is refilled
/// one exact chunk at a time. Recording: samples accumulate until a full
/// chunk is available, then it is forwarded with the most recent capture
/// timestamp. Resetting a side drops its partial chunk.
pub struct FineAudioBuffer {
    device_buffer: Arc<AudioDeviceBuffer>,
    inner: Mutex<FineBufferInner>,
}

impl FineAudioBuffer {
    /// Create a chunker over the given device buffer.
    pub fn new(device_buffer: Arc<AudioDeviceBuffer>) -> Arc<Self> {
        Arc::new(Self {
            device_buffer,
            inner: Mutex::new(FineBufferInner::default()),
        })
    }

    /// Fill `dst` with playout samples, pulling as many 10 ms chunks from
    /// the transport as needed. Zero-fills when no playout format is
    /// configured.
    pub fn get_playout_data(&self, dst: &mut [i16]) {
        let Some(format) = self.device_buffer.playout_format() else {
            dst.fill(0);
            return;
        };
        let chunk = format.frames_per_chunk() * format.channels as usize;
        if chunk == 0 {
            dst.fill(0);
            return;
        }

        let mut inner = self.inner.lock();
        let mut scratch = vec![0i16; chunk];
        while inner.playout_queue.len() < dst.len() {
            self.device_buffer.request_playout_chunk(&mut scratch);
            inner.playout_queue.extend(scratch.iter().copied());
        }
        for sample in dst.iter_mut() {
            *sample = inner.playout_queue.pop_front().unwrap_or(0);
        }
    }

    /// Accumulate recorded samples and forward every complete 10 ms chunk to
    /// the transport, stamped with `capture_timestamp_ns`.
    pub fn deliver_recorded_data(&self, samples: &[i16], capture_timestamp_ns: u64) {
        let Some(format) = self.device_buffer.recording_format() else {
            return;
        };
        let chunk = format.frames_per_chunk() * format.channels as usize;
        if chunk == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        inner.record_queue.extend(samples.iter().copied());
        inner.record_timestamp_ns = capture_timestamp_ns;

        let mut scratch = vec![0i16; chunk];
        while inner.record_queue.len() >= chunk {
            for sample in scratch.iter_mut() {
                *sample = inner.record_queue.pop_front().unwrap_or(0);
            }
            let timestamp = inner.record_timestamp_ns;
            self.device_buffer.deliver_recorded_chunk(&scratch, timestamp);
        }
    }

    /// Drop any buffered playout samples.
    pub fn reset_playout(&self) {
        self.inner.lock().playout_queue.clear();
    }

    /// Drop any partially accumulated recorded chunk.
    pub fn reset_record(&self) {
        self.inner.lock().record_queue.clear();
    }
}
