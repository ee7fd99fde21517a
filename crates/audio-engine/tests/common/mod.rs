//! Shared test rig: recording observer, counting transport, and a fully
//! mocked engine.
#![allow(dead_code)]

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use aven_audio_engine::graph::test_graph::{MockAudioBackend, MockBackendHandle};
use aven_audio_engine::graph::{AudioGraph, GraphNode};
use aven_audio_engine::observer::{AudioEngineObserver, InputConnectContext};
use aven_audio_engine::platform::test_platform::{MockAudioPlatform, MockPlatformHandle};
use aven_audio_engine::{
    AudioEngineDevice, AudioFormat, AudioTransport, EngineConfig, SpeechActivityEvent,
};

/// Everything an observer callback saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    DevicesUpdated,
    SpeechActivity(SpeechActivityEvent),
    DidCreate,
    WillEnable { po: bool, ro: bool },
    WillStart { po: bool, ro: bool },
    DidStop { po: bool, ro: bool },
    DidDisable { po: bool, ro: bool },
    WillRelease,
    WillConnectInput { has_source: bool },
    WillConnectOutput,
}

/// Observer that records every callback and optionally rejects one hook.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
    pub reject_did_create: AtomicI32,
    pub reject_will_enable: AtomicI32,
    pub reject_will_start: AtomicI32,
    pub reject_did_stop: AtomicI32,
    pub reject_did_disable: AtomicI32,
    pub reject_will_release: AtomicI32,
    pub reject_will_connect_input: AtomicI32,
    pub reject_will_connect_output: AtomicI32,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn contains(&self, event: &ObserverEvent) -> bool {
        self.events.lock().contains(event)
    }

    pub fn count_of(&self, event: &ObserverEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    fn record(&self, event: ObserverEvent) {
        self.events.lock().push(event);
    }
}

impl AudioEngineObserver for RecordingObserver {
    fn on_devices_updated(&self) {
        self.record(ObserverEvent::DevicesUpdated);
    }

    fn on_speech_activity_event(&self, event: SpeechActivityEvent) {
        self.record(ObserverEvent::SpeechActivity(event));
    }

    fn on_engine_did_create(&self, _engine: &mut dyn AudioGraph) -> i32 {
        self.record(ObserverEvent::DidCreate);
        self.reject_did_create.load(Ordering::SeqCst)
    }

    fn on_engine_will_enable(&self, _engine: &mut dyn AudioGraph, po: bool, ro: bool) -> i32 {
        self.record(ObserverEvent::WillEnable { po, ro });
        self.reject_will_enable.load(Ordering::SeqCst)
    }

    fn on_engine_will_start(&self, _engine: &mut dyn AudioGraph, po: bool, ro: bool) -> i32 {
        self.record(ObserverEvent::WillStart { po, ro });
        self.reject_will_start.load(Ordering::SeqCst)
    }

    fn on_engine_did_stop(&self, _engine: &mut dyn AudioGraph, po: bool, ro: bool) -> i32 {
        self.record(ObserverEvent::DidStop { po, ro });
        self.reject_did_stop.load(Ordering::SeqCst)
    }

    fn on_engine_did_disable(&self, _engine: &mut dyn AudioGraph, po: bool, ro: bool) -> i32 {
        self.record(ObserverEvent::DidDisable { po, ro });
        self.reject_did_disable.load(Ordering::SeqCst)
    }

    fn on_engine_will_release(&self, _engine: &mut dyn AudioGraph) -> i32 {
        self.record(ObserverEvent::WillRelease);
        self.reject_will_release.load(Ordering::SeqCst)
    }

    fn on_engine_will_connect_input(
        &self,
        _engine: &mut dyn AudioGraph,
        source: Option<GraphNode>,
        _destination: GraphNode,
        _format: &AudioFormat,
        _context: &InputConnectContext,
    ) -> i32 {
        self.record(ObserverEvent::WillConnectInput {
            has_source: source.is_some(),
        });
        self.reject_will_connect_input.load(Ordering::SeqCst)
    }

    fn on_engine_will_connect_output(
        &self,
        _engine: &mut dyn AudioGraph,
        _source: GraphNode,
        _destination: GraphNode,
        _format: &AudioFormat,
    ) -> i32 {
        self.record(ObserverEvent::WillConnectOutput);
        self.reject_will_connect_output.load(Ordering::SeqCst)
    }
}

/// Transport that counts traffic and serves silence for playout.
#[derive(Default)]
pub struct CountingTransport {
    pub pulled_samples: AtomicU64,
    pub pull_calls: AtomicU64,
    pub delivered_samples: AtomicU64,
    pub delivered_chunks: AtomicU64,
    pub last_capture_timestamp_ns: AtomicU64,
}

impl AudioTransport for CountingTransport {
    fn pull_playout_data(&self, dst: &mut [i16], _sample_rate: u32, _channels: u16) -> usize {
        dst.fill(0);
        self.pulled_samples
            .fetch_add(dst.len() as u64, Ordering::SeqCst);
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        dst.len()
    }

    fn deliver_recorded_data(
        &self,
        samples: &[i16],
        _sample_rate: u32,
        _channels: u16,
        capture_timestamp_ns: u64,
    ) {
        self.delivered_samples
            .fetch_add(samples.len() as u64, Ordering::SeqCst);
        self.delivered_chunks.fetch_add(1, Ordering::SeqCst);
        self.last_capture_timestamp_ns
            .store(capture_timestamp_ns, Ordering::SeqCst);
    }
}

/// A fully mocked engine plus every inspection handle.
pub struct TestRig {
    pub engine: AudioEngineDevice,
    pub backend: MockBackendHandle,
    pub platform: MockPlatformHandle,
    pub observer: Arc<RecordingObserver>,
    pub transport: Arc<CountingTransport>,
}

/// Build a rig with near-zero retry sleeps.
pub async fn rig() -> TestRig {
    rig_with(EngineConfig::fast()).await
}

/// Build a rig with a specific configuration.
pub async fn rig_with(config: EngineConfig) -> TestRig {
    let backend = MockAudioBackend::new();
    let backend_handle = backend.handle();
    let platform = MockAudioPlatform::new();
    let platform_handle = platform.handle();
    let observer = Arc::new(RecordingObserver::default());
    let engine = AudioEngineDevice::new(
        config,
        Box::new(backend),
        Box::new(platform),
        observer.clone(),
    )
    .await;
    let transport = Arc::new(CountingTransport::default());
    engine
        .register_audio_transport(Some(transport.clone()))
        .await
        .expect("transport registration");
    TestRig {
        engine,
        backend: backend_handle,
        platform: platform_handle,
        observer,
        transport,
    }
}
