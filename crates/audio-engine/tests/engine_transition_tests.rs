//! State-transition integration tests: the documented scenarios, observer
//! ordering, rollback atomicity, idempotence, and the three mute modes.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use aven_audio_engine::{EngineError, EngineState, GraphNode, MuteMode, SampleKind};
use common::{rig, ObserverEvent};

#[tokio::test]
async fn test_cold_start_recording_manual_mode() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine.set_manual_rendering_mode(true).await.unwrap();
    rig.engine.init_recording().await.unwrap();
    rig.engine.start_recording().await.unwrap();

    // One manual engine, configured for realtime manual rendering.
    assert_eq!(rig.backend.created_count(), 1);
    let graph = rig.backend.latest().unwrap();
    let (format, max_frames) = graph.manual_mode().unwrap();
    assert_eq!(format.sample_rate, 48_000);
    assert_eq!(format.channels, 1);
    assert_eq!(format.kind, SampleKind::Int16);
    assert_eq!(max_frames, 3072);
    assert!(graph.is_running());
    assert!(rig.engine.recording().await.unwrap());
    assert!(rig.engine.is_engine_running().await.unwrap());

    assert_eq!(
        rig.observer.events(),
        vec![
            ObserverEvent::DidCreate,
            ObserverEvent::WillEnable {
                po: false,
                ro: true
            },
            ObserverEvent::WillConnectInput { has_source: false },
            ObserverEvent::WillStart {
                po: false,
                ro: true
            },
        ]
    );

    // The render thread is ticking: recorded chunks reach the transport.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(rig.transport.delivered_chunks.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_mute_via_voice_processing_keeps_engine_running() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine.set_microphone_mute(false).await.unwrap();
    rig.engine.init_and_start_recording().await.unwrap();
    let graph = rig.backend.latest().unwrap();
    assert!(graph.is_running());
    assert!(!graph.voice_processing_input_muted());
    rig.observer.clear();

    rig.engine.set_microphone_mute(true).await.unwrap();

    assert!(graph.is_running());
    assert!(graph.voice_processing_input_muted());
    assert!(rig.engine.recording().await.unwrap());
    // Zero stop/start callbacks.
    assert!(rig.observer.events().is_empty());
}

#[tokio::test]
async fn test_mute_via_restart_engine_tears_input_down() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine
        .set_mute_mode(MuteMode::RestartEngine)
        .await
        .unwrap();
    rig.engine.set_microphone_mute(false).await.unwrap();
    rig.engine.init_and_start_recording().await.unwrap();
    let first_graph = rig.backend.latest().unwrap();
    assert!(first_graph.is_running());
    rig.observer.clear();

    rig.engine.set_microphone_mute(true).await.unwrap();

    let events = rig.observer.events();
    assert_eq!(
        events.first(),
        Some(&ObserverEvent::DidStop {
            po: false,
            ro: true
        })
    );
    assert!(events.contains(&ObserverEvent::DidDisable {
        po: false,
        ro: true
    }));
    assert!(events.contains(&ObserverEvent::WillRelease));
    assert!(first_graph.was_released());
    assert!(!rig.engine.recording().await.unwrap());
    assert!(!rig.engine.is_engine_running().await.unwrap());

    // Unmuting runs the full re-enable path on a fresh engine object.
    rig.observer.clear();
    rig.engine.set_microphone_mute(false).await.unwrap();
    let events = rig.observer.events();
    assert!(events.contains(&ObserverEvent::DidCreate));
    assert!(events.contains(&ObserverEvent::WillConnectInput { has_source: true }));
    assert!(events.contains(&ObserverEvent::WillStart {
        po: false,
        ro: true
    }));
    assert_eq!(rig.backend.created_count(), 2);
    assert!(rig.engine.recording().await.unwrap());
    assert!(rig.engine.is_engine_running().await.unwrap());
}

#[tokio::test]
async fn test_mute_via_input_mixer_only_changes_volume() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine.set_mute_mode(MuteMode::InputMixer).await.unwrap();
    rig.engine.set_microphone_mute(false).await.unwrap();
    rig.engine.init_and_start_recording().await.unwrap();
    let graph = rig.backend.latest().unwrap();
    let mixer = graph
        .attached_nodes()
        .into_iter()
        .find(|n| matches!(n, GraphNode::Mixer(_)))
        .expect("input mixer attached");
    assert_eq!(graph.mixer_volume(mixer), Some(1.0));
    rig.observer.clear();

    rig.engine.set_microphone_mute(true).await.unwrap();
    assert_eq!(graph.mixer_volume(mixer), Some(0.0));
    assert!(graph.is_running());
    assert!(rig.observer.events().is_empty());

    rig.engine.set_microphone_mute(false).await.unwrap();
    assert_eq!(graph.mixer_volume(mixer), Some(1.0));
}

#[tokio::test]
async fn test_observer_rejects_will_start_manual_mode() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine.set_manual_rendering_mode(true).await.unwrap();
    rig.engine.init_recording().await.unwrap();
    let before = rig.engine.engine_state().await.unwrap();
    rig.observer.reject_will_start.store(-42, Ordering::SeqCst);

    let err = rig.engine.start_recording().await.unwrap_err();
    assert_eq!(err, EngineError::ObserverRejected { code: -42 });
    assert_eq!(err.code(), -42);

    // Engine object exists and is stopped; no render thread; committed
    // state equals the pre-call state.
    assert_eq!(rig.backend.created_count(), 1);
    let graph = rig.backend.latest().unwrap();
    assert!(!graph.was_released());
    assert!(!graph.is_running());
    assert_eq!(graph.manual_renders(), 0);
    assert_eq!(rig.engine.engine_state().await.unwrap(), before);

    // Clearing the veto lets the same transition through.
    rig.observer.reject_will_start.store(0, Ordering::SeqCst);
    rig.engine.start_recording().await.unwrap();
    assert!(graph.is_running());
}

#[tokio::test]
async fn test_rollback_releases_engine_on_device_cold_start_failure() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.observer.reject_will_start.store(-9, Ordering::SeqCst);

    let mut wanted = EngineState::default();
    wanted.output_enabled = true;
    wanted.output_running = true;
    let err = rig.engine.set_engine_state(wanted).await.unwrap_err();
    assert_eq!(err.code(), -9);

    // The whole transition unwound: the freshly created engine is gone and
    // the committed state never moved.
    assert_eq!(rig.backend.created_count(), 1);
    assert!(rig.backend.latest().unwrap().was_released());
    assert_eq!(
        rig.engine.engine_state().await.unwrap(),
        EngineState::default()
    );
    assert!(!rig.engine.is_engine_running().await.unwrap());

    // And the same request succeeds on a fresh object afterwards.
    rig.observer.reject_will_start.store(0, Ordering::SeqCst);
    rig.engine.set_engine_state(wanted).await.unwrap();
    assert_eq!(rig.backend.created_count(), 2);
    assert!(rig.engine.is_engine_running().await.unwrap());
}

#[tokio::test]
async fn test_device_cold_start_callback_order() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine.set_microphone_mute(false).await.unwrap();

    let mut wanted = EngineState::default();
    wanted.input_muted = false;
    wanted.input_enabled = true;
    wanted.input_running = true;
    wanted.output_enabled = true;
    wanted.output_running = true;
    rig.engine.set_engine_state(wanted).await.unwrap();

    assert_eq!(
        rig.observer.events(),
        vec![
            ObserverEvent::DidCreate,
            ObserverEvent::WillEnable { po: true, ro: true },
            ObserverEvent::WillConnectOutput,
            ObserverEvent::WillConnectInput { has_source: true },
            ObserverEvent::WillStart { po: true, ro: true },
        ]
    );

    // Default wiring: source -> main mixer -> output, input -> mixer -> sink.
    let graph = rig.backend.latest().unwrap();
    let connections = graph.connections();
    assert!(connections
        .iter()
        .any(|&(from, to)| matches!(from, GraphNode::Source(_)) && to == GraphNode::MainMixer));
    assert!(connections
        .contains(&(GraphNode::MainMixer, GraphNode::OutputNode)));
    assert!(connections
        .iter()
        .any(|&(from, to)| from == GraphNode::InputNode && matches!(to, GraphNode::Mixer(_))));
    assert!(connections
        .iter()
        .any(|&(from, to)| matches!(from, GraphNode::Mixer(_)) && matches!(to, GraphNode::Sink(_))));
}

#[tokio::test]
async fn test_idempotent_reapply_is_a_noop() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine.init_and_start_recording().await.unwrap();
    let state = rig.engine.engine_state().await.unwrap();
    rig.observer.clear();

    rig.engine.set_engine_state(state).await.unwrap();

    assert!(rig.observer.events().is_empty());
    assert_eq!(rig.backend.created_count(), 1);
    assert!(!rig.backend.latest().unwrap().was_released());
}

#[tokio::test]
async fn test_same_transition_is_deterministic() {
    let mut logs = Vec::new();
    for _ in 0..2 {
        let rig = rig().await;
        rig.engine.init().await.unwrap();
        rig.engine.set_microphone_mute(false).await.unwrap();
        rig.engine.init_playout().await.unwrap();
        rig.engine.start_playout().await.unwrap();
        rig.engine.init_and_start_recording().await.unwrap();
        rig.engine.stop_recording().await.unwrap();
        logs.push((
            rig.observer.events(),
            rig.engine.engine_state().await.unwrap(),
        ));
    }
    assert_eq!(logs[0], logs[1]);
}

#[tokio::test]
async fn test_running_without_enabled_is_rejected() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    let before = rig.engine.engine_state().await.unwrap();

    let err = rig.engine.start_recording().await.unwrap_err();
    assert_eq!(err.code(), -5000);
    assert_eq!(rig.engine.engine_state().await.unwrap(), before);
    assert!(rig.observer.events().is_empty());
    assert_eq!(rig.backend.created_count(), 0);
}

#[tokio::test]
async fn test_lifecycle_requires_init() {
    let rig = rig().await;
    let err = rig.engine.init_recording().await.unwrap_err();
    assert_eq!(err, EngineError::NotInitialized);
    assert_eq!(err.code(), -1003);
}

#[tokio::test]
async fn test_interruption_stops_and_resumes_engine() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine.init_and_start_recording().await.unwrap();
    let graph = rig.backend.latest().unwrap();
    assert!(graph.is_running());
    rig.observer.clear();

    rig.engine.handle_interruption_begin().await.unwrap();
    assert!(!graph.is_running());
    // Enablement intent survives the interruption.
    let state = rig.engine.engine_state().await.unwrap();
    assert!(state.input_enabled && state.input_running);
    assert!(rig
        .observer
        .contains(&ObserverEvent::DidStop {
            po: false,
            ro: true
        }));

    rig.observer.clear();
    rig.engine.handle_interruption_end(true).await.unwrap();
    assert!(graph.is_running());
    assert!(rig.observer.contains(&ObserverEvent::WillStart {
        po: false,
        ro: true
    }));
    // Same engine object across the interruption, no recreate.
    assert_eq!(rig.backend.created_count(), 1);
}

#[tokio::test]
async fn test_voice_processing_toggle_restarts_same_engine() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine.init_and_start_recording().await.unwrap();
    let graph = rig.backend.latest().unwrap();
    assert!(graph.voice_processing_enabled());
    rig.observer.clear();

    rig.engine.set_voice_processing_enabled(false).await.unwrap();

    assert!(!graph.voice_processing_enabled());
    assert!(rig.observer.contains(&ObserverEvent::DidStop {
        po: false,
        ro: true
    }));
    assert!(rig.observer.contains(&ObserverEvent::WillStart {
        po: false,
        ro: true
    }));
    // Restart, not recreate: the same engine object keeps running.
    assert_eq!(rig.backend.created_count(), 1);
    assert!(graph.is_running());
}

#[tokio::test]
async fn test_availability_gates_input_side() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine.init_and_start_recording().await.unwrap();
    assert!(rig.engine.recording().await.unwrap());

    rig.engine.set_engine_availability(false, true).await.unwrap();
    assert!(!rig.engine.recording().await.unwrap());
    assert!(!rig.engine.is_engine_running().await.unwrap());

    rig.engine.set_engine_availability(true, true).await.unwrap();
    assert!(rig.engine.recording().await.unwrap());
    assert!(rig.engine.is_engine_running().await.unwrap());
}

#[tokio::test]
async fn test_persistent_mode_keeps_graph_after_stop() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine
        .set_init_recording_persistent_mode(true)
        .await
        .unwrap();
    rig.engine.init_and_start_recording().await.unwrap();
    let graph = rig.backend.latest().unwrap();

    rig.engine.stop_recording().await.unwrap();

    // Input stays enabled through persistent mode, so the engine object and
    // its input wiring survive the stop.
    assert!(!graph.was_released());
    assert!(!rig.engine.recording_is_initialized().await.unwrap());
    assert!(!rig.engine.is_engine_running().await.unwrap());
    assert_eq!(rig.backend.created_count(), 1);
}

#[tokio::test]
async fn test_mode_switch_shuts_down_device_side_first() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine.init_and_start_recording().await.unwrap();
    let device_graph = rig.backend.latest().unwrap();
    rig.observer.clear();

    rig.engine.set_manual_rendering_mode(true).await.unwrap();

    // Device side torn down, then manual brought up fresh.
    assert!(device_graph.was_released());
    assert_eq!(rig.backend.created_count(), 2);
    let manual_graph = rig.backend.latest().unwrap();
    assert!(manual_graph.manual_mode().is_some());
    assert!(manual_graph.is_running());
    assert!(rig.engine.recording().await.unwrap());

    let events = rig.observer.events();
    let stop_at = events
        .iter()
        .position(|e| matches!(e, ObserverEvent::DidStop { .. }))
        .expect("device stop");
    let create_at = events
        .iter()
        .position(|e| matches!(e, ObserverEvent::DidCreate))
        .expect("manual create");
    assert!(stop_at < create_at);

    // And back to device mode.
    rig.engine.set_manual_rendering_mode(false).await.unwrap();
    assert!(manual_graph.was_released());
    assert_eq!(rig.backend.created_count(), 3);
    assert!(rig.engine.is_engine_running().await.unwrap());
}

#[tokio::test]
async fn test_unavailable_output_format_surfaces_device_error() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.backend
        .set_output_format(aven_audio_engine::AudioFormat::float32(0, 0));

    let err = rig.engine.init_playout().await.unwrap_err();
    assert_eq!(err, EngineError::PlayoutDeviceNotAvailable);
    assert_eq!(err.code(), -3010);
    // Rollback released the engine object created for the attempt.
    assert_eq!(
        rig.engine.engine_state().await.unwrap(),
        EngineState::default()
    );
    assert!(rig.backend.latest().unwrap().was_released());
}

#[tokio::test]
async fn test_start_retries_then_fails_with_retry_code() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.backend.set_start_failures(u32::MAX);

    let err = rig.engine.init_and_start_recording().await.unwrap_err();
    assert_eq!(err, EngineError::StartFailedAfterRetries { attempts: 10 });
    assert_eq!(err.code(), -5001);
    assert_eq!(rig.backend.latest().unwrap().start_attempts(), 10);
}

#[tokio::test]
async fn test_start_succeeds_within_retry_budget() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.backend.set_start_failures(3);

    rig.engine.init_and_start_recording().await.unwrap();
    assert!(rig.engine.is_engine_running().await.unwrap());
    assert_eq!(rig.backend.latest().unwrap().start_attempts(), 4);
}

#[tokio::test]
async fn test_terminate_tears_everything_down() {
    let rig = rig().await;
    rig.engine.init().await.unwrap();
    rig.engine.init_and_start_recording().await.unwrap();
    let graph = rig.backend.latest().unwrap();

    rig.engine.terminate().await.unwrap();

    assert!(graph.was_released());
    assert!(!rig.engine.initialized().await.unwrap());
    let state = rig.engine.engine_state().await.unwrap();
    assert!(!state.is_any_enabled());
}
