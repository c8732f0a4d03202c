//! End-to-end controller scenarios against fake cameras, inference and
//! realtime transport. The clock is paused so polling timers run instantly.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{rig, CameraMode, RigOptions};
use resq_eye::capture::Facing;
use resq_eye::controller::live_controller::{VOICE_CLOSED_STATUS, VOICE_FAILED_STATUS};
use resq_eye::controller::status::{SIGNAL_LOST_STATUS, SIMULATION_STATUS};
use resq_eye::controller::{ControlError, ControllerEvent, LiveCommand, LiveMode};
use resq_eye::inference::LiveEvent;
use resq_eye::lease::LeaseHolder;
use resq_eye::streaming::{SessionEnd, StreamingError, StreamingPhase, OPEN_STATUS};
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_denied_camera_falls_back_to_simulation() {
    let mut rig = rig(RigOptions::default());
    rig.cameras.set_mode(CameraMode::Denied);

    rig.controller.start().await.unwrap();

    let status = rig.status.get().await;
    assert_eq!(status.mode, LiveMode::Simulation);
    assert_eq!(status.status_text, SIMULATION_STATUS);
    assert!(status.last_error.is_none());
    assert_eq!(rig.controller.lease_holder(), Some(LeaseHolder::Polling));

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_broken_camera_enters_signal_lost_until_retry() {
    let mut rig = rig(RigOptions::default());
    rig.cameras.set_mode(CameraMode::Broken);

    let error = rig.controller.start().await.unwrap_err();
    assert!(matches!(error, ControlError::Capture(_)));

    let status = rig.status.get().await;
    assert_eq!(status.status_text, SIGNAL_LOST_STATUS);
    assert_eq!(
        status.last_error.as_deref(),
        Some("Camera Error: capture transport failure: bus reset")
    );
    assert_eq!(rig.controller.lease_holder(), None);

    rig.cameras.set_mode(CameraMode::Working);
    rig.controller.retry_live().await.unwrap();

    let status = rig.status.get().await;
    assert!(status.last_error.is_none());
    assert_eq!(status.mode, LiveMode::LiveFeed);
    assert_eq!(status.facing, Some(Facing::Rear));
    assert_eq!(rig.controller.lease_holder(), Some(LeaseHolder::Polling));

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_danger_is_spoken_once_and_respects_mute() {
    let mut rig = rig(RigOptions {
        verdict: "ALERT: FIRE DETECTED",
        ..Default::default()
    });
    rig.controller.start().await.unwrap();

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(rig.inference.calls(), 1);
    assert_eq!(*rig.speech.spoken.lock().unwrap(), vec!["FIRE DETECTED"]);
    let status = rig.status.get().await;
    assert!(status.is_danger);
    assert_eq!(status.status_text, "ALERT: FIRE DETECTED");

    assert!(!rig.controller.toggle_audio().await);
    sleep(Duration::from_secs(6)).await;
    assert_eq!(rig.inference.calls(), 2);
    assert_eq!(rig.speech.spoken.lock().unwrap().len(), 1);

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_voice_mode_rejected_in_simulation() {
    let mut rig = rig(RigOptions {
        force_simulation: true,
        ..Default::default()
    });
    rig.controller.start().await.unwrap();
    assert_eq!(rig.cameras.opens.load(Ordering::SeqCst), 0);

    let error = rig.controller.toggle_voice_mode().await.unwrap_err();
    assert!(matches!(
        error,
        ControlError::Streaming(StreamingError::SyntheticSource)
    ));
    assert_eq!(rig.controller.lease_holder(), Some(LeaseHolder::Polling));
    assert_eq!(rig.status.get().await.mode, LiveMode::Simulation);

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_streaming_pauses_polling() {
    let mut rig = rig(RigOptions::default());
    rig.controller.start().await.unwrap();

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(rig.inference.calls(), 1);

    rig.controller.toggle_voice_mode().await.unwrap();
    assert_eq!(rig.controller.lease_holder(), Some(LeaseHolder::Streaming));
    assert_eq!(rig.status.get().await.mode, LiveMode::VoiceStreaming);

    let peer = rig.peers.recv().await.unwrap();
    peer.inbound.send(LiveEvent::Opened).await.unwrap();
    sleep(Duration::from_secs(30)).await;

    let status = rig.status.get().await;
    assert_eq!(status.streaming_phase, StreamingPhase::Open);
    assert_eq!(status.status_text, OPEN_STATUS);
    assert_eq!(rig.inference.calls(), 1);

    rig.controller.toggle_voice_mode().await.unwrap();
    assert_eq!(rig.controller.lease_holder(), Some(LeaseHolder::Polling));
    let status = rig.status.get().await;
    assert_eq!(status.mode, LiveMode::LiveFeed);
    assert_eq!(status.status_text, VOICE_CLOSED_STATUS);
    assert_eq!(status.streaming_phase, StreamingPhase::Closed);
    assert!(peer.cancel.is_cancelled());

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(rig.inference.calls(), 2);

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_close_resumes_polling_once() {
    let mut rig = rig(RigOptions::default());
    rig.controller.start().await.unwrap();
    rig.controller.toggle_voice_mode().await.unwrap();

    let peer = rig.peers.recv().await.unwrap();
    peer.inbound.send(LiveEvent::Opened).await.unwrap();
    peer.inbound
        .send(LiveEvent::Closed(Some("session expired".into())))
        .await
        .unwrap();

    let event = rig.events.recv().await.unwrap();
    let generation = match &event {
        ControllerEvent::StreamingEnded { generation, end } => {
            assert!(matches!(end, SessionEnd::RemoteClosed(Some(reason)) if reason == "session expired"));
            *generation
        }
        other => panic!("unexpected event: {other:?}"),
    };
    assert!(rig.controller.handle_event(event).await);

    assert_eq!(rig.controller.lease_holder(), Some(LeaseHolder::Polling));
    assert_eq!(rig.status.get().await.status_text, VOICE_CLOSED_STATUS);

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(rig.status.get().await.status_text, "SAFE");

    // A repeated end for the same session changes nothing.
    rig.controller
        .handle_streaming_ended(generation, SessionEnd::RemoteClosed(None))
        .await;
    assert_eq!(rig.controller.lease_holder(), Some(LeaseHolder::Polling));
    assert_eq!(rig.status.get().await.status_text, "SAFE");

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_session_resumes_polling() {
    let mut rig = rig(RigOptions {
        fail_connect: true,
        ..Default::default()
    });
    rig.controller.start().await.unwrap();
    rig.controller.toggle_voice_mode().await.unwrap();

    let event = rig.events.recv().await.unwrap();
    assert!(matches!(
        event,
        ControllerEvent::StreamingEnded {
            end: SessionEnd::Failed(StreamingError::Transport(_)),
            ..
        }
    ));
    rig.controller.handle_event(event).await;

    let status = rig.status.get().await;
    assert_eq!(status.status_text, VOICE_FAILED_STATUS);
    assert_eq!(status.mode, LiveMode::LiveFeed);
    assert_eq!(rig.controller.lease_holder(), Some(LeaseHolder::Polling));

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_session_end_is_ignored() {
    let mut rig = rig(RigOptions::default());
    rig.controller.start().await.unwrap();
    rig.controller.toggle_voice_mode().await.unwrap();
    let _peer = rig.peers.recv().await.unwrap();

    rig.controller
        .handle_streaming_ended(999, SessionEnd::RemoteClosed(None))
        .await;

    assert_eq!(rig.controller.lease_holder(), Some(LeaseHolder::Streaming));
    assert_eq!(rig.status.get().await.mode, LiveMode::VoiceStreaming);

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_switch_camera_alternates_facing() {
    let mut rig = rig(RigOptions {
        facings: vec![Some(Facing::Rear), Some(Facing::Front)],
        ..Default::default()
    });
    rig.controller.start().await.unwrap();
    let status = rig.status.get().await;
    assert_eq!(status.facing, Some(Facing::Rear));
    assert!(status.has_multiple_cameras);

    rig.controller.switch_camera().await.unwrap();
    assert_eq!(rig.status.get().await.facing, Some(Facing::Front));
    assert_eq!(rig.cameras.stops.load(Ordering::SeqCst), 1);

    rig.controller.switch_camera().await.unwrap();
    assert_eq!(rig.status.get().await.facing, Some(Facing::Rear));
    assert_eq!(rig.cameras.opens.load(Ordering::SeqCst), 3);

    rig.controller.toggle_voice_mode().await.unwrap();
    let error = rig.controller.switch_camera().await.unwrap_err();
    assert!(matches!(error, ControlError::Rejected(_)));

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_switch_camera_needs_two_cameras() {
    let mut rig = rig(RigOptions::default());
    rig.controller.start().await.unwrap();

    let error = rig.controller.switch_camera().await.unwrap_err();
    assert!(matches!(error, ControlError::Rejected(_)));
    assert_eq!(rig.cameras.opens.load(Ordering::SeqCst), 1);

    rig.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_simulated_disconnect_stops_polling() {
    let mut rig = rig(RigOptions::default());
    rig.controller.start().await.unwrap();
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(rig.inference.calls(), 1);

    rig.controller.simulate_disconnect().await;

    let status = rig.status.get().await;
    assert_eq!(status.status_text, SIGNAL_LOST_STATUS);
    assert!(status
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("Camera Error:")));
    assert_eq!(rig.controller.lease_holder(), None);
    assert_eq!(rig.cameras.stops.load(Ordering::SeqCst), 1);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(rig.inference.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_event_loop_answers_commands() {
    let mut rig = rig(RigOptions {
        force_simulation: true,
        ..Default::default()
    });
    rig.controller.start().await.unwrap();

    let handle = rig.controller.handle();
    let stops = rig.cameras.stops.clone();
    let status = rig.status.clone();
    let events = rig.events;
    let task = tokio::spawn(rig.controller.run(events));

    handle.command(LiveCommand::ToggleAudio).await.unwrap();
    assert!(!status.audio_enabled().await);

    let rejected = handle.command(LiveCommand::SwitchCamera).await.unwrap_err();
    assert_eq!(rejected, "Cannot switch cameras in simulation");

    handle.command(LiveCommand::ForceSimulation).await.unwrap();
    assert_eq!(status.get().await.mode, LiveMode::Simulation);

    handle.shutdown().await;
    task.await.unwrap();
    assert_eq!(stops.load(Ordering::SeqCst), 0);
    assert!(handle.command(LiveCommand::ToggleAudio).await.is_err());
}
