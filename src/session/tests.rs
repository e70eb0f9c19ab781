use super::*;
use crate::config::ClipcamConfig;
use crate::error::SessionError;
use crate::events::{CaptureEvent, EventBus};
use crate::mock::{FlakySink, MockNegotiator};
use crate::router::{RouteOutcome, SkipReason};
use crate::sample::{DeviceOrientation, Sample, SampleFormat, Track};
use crate::source::{DeviceNegotiator, SourceEvent};
use crate::storage::{ClipReader, ClipSink, FileClipSink};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

fn test_config(dir: &TempDir) -> ClipcamConfig {
    let mut config = ClipcamConfig::default();
    config.writer.path = dir.path().display().to_string();
    config
}

fn file_session(dir: &TempDir, negotiator: Arc<dyn DeviceNegotiator>) -> (CaptureSession, Arc<EventBus>) {
    let config = test_config(dir);
    let sink: Arc<dyn ClipSink> = Arc::new(FileClipSink::new(
        config.writer.clip_dir(),
        config.writer.sync_interval(),
    ));
    let bus = Arc::new(EventBus::new(1024));
    (CaptureSession::new(&config, negotiator, sink, Arc::clone(&bus)), bus)
}

fn video(id: u64) -> Sample {
    Sample::video(
        id,
        Duration::from_millis(id * 33),
        vec![id as u8; 48],
        4,
        4,
        SampleFormat::Mjpeg,
    )
}

fn drain(events: &mut broadcast::Receiver<CaptureEvent>) -> Vec<CaptureEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn count(events: &[CaptureEvent], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}

#[tokio::test]
async fn test_records_ten_sample_clip() {
    let temp_dir = TempDir::new().unwrap();
    let (session, bus) = file_session(&temp_dir, Arc::new(MockNegotiator::accepting()));
    let mut events = bus.subscribe();
    let router = session.router();

    session.start(SessionConfiguration::default()).await.unwrap();
    assert_eq!(session.state(), SessionState::Running);

    let clip_id = session.start_clip().await.unwrap();
    for id in 0..10 {
        assert_eq!(router.route(video(id)), RouteOutcome::Accepted);
    }
    let clip = session.end_clip().await.unwrap();

    assert_eq!(clip.id, clip_id);
    assert_eq!(clip.index, 0);
    assert_eq!(clip.counts.video.appended, 10);
    assert_eq!(clip.counts.video.skipped, 0);
    assert_eq!(clip.duration, Duration::from_millis(9 * 33));

    let samples = ClipReader::open(&clip.path).await.unwrap().read_all().await.unwrap();
    let ids: Vec<u64> = samples.iter().map(|s| s.id).collect();
    assert_eq!(ids, (0..10).collect::<Vec<_>>());

    let events = drain(&mut events);
    assert_eq!(count(&events, "clip_started"), 1);
    assert_eq!(count(&events, "sample_appended"), 10);
    assert_eq!(count(&events, "clip_completed"), 1);
    let clip_started = events
        .iter()
        .position(|e| e.event_type() == "clip_started")
        .unwrap();
    let clip_completed = events
        .iter()
        .position(|e| e.event_type() == "clip_completed")
        .unwrap();
    assert!(clip_started < clip_completed);
}

#[tokio::test]
async fn test_interruption_skips_without_closing_clip() {
    let temp_dir = TempDir::new().unwrap();
    let (session, bus) = file_session(&temp_dir, Arc::new(MockNegotiator::accepting()));
    let mut events = bus.subscribe();
    let router = session.router();

    session.start(SessionConfiguration::default()).await.unwrap();
    session.start_clip().await.unwrap();

    for id in 0..5 {
        assert_eq!(router.route(video(id)), RouteOutcome::Accepted);
    }
    session.interrupt("phone call").await.unwrap();
    for id in 5..10 {
        assert_eq!(
            router.route(video(id)),
            RouteOutcome::Skipped(SkipReason::NotRunning(SessionState::Interrupted))
        );
    }
    session.resume().await.unwrap();
    for id in 10..15 {
        assert_eq!(router.route(video(id)), RouteOutcome::Accepted);
    }

    let clip = session.end_clip().await.unwrap();
    assert_eq!(clip.counts.video.appended, 10);
    assert_eq!(clip.counts.video.skipped, 5);

    let events = drain(&mut events);
    assert_eq!(count(&events, "session_interrupted"), 1);
    assert_eq!(count(&events, "session_interruption_ended"), 1);
    assert_eq!(count(&events, "sample_skipped"), 5);
    assert_eq!(count(&events, "clip_started"), 1);
}

#[tokio::test]
async fn test_interrupt_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let (session, _bus) = file_session(&temp_dir, Arc::new(MockNegotiator::accepting()));

    session.start(SessionConfiguration::default()).await.unwrap();
    session.interrupt("first").await.unwrap();
    session.interrupt("second").await.unwrap();
    assert_eq!(session.state(), SessionState::Interrupted);

    // Resume is only valid while interrupted
    session.resume().await.unwrap();
    assert!(matches!(
        session.resume().await,
        Err(SessionError::InvalidTransition {
            from: SessionState::Running,
            ..
        })
    ));
}

#[tokio::test]
async fn test_nothing_written_while_not_running() {
    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(FlakySink::new(0));
    let config = test_config(&temp_dir);
    let bus = Arc::new(EventBus::new(64));
    let session = CaptureSession::new(
        &config,
        Arc::new(MockNegotiator::accepting()),
        sink.clone(),
        Arc::clone(&bus),
    );
    let router = session.router();

    for id in 0..5 {
        assert_eq!(
            router.route(video(id)),
            RouteOutcome::Skipped(SkipReason::NotRunning(SessionState::Idle))
        );
    }
    session.start(SessionConfiguration::default()).await.unwrap();
    assert_eq!(
        router.route(video(5)),
        RouteOutcome::Skipped(SkipReason::NoOpenClip)
    );
    session.stop().await.unwrap();
    assert_eq!(
        router.route(video(6)),
        RouteOutcome::Skipped(SkipReason::NotRunning(SessionState::Stopped))
    );

    assert!(sink.written().is_empty());
    assert_eq!(router.stats().accepted, 0);
    assert_eq!(router.stats().skipped(), 7);
}

#[tokio::test]
async fn test_configuration_failure_returns_to_idle() {
    let temp_dir = TempDir::new().unwrap();
    let (session, bus) = file_session(&temp_dir, Arc::new(MockNegotiator::failing("no camera")));
    let mut events = bus.subscribe();

    match session.start(SessionConfiguration::default()).await {
        Err(SessionError::Configuration { details }) => assert_eq!(details, "no camera"),
        other => panic!("Expected configuration error, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Idle);

    let snapshot = session.snapshot().await.unwrap();
    assert!(snapshot.clips.is_empty());
    assert!(snapshot.open_clip.is_none());
    assert!(snapshot.configuration.is_none());

    let events = drain(&mut events);
    assert_eq!(count(&events, "configuration_failed"), 1);
    assert_eq!(count(&events, "session_did_start"), 0);
    let transitions: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            CaptureEvent::SessionStateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (SessionState::Idle, SessionState::Configuring),
            (SessionState::Configuring, SessionState::Idle),
        ]
    );

    // Clip requests stay invalid until a start succeeds
    assert!(matches!(
        session.start_clip().await,
        Err(SessionError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_segmentation_misuse_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let (session, bus) = file_session(&temp_dir, Arc::new(MockNegotiator::accepting()));
    let mut events = bus.subscribe();

    session.start(SessionConfiguration::default()).await.unwrap();
    assert_eq!(session.end_clip().await, Err(SessionError::NoOpenClip));

    session.start_clip().await.unwrap();
    assert_eq!(session.start_clip().await, Err(SessionError::ClipAlreadyOpen));

    // The open clip is untouched by the rejected request
    let snapshot = session.snapshot().await.unwrap();
    assert!(snapshot.open_clip.is_some());
    session.end_clip().await.unwrap();

    let events = drain(&mut events);
    assert_eq!(count(&events, "session_request_rejected"), 2);
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test]
async fn test_stop_finalizes_open_clip() {
    let temp_dir = TempDir::new().unwrap();
    let (session, bus) = file_session(&temp_dir, Arc::new(MockNegotiator::accepting()));
    let mut events = bus.subscribe();
    let router = session.router();

    assert!(matches!(
        session.stop().await,
        Err(SessionError::InvalidTransition {
            from: SessionState::Idle,
            ..
        })
    ));

    session.start(SessionConfiguration::default()).await.unwrap();
    session.start_clip().await.unwrap();
    for id in 0..3 {
        router.route(video(id));
    }

    let clips = session.stop().await.unwrap();
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].counts.video.appended, 3);
    assert!(clips[0].path.exists());
    assert_eq!(session.state(), SessionState::Stopped);

    let events = drain(&mut events);
    let completed = events
        .iter()
        .find_map(|e| match e {
            CaptureEvent::SessionCompleted { clips } => Some(clips.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(completed, clips);
    assert_eq!(count(&events, "session_did_stop"), 1);
}

#[tokio::test]
async fn test_restart_keeps_completed_clips() {
    let temp_dir = TempDir::new().unwrap();
    let (session, _bus) = file_session(&temp_dir, Arc::new(MockNegotiator::accepting()));
    let router = session.router();

    session.start(SessionConfiguration::default()).await.unwrap();
    session.start_clip().await.unwrap();
    router.route(video(0));
    session.stop().await.unwrap();

    session.start(SessionConfiguration::default()).await.unwrap();
    session.start_clip().await.unwrap();
    router.route(video(1));
    let second = session.end_clip().await.unwrap();
    assert_eq!(second.index, 1);

    let clips = session.shutdown().await.unwrap();
    assert_eq!(clips.len(), 2);
    assert_eq!(clips[0].index, 0);
    assert_eq!(clips[1].id, second.id);
}

#[tokio::test]
async fn test_requests_apply_in_arrival_order() {
    let temp_dir = TempDir::new().unwrap();
    let negotiator = Arc::new(MockNegotiator::accepting().with_delay(Duration::from_millis(30)));
    let (session, _bus) = file_session(&temp_dir, negotiator);

    // The clip request arrives while negotiation is still in flight
    let (started, clip) = tokio::join!(session.start(SessionConfiguration::default()), async {
        tokio::task::yield_now().await;
        session.start_clip().await
    });

    assert!(started.is_ok());
    assert!(clip.is_ok());
    assert_eq!(session.snapshot().await.unwrap().open_clip, clip.ok());
}

#[tokio::test]
async fn test_reconfigure_keeps_open_clip() {
    let temp_dir = TempDir::new().unwrap();
    let negotiator = Arc::new(MockNegotiator::accepting());
    let (session, bus) = file_session(&temp_dir, negotiator.clone());
    let mut events = bus.subscribe();
    let router = session.router();

    assert!(matches!(
        session.reconfigure(SessionConfiguration::default()).await,
        Err(SessionError::InvalidTransition { .. })
    ));

    session.start(SessionConfiguration::default()).await.unwrap();
    let clip_id = session.start_clip().await.unwrap();
    router.route(video(0));

    let front = SessionConfiguration {
        device_position: DevicePosition::Front,
        ..SessionConfiguration::default()
    };
    let applied = session.reconfigure(front.clone()).await.unwrap();
    assert_eq!(applied, front);
    router.route(video(1));

    negotiator.set_failure(Some("format unsupported".to_string()));
    let rejected = SessionConfiguration {
        capture_mode: CaptureMode::Photo,
        ..front.clone()
    };
    assert!(matches!(
        session.reconfigure(rejected).await,
        Err(SessionError::Configuration { .. })
    ));

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Running);
    assert_eq!(snapshot.open_clip, Some(clip_id));
    assert_eq!(snapshot.device_position, DevicePosition::Front);
    assert_eq!(snapshot.capture_mode, CaptureMode::Video);

    let clip = session.end_clip().await.unwrap();
    assert_eq!(clip.counts.video.appended, 2);

    let events = drain(&mut events);
    assert_eq!(count(&events, "device_position_will_change"), 1);
    assert_eq!(count(&events, "device_position_did_change"), 1);
    assert_eq!(count(&events, "configuration_failed"), 1);
}

#[tokio::test]
async fn test_source_events_update_session() {
    let temp_dir = TempDir::new().unwrap();
    let (session, bus) = file_session(&temp_dir, Arc::new(MockNegotiator::accepting()));
    let mut events = bus.subscribe();

    session.start(SessionConfiguration::default()).await.unwrap();
    session
        .handle_source_event(SourceEvent::OrientationChanged {
            orientation: DeviceOrientation::LandscapeRight,
        })
        .await
        .unwrap();
    session
        .handle_source_event(SourceEvent::ZoomChanged { factor: 2.5 })
        .await
        .unwrap();
    session
        .handle_source_event(SourceEvent::InterruptionBegan {
            reason: "camera in use".to_string(),
        })
        .await
        .unwrap();

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Interrupted);
    assert_eq!(snapshot.orientation, DeviceOrientation::LandscapeRight);
    assert_eq!(snapshot.zoom_factor, 2.5);

    session
        .handle_source_event(SourceEvent::InterruptionEnded)
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Running);

    let events = drain(&mut events);
    assert_eq!(count(&events, "device_orientation_changed"), 1);
    assert_eq!(count(&events, "video_zoom_updated"), 1);
}

#[tokio::test]
async fn test_capture_mode_change_notifies() {
    let temp_dir = TempDir::new().unwrap();
    let (session, bus) = file_session(&temp_dir, Arc::new(MockNegotiator::accepting()));
    let mut events = bus.subscribe();

    session.set_capture_mode(CaptureMode::Photo).await.unwrap();
    session.set_capture_mode(CaptureMode::Photo).await.unwrap();
    assert_eq!(
        session.snapshot().await.unwrap().capture_mode,
        CaptureMode::Photo
    );

    let events = drain(&mut events);
    assert_eq!(count(&events, "capture_mode_will_change"), 1);
    assert_eq!(count(&events, "capture_mode_did_change"), 1);
}

#[tokio::test]
async fn test_storage_failure_leaves_no_open_clip() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    let session = CaptureSession::new(
        &config,
        Arc::new(MockNegotiator::accepting()),
        Arc::new(FlakySink::unavailable()),
        Arc::new(EventBus::new(64)),
    );

    session.start(SessionConfiguration::default()).await.unwrap();
    assert!(matches!(
        session.start_clip().await,
        Err(SessionError::Storage { .. })
    ));
    assert!(session.snapshot().await.unwrap().open_clip.is_none());
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test]
async fn test_depth_recorded_and_published() {
    let temp_dir = TempDir::new().unwrap();
    let (session, bus) = file_session(&temp_dir, Arc::new(MockNegotiator::accepting()));
    let mut events = bus.subscribe();
    let router = session.router();

    session.start(SessionConfiguration::default()).await.unwrap();
    session.start_clip().await.unwrap();

    let depth = Sample::new(1, Track::Depth, Duration::from_millis(5), vec![0; 32], SampleFormat::Depth16);
    assert_eq!(router.route(depth), RouteOutcome::Accepted);
    let clip = session.end_clip().await.unwrap();
    assert_eq!(clip.counts.depth.appended, 1);

    let events = drain(&mut events);
    assert_eq!(count(&events, "depth_data_output"), 1);
}

#[tokio::test]
async fn test_shutdown_finalizes_running_session() {
    let temp_dir = TempDir::new().unwrap();
    let (session, _bus) = file_session(&temp_dir, Arc::new(MockNegotiator::accepting()));
    let router = session.router();

    session.start(SessionConfiguration::default()).await.unwrap();
    session.start_clip().await.unwrap();
    router.route(video(0));
    router.route(video(1));

    let clips = session.shutdown().await.unwrap();
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].counts.video.appended, 2);
    assert_eq!(router.state(), SessionState::Stopped);
}
