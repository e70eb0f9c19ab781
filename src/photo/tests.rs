use super::*;
use crate::config::PhotoConfig;
use crate::error::PhotoError;
use crate::events::{CaptureEvent, EventBus};
use crate::mock::MockPhotoPipeline;
use crate::router::BufferRouter;
use crate::sample::{Sample, SampleFormat};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn jpeg_frame() -> Sample {
    Sample::video(
        1,
        Duration::ZERO,
        vec![0xFF, 0xD8, 0x00, 0x11, 0xFF, 0xD9],
        64,
        48,
        SampleFormat::Mjpeg,
    )
}

fn rgb_frame(id: u64) -> Sample {
    Sample::video(
        id,
        Duration::from_millis(id * 33),
        vec![90u8; 16 * 8 * 3],
        16,
        8,
        SampleFormat::Rgb24,
    )
}

fn drain(events: &mut broadcast::Receiver<CaptureEvent>) -> Vec<CaptureEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn coordinator_with(
    pipeline: MockPhotoPipeline,
    config: PhotoConfig,
) -> (PhotoCaptureCoordinator, Arc<EventBus>, BufferRouter) {
    let bus = Arc::new(EventBus::new(128));
    let router = BufferRouter::new(Arc::clone(&bus));
    let coordinator = PhotoCaptureCoordinator::with_pipeline(
        &config,
        Arc::new(pipeline),
        router.clone(),
        Arc::clone(&bus),
    );
    (coordinator, bus, router)
}

#[tokio::test]
async fn test_jpeg_and_raw_resolve_without_clip() {
    let (coordinator, bus, _router) =
        coordinator_with(MockPhotoPipeline::new(jpeg_frame()), PhotoConfig::default());
    let mut events = bus.subscribe();

    let ticket = coordinator
        .capture(PhotoRequest::new([PhotoVariant::Jpeg, PhotoVariant::Raw]))
        .unwrap();
    let request_id = ticket.request_id();
    let result = ticket.wait().await.unwrap();

    assert_eq!(result.request_id, request_id);
    assert_eq!(result.artifacts.len(), 2);
    assert_eq!(result.artifact(PhotoVariant::Jpeg), Some(&jpeg_frame().data[..]));
    assert_eq!(result.artifact(PhotoVariant::Raw), Some(&jpeg_frame().data[..]));
    assert!(result.missing().is_empty());
    assert_eq!((result.metadata.width, result.metadata.height), (64, 48));

    let events = drain(&mut events);
    let names: Vec<_> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(names.first(), Some(&"photo_will_capture"));
    assert_eq!(names.get(1), Some(&"photo_did_capture"));
    assert_eq!(names.last(), Some(&"photo_completed"));
    let processed = names.iter().filter(|n| **n == "photo_variant_processed").count();
    assert_eq!(processed, 2);
}

/// Keep routing frames until the returned task is aborted
fn feed_frames(router: &BufferRouter, frame: fn(u64) -> Sample) -> tokio::task::JoinHandle<()> {
    let router = router.clone();
    tokio::spawn(async move {
        for id in 10.. {
            router.route(frame(id));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}

#[tokio::test]
async fn test_frozen_frame_skips_raw_but_delivers_jpeg() {
    let (coordinator, bus, router) =
        coordinator_with(MockPhotoPipeline::new(jpeg_frame()), PhotoConfig::default());
    let mut events = bus.subscribe();

    let ticket = coordinator
        .capture(PhotoRequest::new([PhotoVariant::Jpeg, PhotoVariant::Raw]).from_video_frame())
        .unwrap();
    assert_eq!(
        ticket.rejected(),
        &[PhotoError::UnsupportedVariant {
            variant: PhotoVariant::Raw
        }]
    );
    // Reported before any frame arrives
    assert!(matches!(
        events.try_recv().unwrap(),
        CaptureEvent::PhotoVariantUnsupported {
            variant: PhotoVariant::Raw,
            ..
        }
    ));

    let feeder = feed_frames(&router, |id| {
        let mut frame = jpeg_frame();
        frame.id = id;
        frame
    });
    let result = ticket.wait().await.unwrap();
    feeder.abort();

    assert_eq!(result.artifact(PhotoVariant::Jpeg), Some(&jpeg_frame().data[..]));
    assert_eq!(result.artifacts.get(&PhotoVariant::Raw), Some(&None));
    assert_eq!(result.missing(), vec![PhotoVariant::Raw]);

    let events = drain(&mut events);
    assert!(events
        .iter()
        .all(|e| !matches!(e, CaptureEvent::PhotoFailed { .. })));
    let processed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            CaptureEvent::PhotoVariantProcessed { variant, available, .. } => Some((*variant, *available)),
            _ => None,
        })
        .collect();
    assert_eq!(processed, vec![(PhotoVariant::Jpeg, true)]);
    assert!(events
        .iter()
        .any(|e| matches!(e, CaptureEvent::PhotoCompleted { request_id } if *request_id == result.request_id)));
}

#[tokio::test]
async fn test_frozen_frame_raw_only_rejected() {
    let (coordinator, bus, _router) =
        coordinator_with(MockPhotoPipeline::new(jpeg_frame()), PhotoConfig::default());
    let mut events = bus.subscribe();

    let request = PhotoRequest::new([PhotoVariant::Raw]).from_video_frame();
    match coordinator.capture(request) {
        Err(PhotoError::UnsupportedVariant { variant }) => assert_eq!(variant, PhotoVariant::Raw),
        other => panic!("Expected unsupported variant, got {:?}", other.map(|t| t.request_id())),
    }

    match events.try_recv().unwrap() {
        CaptureEvent::PhotoFailed { .. } => {}
        other => panic!("Unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_frozen_frame_jpeg_succeeds() {
    let (coordinator, _bus, router) =
        coordinator_with(MockPhotoPipeline::new(jpeg_frame()), PhotoConfig::default());

    let ticket = coordinator
        .capture(PhotoRequest::new([PhotoVariant::Jpeg, PhotoVariant::Thumbnail]).from_video_frame())
        .unwrap();

    let feeder = feed_frames(&router, rgb_frame);

    let result = ticket.wait().await.unwrap();
    feeder.abort();

    assert_eq!(result.metadata.source, PhotoSource::VideoFrame);
    assert_eq!((result.metadata.width, result.metadata.height), (16, 8));
    assert_eq!(result.artifacts.len(), 2);
    if cfg!(feature = "frame_render") {
        assert!(result.missing().is_empty());
    } else {
        assert_eq!(result.missing().len(), 2);
    }
    assert_eq!(router.stats().frames_frozen, 1);
}

#[tokio::test]
async fn test_sensor_failure_reports_no_variants() {
    let (coordinator, bus, _router) = coordinator_with(
        MockPhotoPipeline::failing(jpeg_frame(), "sensor offline"),
        PhotoConfig::default(),
    );
    let mut events = bus.subscribe();

    let ticket = coordinator
        .capture(PhotoRequest::new([PhotoVariant::Jpeg, PhotoVariant::Thumbnail]))
        .unwrap();
    let request_id = ticket.request_id();

    match ticket.wait().await {
        Err(PhotoError::CaptureFailed { request_id: id, details }) => {
            assert_eq!(id, request_id);
            assert!(details.contains("sensor offline"));
        }
        other => panic!("Expected capture failure, got {:?}", other),
    }

    let events = drain(&mut events);
    assert!(events
        .iter()
        .all(|e| !matches!(e, CaptureEvent::PhotoVariantProcessed { .. })));
    assert!(matches!(
        events.last(),
        Some(CaptureEvent::PhotoFailed { request_id: id, .. }) if *id == request_id
    ));
}

#[tokio::test]
async fn test_empty_request_rejected() {
    let (coordinator, _bus, _router) =
        coordinator_with(MockPhotoPipeline::new(jpeg_frame()), PhotoConfig::default());
    assert!(matches!(
        coordinator.capture(PhotoRequest::new(Vec::<PhotoVariant>::new())),
        Err(PhotoError::EmptyRequest)
    ));
}

#[tokio::test]
async fn test_sensor_timeout() {
    let config = PhotoConfig {
        timeout_ms: 20,
        ..PhotoConfig::default()
    };
    let pipeline = MockPhotoPipeline::new(jpeg_frame()).with_delay(Duration::from_millis(500));
    let (coordinator, _bus, _router) = coordinator_with(pipeline, config);

    let ticket = coordinator
        .capture(PhotoRequest::new([PhotoVariant::Jpeg]))
        .unwrap();
    assert!(matches!(
        ticket.wait().await,
        Err(PhotoError::CaptureFailed { .. })
    ));
}

#[tokio::test]
async fn test_frame_wait_expires_without_video() {
    let config = PhotoConfig {
        frame_wait_ms: 20,
        ..PhotoConfig::default()
    };
    let bus = Arc::new(EventBus::new(16));
    let router = BufferRouter::new(Arc::clone(&bus));
    let coordinator = PhotoCaptureCoordinator::new(&config, router, bus);

    let ticket = coordinator
        .capture(PhotoRequest::new([PhotoVariant::Jpeg]).from_video_frame())
        .unwrap();
    assert!(matches!(
        ticket.wait().await,
        Err(PhotoError::CaptureFailed { .. })
    ));
}

#[tokio::test]
async fn test_pipeline_request_without_pipeline_fails() {
    let bus = Arc::new(EventBus::new(16));
    let router = BufferRouter::new(Arc::clone(&bus));
    let coordinator = PhotoCaptureCoordinator::new(&PhotoConfig::default(), router, bus);

    let ticket = coordinator
        .capture(PhotoRequest::new([PhotoVariant::Raw]))
        .unwrap();
    assert!(matches!(
        ticket.wait().await,
        Err(PhotoError::CaptureFailed { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_requests_keep_their_ids() {
    let (coordinator, _bus, _router) =
        coordinator_with(MockPhotoPipeline::new(jpeg_frame()), PhotoConfig::default());

    let tickets: Vec<_> = (0..4)
        .map(|_| {
            coordinator
                .capture(PhotoRequest::new([PhotoVariant::Raw]))
                .unwrap()
        })
        .collect();
    let ids: Vec<u64> = tickets.iter().map(|t| t.request_id()).collect();

    for (ticket, id) in tickets.into_iter().zip(ids.iter()) {
        assert_eq!(ticket.wait().await.unwrap().request_id, *id);
    }

    let mut unique = ids.clone();
    unique.dedup();
    assert_eq!(unique.len(), 4);
}
