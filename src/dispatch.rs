use crate::clip::Clip;
use crate::events::{
    AuthorizationStatus, CaptureEvent, DeviceAdjustment, EventBus, EventFilter, EventKind,
    MediaType,
};
use crate::photo::{PhotoSource, PhotoVariant};
use crate::router::SkipReason;
use crate::sample::{DeviceOrientation, Track};
use crate::session::{
    AudioConfiguration, CaptureMode, DevicePosition, FlashMode, SessionState, TorchMode,
    VideoConfiguration,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

pub trait AuthorizationObserver: Send + Sync {
    fn authorization_changed(&self, _media: MediaType, _status: AuthorizationStatus) {}
}

pub trait ConfigurationObserver: Send + Sync {
    fn video_configuration_updated(&self, _configuration: &VideoConfiguration) {}
    fn audio_configuration_updated(&self, _configuration: &AudioConfiguration) {}
    fn configuration_failed(&self, _details: &str) {}
}

pub trait SessionObserver: Send + Sync {
    fn state_changed(&self, _from: SessionState, _to: SessionState) {}
    fn session_will_start(&self) {}
    fn session_did_start(&self) {}
    fn session_did_stop(&self) {}
    fn session_interrupted(&self, _reason: &str) {}
    fn session_interruption_ended(&self) {}
    fn capture_mode_will_change(&self, _from: CaptureMode, _to: CaptureMode) {}
    fn capture_mode_did_change(&self, _mode: CaptureMode) {}
    fn request_rejected(&self, _operation: &str, _error: &str) {}
}

pub trait DeviceObserver: Send + Sync {
    fn position_will_change(&self, _position: DevicePosition) {}
    fn position_did_change(&self, _position: DevicePosition) {}
    fn orientation_changed(&self, _orientation: DeviceOrientation) {}
    fn format_changed(&self, _format: &str) {}
    fn clean_aperture_changed(&self, _x: f32, _y: f32, _width: f32, _height: f32) {}
    fn lens_position_changed(&self, _position: f32) {}
    fn adjustment_changed(&self, _adjustment: DeviceAdjustment, _active: bool) {}
}

pub trait FlashTorchObserver: Send + Sync {
    fn flash_mode_changed(&self, _mode: FlashMode) {}
    fn torch_mode_changed(&self, _mode: TorchMode) {}
    fn flash_active_changed(&self, _active: bool) {}
    fn torch_active_changed(&self, _active: bool) {}
    fn availability_changed(&self, _flash_available: bool, _torch_available: bool) {}
}

/// Clip lifecycle and per-sample buffer flow
pub trait VideoObserver: Send + Sync {
    fn zoom_updated(&self, _factor: f32) {}
    fn clip_started(&self, _clip_id: Uuid, _index: usize) {}
    fn clip_completed(&self, _clip: &Clip) {}
    fn sample_appended(&self, _clip_id: Uuid, _track: Track, _sample_id: u64, _timestamp: Duration) {}
    fn sample_skipped(
        &self,
        _clip_id: Option<Uuid>,
        _track: Track,
        _sample_id: u64,
        _timestamp: Duration,
        _reason: &SkipReason,
    ) {
    }
    fn session_completed(&self, _clips: &[Clip]) {}
}

/// Photo progress, correlated by request id
pub trait PhotoObserver: Send + Sync {
    fn photo_will_capture(&self, _request_id: u64, _source: PhotoSource) {}
    fn photo_did_capture(&self, _request_id: u64) {}
    fn photo_variant_processed(&self, _request_id: u64, _variant: PhotoVariant, _available: bool) {}
    fn photo_variant_unsupported(&self, _request_id: u64, _variant: PhotoVariant) {}
    fn photo_completed(&self, _request_id: u64) {}
    fn photo_failed(&self, _request_id: u64, _error: &str) {}
}

pub trait DepthObserver: Send + Sync {
    fn depth_data_output(&self, _sample_id: u64, _timestamp: Duration) {}
    fn depth_data_dropped(&self, _sample_id: u64, _timestamp: Duration, _reason: &SkipReason) {}
}

pub trait MetadataObserver: Send + Sync {
    fn metadata_objects_detected(&self, _sample_id: u64, _timestamp: Duration, _payload: &[u8]) {}
}

/// Live registration of one observer; dropping it unsubscribes
pub struct Subscription {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop delivery and wait for the observer task to exit
    pub async fn cancel(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Hands bus notifications to observers, one task per subscription.
///
/// Observers run on their own tasks, so a slow observer never holds up the
/// sample path. Each observer sees its concern's events in publish order;
/// a video or depth observer that falls behind loses per-sample
/// notifications, but no state, clip or photo event is ever skipped.
pub struct EventDispatcher {
    event_bus: Arc<EventBus>,
    shutdown: CancellationToken,
}

impl EventDispatcher {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel every subscription made through this dispatcher
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Deliver every event matching `filter` to `handler`
    pub fn subscribe_with<F>(&self, name: &str, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(&CaptureEvent) + Send + 'static,
    {
        let mut receiver = self.event_bus.receiver(filter, name);
        let token = self.shutdown.child_token();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) => handler(&event),
                        Err(_) => break,
                    },
                }
            }
            debug!("Observer '{}' unsubscribed", receiver.name());
        });

        Subscription {
            name: name.to_string(),
            token,
            handle: Some(handle),
        }
    }

    fn subscribe_kind<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&CaptureEvent) + Send + 'static,
    {
        let name = format!("{:?}", kind).to_lowercase();
        self.subscribe_with(&name, EventFilter::Kinds(vec![kind]), handler)
    }

    pub fn subscribe_authorization(&self, observer: Arc<dyn AuthorizationObserver>) -> Subscription {
        self.subscribe_kind(EventKind::Authorization, move |event| {
            if let CaptureEvent::AuthorizationChanged { media, status } = event {
                observer.authorization_changed(*media, *status);
            }
        })
    }

    pub fn subscribe_configuration(&self, observer: Arc<dyn ConfigurationObserver>) -> Subscription {
        self.subscribe_kind(EventKind::Configuration, move |event| match event {
            CaptureEvent::VideoConfigurationUpdated { configuration } => {
                observer.video_configuration_updated(configuration)
            }
            CaptureEvent::AudioConfigurationUpdated { configuration } => {
                observer.audio_configuration_updated(configuration)
            }
            CaptureEvent::ConfigurationFailed { details } => observer.configuration_failed(details),
            _ => {}
        })
    }

    pub fn subscribe_session(&self, observer: Arc<dyn SessionObserver>) -> Subscription {
        self.subscribe_kind(EventKind::Session, move |event| match event {
            CaptureEvent::SessionStateChanged { from, to } => observer.state_changed(*from, *to),
            CaptureEvent::SessionWillStart => observer.session_will_start(),
            CaptureEvent::SessionDidStart => observer.session_did_start(),
            CaptureEvent::SessionDidStop => observer.session_did_stop(),
            CaptureEvent::SessionInterrupted { reason } => observer.session_interrupted(reason),
            CaptureEvent::SessionInterruptionEnded => observer.session_interruption_ended(),
            CaptureEvent::CaptureModeWillChange { from, to } => {
                observer.capture_mode_will_change(*from, *to)
            }
            CaptureEvent::CaptureModeDidChange { mode } => observer.capture_mode_did_change(*mode),
            CaptureEvent::SessionRequestRejected { operation, error } => {
                observer.request_rejected(operation, error)
            }
            _ => {}
        })
    }

    pub fn subscribe_device(&self, observer: Arc<dyn DeviceObserver>) -> Subscription {
        self.subscribe_kind(EventKind::Device, move |event| match event {
            CaptureEvent::DevicePositionWillChange { position } => {
                observer.position_will_change(*position)
            }
            CaptureEvent::DevicePositionDidChange { position } => {
                observer.position_did_change(*position)
            }
            CaptureEvent::DeviceOrientationChanged { orientation } => {
                observer.orientation_changed(*orientation)
            }
            CaptureEvent::DeviceFormatChanged { format } => observer.format_changed(format),
            CaptureEvent::CleanApertureChanged {
                x,
                y,
                width,
                height,
            } => observer.clean_aperture_changed(*x, *y, *width, *height),
            CaptureEvent::LensPositionChanged { position } => {
                observer.lens_position_changed(*position)
            }
            CaptureEvent::DeviceAdjustmentChanged { adjustment, active } => {
                observer.adjustment_changed(*adjustment, *active)
            }
            _ => {}
        })
    }

    pub fn subscribe_flash_torch(&self, observer: Arc<dyn FlashTorchObserver>) -> Subscription {
        self.subscribe_kind(EventKind::FlashTorch, move |event| match event {
            CaptureEvent::FlashModeChanged { mode } => observer.flash_mode_changed(*mode),
            CaptureEvent::TorchModeChanged { mode } => observer.torch_mode_changed(*mode),
            CaptureEvent::FlashActiveChanged { active } => observer.flash_active_changed(*active),
            CaptureEvent::TorchActiveChanged { active } => observer.torch_active_changed(*active),
            CaptureEvent::FlashTorchAvailabilityChanged {
                flash_available,
                torch_available,
            } => observer.availability_changed(*flash_available, *torch_available),
            _ => {}
        })
    }

    pub fn subscribe_video(&self, observer: Arc<dyn VideoObserver>) -> Subscription {
        self.subscribe_kind(EventKind::Video, move |event| match event {
            CaptureEvent::VideoZoomUpdated { factor } => observer.zoom_updated(*factor),
            CaptureEvent::ClipStarted { clip_id, index } => observer.clip_started(*clip_id, *index),
            CaptureEvent::ClipCompleted { clip } => observer.clip_completed(clip),
            CaptureEvent::SampleAppended {
                clip_id,
                track,
                sample_id,
                timestamp,
            } => observer.sample_appended(*clip_id, *track, *sample_id, *timestamp),
            CaptureEvent::SampleSkipped {
                clip_id,
                track,
                sample_id,
                timestamp,
                reason,
            } => observer.sample_skipped(*clip_id, *track, *sample_id, *timestamp, reason),
            CaptureEvent::SessionCompleted { clips } => observer.session_completed(clips),
            _ => {}
        })
    }

    pub fn subscribe_photo(&self, observer: Arc<dyn PhotoObserver>) -> Subscription {
        self.subscribe_kind(EventKind::Photo, move |event| match event {
            CaptureEvent::PhotoWillCapture { request_id, source } => {
                observer.photo_will_capture(*request_id, *source)
            }
            CaptureEvent::PhotoDidCapture { request_id } => observer.photo_did_capture(*request_id),
            CaptureEvent::PhotoVariantProcessed {
                request_id,
                variant,
                available,
            } => observer.photo_variant_processed(*request_id, *variant, *available),
            CaptureEvent::PhotoVariantUnsupported {
                request_id,
                variant,
            } => observer.photo_variant_unsupported(*request_id, *variant),
            CaptureEvent::PhotoCompleted { request_id } => observer.photo_completed(*request_id),
            CaptureEvent::PhotoFailed { request_id, error } => {
                observer.photo_failed(*request_id, error)
            }
            _ => {}
        })
    }

    pub fn subscribe_depth(&self, observer: Arc<dyn DepthObserver>) -> Subscription {
        self.subscribe_kind(EventKind::Depth, move |event| match event {
            CaptureEvent::DepthDataOutput {
                sample_id,
                timestamp,
            } => observer.depth_data_output(*sample_id, *timestamp),
            CaptureEvent::DepthDataDropped {
                sample_id,
                timestamp,
                reason,
            } => observer.depth_data_dropped(*sample_id, *timestamp, reason),
            _ => {}
        })
    }

    pub fn subscribe_metadata(&self, observer: Arc<dyn MetadataObserver>) -> Subscription {
        self.subscribe_kind(EventKind::Metadata, move |event| {
            if let CaptureEvent::MetadataObjectsDetected {
                sample_id,
                timestamp,
                payload,
            } = event
            {
                observer.metadata_objects_detected(*sample_id, *timestamp, payload);
            }
        })
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
