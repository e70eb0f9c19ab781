use crate::clip::Clip;
use crate::error::EventBusError;
use crate::photo::{PhotoSource, PhotoVariant};
use crate::router::SkipReason;
use crate::sample::{DeviceOrientation, Track};
use crate::session::{
    AudioConfiguration, CaptureMode, DevicePosition, FlashMode, SessionState, TorchMode,
    VideoConfiguration,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Media type an authorization status applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    NotDetermined,
    NotAuthorized,
    Authorized,
}

/// Device adjustments that report a start and an end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceAdjustment {
    Focus,
    Exposure,
    WhiteBalance,
}

/// Notification concern; observers subscribe per concern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Authorization,
    Configuration,
    Session,
    Device,
    FlashTorch,
    Video,
    Photo,
    Depth,
    Metadata,
}

/// Events emitted by the capture engine
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    AuthorizationChanged {
        media: MediaType,
        status: AuthorizationStatus,
    },

    VideoConfigurationUpdated {
        configuration: VideoConfiguration,
    },
    AudioConfigurationUpdated {
        configuration: AudioConfiguration,
    },
    /// Device or format negotiation failed
    ConfigurationFailed {
        details: String,
    },

    SessionStateChanged {
        from: SessionState,
        to: SessionState,
    },
    SessionWillStart,
    SessionDidStart,
    SessionDidStop,
    SessionInterrupted {
        reason: String,
    },
    SessionInterruptionEnded,
    CaptureModeWillChange {
        from: CaptureMode,
        to: CaptureMode,
    },
    CaptureModeDidChange {
        mode: CaptureMode,
    },
    /// A lifecycle or segmentation request was rejected
    SessionRequestRejected {
        operation: &'static str,
        error: String,
    },

    DevicePositionWillChange {
        position: DevicePosition,
    },
    DevicePositionDidChange {
        position: DevicePosition,
    },
    DeviceOrientationChanged {
        orientation: DeviceOrientation,
    },
    DeviceFormatChanged {
        format: String,
    },
    CleanApertureChanged {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    LensPositionChanged {
        position: f32,
    },
    /// `active` is true when the adjustment begins and false when it settles
    DeviceAdjustmentChanged {
        adjustment: DeviceAdjustment,
        active: bool,
    },

    FlashModeChanged {
        mode: FlashMode,
    },
    TorchModeChanged {
        mode: TorchMode,
    },
    FlashActiveChanged {
        active: bool,
    },
    TorchActiveChanged {
        active: bool,
    },
    FlashTorchAvailabilityChanged {
        flash_available: bool,
        torch_available: bool,
    },

    VideoZoomUpdated {
        factor: f32,
    },
    ClipStarted {
        clip_id: Uuid,
        index: usize,
    },
    ClipCompleted {
        clip: Clip,
    },
    /// A sample was durably written into a clip
    SampleAppended {
        clip_id: Uuid,
        track: Track,
        sample_id: u64,
        timestamp: Duration,
    },
    /// A sample was deliberately not written
    SampleSkipped {
        clip_id: Option<Uuid>,
        track: Track,
        sample_id: u64,
        timestamp: Duration,
        reason: SkipReason,
    },
    SessionCompleted {
        clips: Vec<Clip>,
    },

    PhotoWillCapture {
        request_id: u64,
        source: PhotoSource,
    },
    PhotoDidCapture {
        request_id: u64,
    },
    /// One requested variant resolved; `available` is false for a recorded absence
    PhotoVariantProcessed {
        request_id: u64,
        variant: PhotoVariant,
        available: bool,
    },
    /// A requested variant the source cannot produce; the rest of the request goes on
    PhotoVariantUnsupported {
        request_id: u64,
        variant: PhotoVariant,
    },
    PhotoCompleted {
        request_id: u64,
    },
    PhotoFailed {
        request_id: u64,
        error: String,
    },

    DepthDataOutput {
        sample_id: u64,
        timestamp: Duration,
    },
    DepthDataDropped {
        sample_id: u64,
        timestamp: Duration,
        reason: SkipReason,
    },

    MetadataObjectsDetected {
        sample_id: u64,
        timestamp: Duration,
        payload: Arc<Vec<u8>>,
    },
}

impl CaptureEvent {
    /// Concern this event is delivered under
    pub fn kind(&self) -> EventKind {
        use CaptureEvent::*;
        match self {
            AuthorizationChanged { .. } => EventKind::Authorization,
            VideoConfigurationUpdated { .. }
            | AudioConfigurationUpdated { .. }
            | ConfigurationFailed { .. } => EventKind::Configuration,
            SessionStateChanged { .. }
            | SessionWillStart
            | SessionDidStart
            | SessionDidStop
            | SessionInterrupted { .. }
            | SessionInterruptionEnded
            | CaptureModeWillChange { .. }
            | CaptureModeDidChange { .. }
            | SessionRequestRejected { .. } => EventKind::Session,
            DevicePositionWillChange { .. }
            | DevicePositionDidChange { .. }
            | DeviceOrientationChanged { .. }
            | DeviceFormatChanged { .. }
            | CleanApertureChanged { .. }
            | LensPositionChanged { .. }
            | DeviceAdjustmentChanged { .. } => EventKind::Device,
            FlashModeChanged { .. }
            | TorchModeChanged { .. }
            | FlashActiveChanged { .. }
            | TorchActiveChanged { .. }
            | FlashTorchAvailabilityChanged { .. } => EventKind::FlashTorch,
            VideoZoomUpdated { .. }
            | ClipStarted { .. }
            | ClipCompleted { .. }
            | SampleAppended { .. }
            | SampleSkipped { .. }
            | SessionCompleted { .. } => EventKind::Video,
            PhotoWillCapture { .. }
            | PhotoDidCapture { .. }
            | PhotoVariantProcessed { .. }
            | PhotoVariantUnsupported { .. }
            | PhotoCompleted { .. }
            | PhotoFailed { .. } => EventKind::Photo,
            DepthDataOutput { .. } | DepthDataDropped { .. } => EventKind::Depth,
            MetadataObjectsDetected { .. } => EventKind::Metadata,
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        use CaptureEvent::*;
        match self {
            AuthorizationChanged { .. } => "authorization_changed",
            VideoConfigurationUpdated { .. } => "video_configuration_updated",
            AudioConfigurationUpdated { .. } => "audio_configuration_updated",
            ConfigurationFailed { .. } => "configuration_failed",
            SessionStateChanged { .. } => "session_state_changed",
            SessionWillStart => "session_will_start",
            SessionDidStart => "session_did_start",
            SessionDidStop => "session_did_stop",
            SessionInterrupted { .. } => "session_interrupted",
            SessionInterruptionEnded => "session_interruption_ended",
            CaptureModeWillChange { .. } => "capture_mode_will_change",
            CaptureModeDidChange { .. } => "capture_mode_did_change",
            SessionRequestRejected { .. } => "session_request_rejected",
            DevicePositionWillChange { .. } => "device_position_will_change",
            DevicePositionDidChange { .. } => "device_position_did_change",
            DeviceOrientationChanged { .. } => "device_orientation_changed",
            DeviceFormatChanged { .. } => "device_format_changed",
            CleanApertureChanged { .. } => "clean_aperture_changed",
            LensPositionChanged { .. } => "lens_position_changed",
            DeviceAdjustmentChanged { .. } => "device_adjustment_changed",
            FlashModeChanged { .. } => "flash_mode_changed",
            TorchModeChanged { .. } => "torch_mode_changed",
            FlashActiveChanged { .. } => "flash_active_changed",
            TorchActiveChanged { .. } => "torch_active_changed",
            FlashTorchAvailabilityChanged { .. } => "flash_torch_availability_changed",
            VideoZoomUpdated { .. } => "video_zoom_updated",
            ClipStarted { .. } => "clip_started",
            ClipCompleted { .. } => "clip_completed",
            SampleAppended { .. } => "sample_appended",
            SampleSkipped { .. } => "sample_skipped",
            SessionCompleted { .. } => "session_completed",
            PhotoWillCapture { .. } => "photo_will_capture",
            PhotoDidCapture { .. } => "photo_did_capture",
            PhotoVariantProcessed { .. } => "photo_variant_processed",
            PhotoVariantUnsupported { .. } => "photo_variant_unsupported",
            PhotoCompleted { .. } => "photo_completed",
            PhotoFailed { .. } => "photo_failed",
            DepthDataOutput { .. } => "depth_data_output",
            DepthDataDropped { .. } => "depth_data_dropped",
            MetadataObjectsDetected { .. } => "metadata_objects_detected",
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        use CaptureEvent::*;
        match self {
            SessionStateChanged { from, to } => format!("Session {:?} -> {:?}", from, to),
            SessionInterrupted { reason } => format!("Session interrupted: {}", reason),
            ConfigurationFailed { details } => format!("Configuration failed: {}", details),
            SessionRequestRejected { operation, error } => {
                format!("Rejected {}: {}", operation, error)
            }
            ClipStarted { clip_id, index } => format!("Clip {} started ({})", index, clip_id),
            ClipCompleted { clip } => format!(
                "Clip {} completed: {} video / {} audio samples",
                clip.id,
                clip.counts.video.appended,
                clip.counts.audio.appended
            ),
            SampleSkipped {
                track,
                sample_id,
                reason,
                ..
            } => format!("Skipped {} sample {}: {:?}", track, sample_id, reason),
            SessionCompleted { clips } => format!("Session completed with {} clips", clips.len()),
            PhotoVariantProcessed {
                request_id,
                variant,
                available,
            } => format!(
                "Photo {} variant {:?} {}",
                request_id,
                variant,
                if *available { "ready" } else { "absent" }
            ),
            PhotoVariantUnsupported {
                request_id,
                variant,
            } => format!("Photo {} cannot produce {:?}", request_id, variant),
            PhotoFailed { request_id, error } => format!("Photo {} failed: {}", request_id, error),
            VideoZoomUpdated { factor } => format!("Zoom factor {:.2}", factor),
            _ => self.event_type().replace('_', " "),
        }
    }

    /// Per-sample notifications, the only events a lagging receiver may lose
    pub fn is_sample_flow(&self) -> bool {
        matches!(
            self,
            CaptureEvent::SampleAppended { .. }
                | CaptureEvent::SampleSkipped { .. }
                | CaptureEvent::DepthDataOutput { .. }
                | CaptureEvent::DepthDataDropped { .. }
                | CaptureEvent::MetadataObjectsDetected { .. }
        )
    }
}

/// One filtered receiver registered on the bus
struct Listener {
    name: String,
    filter: EventFilter,
    sender: mpsc::UnboundedSender<CaptureEvent>,
    queued_flow: Arc<AtomicUsize>,
    dropped_flow: Arc<AtomicU64>,
}

/// Bus carrying every engine notification.
///
/// Publishing never waits. Filtered receivers only queue the events their
/// filter accepts; lifecycle events are always queued, while sample-flow
/// events are dropped for a receiver that already has `capacity` of them
/// pending. Raw `subscribe` receivers share one lossy broadcast ring.
pub struct EventBus {
    sender: broadcast::Sender<CaptureEvent>,
    listeners: Mutex<Vec<Listener>>,
    flow_capacity: usize,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            listeners: Mutex::new(Vec::new()),
            flow_capacity: capacity,
        }
    }

    /// Raw receiver over every event; lags once `capacity` events are unread
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.sender.subscribe()
    }

    /// Filtered receiver that never loses lifecycle events
    pub fn receiver<S: Into<String>>(&self, filter: EventFilter, name: S) -> EventReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        let name = name.into();
        let queued_flow = Arc::new(AtomicUsize::new(0));
        let dropped_flow = Arc::new(AtomicU64::new(0));

        self.listeners.lock().push(Listener {
            name: name.clone(),
            filter,
            sender,
            queued_flow: Arc::clone(&queued_flow),
            dropped_flow: Arc::clone(&dropped_flow),
        });

        EventReceiver {
            receiver,
            queued_flow,
            dropped_flow,
            name,
        }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: CaptureEvent) -> Result<usize, EventBusError> {
        match &event {
            CaptureEvent::ConfigurationFailed { details } => {
                error!("Configuration failed: {}", details);
            }
            CaptureEvent::SessionRequestRejected { operation, error } => {
                warn!("Rejected {}: {}", operation, error);
            }
            CaptureEvent::SessionStateChanged { from, to } => {
                info!("Session state {:?} -> {:?}", from, to);
            }
            CaptureEvent::PhotoFailed { request_id, error } => {
                warn!("Photo request {} failed: {}", request_id, error);
            }
            _ if event.is_sample_flow() => {
                trace!("Event: {}", event.description());
            }
            _ => {
                debug!("Event: {}", event.description());
            }
        }

        let delivered = self.deliver(&event);
        match self.sender.send(event) {
            Ok(count) => Ok(count + delivered),
            Err(_) if delivered > 0 => Ok(delivered),
            Err(e) => Err(EventBusError::PublishFailed {
                details: e.to_string(),
            }),
        }
    }

    /// Publish and discard the outcome; having no subscribers is not an error here
    pub fn emit(&self, event: CaptureEvent) {
        if let Err(e) = self.publish(event) {
            trace!("Event not delivered: {}", e);
        }
    }

    /// Queue `event` on every filtered receiver that accepts it
    fn deliver(&self, event: &CaptureEvent) -> usize {
        let sample_flow = event.is_sample_flow();
        let mut listeners = self.listeners.lock();
        listeners.retain(|listener| !listener.sender.is_closed());

        let mut delivered = 0;
        for listener in listeners.iter() {
            if !listener.filter.matches(event) {
                continue;
            }
            if sample_flow {
                if listener.queued_flow.load(Ordering::Acquire) >= self.flow_capacity {
                    if listener.dropped_flow.fetch_add(1, Ordering::Relaxed) == 0 {
                        warn!(
                            "Receiver '{}' is behind; dropping sample notifications",
                            listener.name
                        );
                    }
                    continue;
                }
                listener.queued_flow.fetch_add(1, Ordering::AcqRel);
            }
            if listener.sender.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
            || self
                .listeners
                .lock()
                .iter()
                .any(|listener| !listener.sender.is_closed())
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    /// Accept only events of the listed concerns
    Kinds(Vec<EventKind>),
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    pub fn matches(&self, event: &CaptureEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Kinds(kinds) => kinds.contains(&event.kind()),
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Filtered event stream created by `EventBus::receiver`
pub struct EventReceiver {
    receiver: mpsc::UnboundedReceiver<CaptureEvent>,
    queued_flow: Arc<AtomicUsize>,
    dropped_flow: Arc<AtomicU64>,
    name: String,
}

impl EventReceiver {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sample-flow events dropped because this receiver fell behind
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_flow.load(Ordering::Relaxed)
    }

    fn take(&self, event: CaptureEvent) -> CaptureEvent {
        if event.is_sample_flow() {
            self.queued_flow.fetch_sub(1, Ordering::AcqRel);
        }
        event
    }

    /// Receive the next filtered event; only a dropped bus ends the stream
    pub async fn recv(&mut self) -> Result<CaptureEvent, EventBusError> {
        match self.receiver.recv().await {
            Some(event) => Ok(self.take(event)),
            None => {
                debug!("Event bus closed for receiver '{}'", self.name);
                Err(EventBusError::ChannelClosed)
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<CaptureEvent>, EventBusError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(self.take(event))),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(EventBusError::ChannelClosed),
        }
    }
}
