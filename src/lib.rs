pub mod clip;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod mock;
pub mod photo;
pub mod router;
pub mod sample;
pub mod session;
pub mod source;
pub mod storage;
pub mod writer;

pub use clip::{Clip, ClipCounts, TrackCounts};
pub use config::{BackpressurePolicy, ClipcamConfig, PhotoConfig, SessionConfig, WriterConfig};
pub use dispatch::{
    AuthorizationObserver, ConfigurationObserver, DepthObserver, DeviceObserver, EventDispatcher,
    FlashTorchObserver, MetadataObserver, PhotoObserver, SessionObserver, Subscription,
    VideoObserver,
};
pub use error::{ClipcamError, EventBusError, PhotoError, Result, SessionError, WriteError};
pub use events::{
    AuthorizationStatus, CaptureEvent, DeviceAdjustment, EventBus, EventFilter, EventKind,
    EventReceiver, MediaType,
};
pub use photo::{
    PhotoCaptureCoordinator, PhotoMetadata, PhotoPipeline, PhotoRequest, PhotoResult, PhotoSource,
    PhotoTicket, PhotoVariant, RenderOptions,
};
pub use router::{BufferRouter, RouteOutcome, RouterStatsSnapshot, SkipReason};
pub use sample::{DeviceOrientation, Sample, SampleFormat, Track};
pub use session::{
    AudioConfiguration, CaptureMode, CaptureSession, DevicePosition, FlashMode,
    SessionConfiguration, SessionSnapshot, SessionState, TorchMode, VideoConfiguration,
};
pub use source::{CapabilityNegotiator, DeviceNegotiator, SourceEvent, SyntheticSource};
pub use storage::{
    recover_partial_clips, ClipFile, ClipReader, ClipSink, ClipTarget, FileClipSink, FileClipTarget,
};
pub use writer::{AppendOutcome, ClipWriter};
