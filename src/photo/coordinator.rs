use super::render::{render_variant, RenderOptions};
use super::{PhotoMetadata, PhotoRequest, PhotoResult, PhotoSource, PhotoVariant};
use crate::config::PhotoConfig;
use crate::error::PhotoError;
use crate::events::{CaptureEvent, EventBus};
use crate::router::BufferRouter;
use crate::sample::Sample;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Dedicated still-photo pipeline of the capture device
#[async_trait]
pub trait PhotoPipeline: Send + Sync {
    /// Expose the sensor once and return the captured image
    async fn capture(&self, request: &PhotoRequest) -> Result<Sample, String>;

    /// Produce one variant of a capture; `Ok(None)` records an absence
    async fn process(
        &self,
        capture: &Sample,
        variant: PhotoVariant,
        options: &RenderOptions,
    ) -> Result<Option<Vec<u8>>, String> {
        render_variant(capture, variant, options)
    }
}

/// Handle to one in-flight photo request
pub struct PhotoTicket {
    request_id: u64,
    rejected: Vec<PhotoError>,
    handle: JoinHandle<Result<PhotoResult, PhotoError>>,
}

impl PhotoTicket {
    /// Correlation id carried by every notification for this request
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Variants refused when the request was submitted; the others still resolve
    pub fn rejected(&self) -> &[PhotoError] {
        &self.rejected
    }

    /// Wait for the request to reach its terminal outcome
    pub async fn wait(self) -> Result<PhotoResult, PhotoError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(PhotoError::CaptureFailed {
                request_id: self.request_id,
                details: format!("Photo task failed: {}", e),
            }),
        }
    }
}

struct CoordinatorInner {
    pipeline: Option<Arc<dyn PhotoPipeline>>,
    router: BufferRouter,
    event_bus: Arc<EventBus>,
    config: PhotoConfig,
    options: RenderOptions,
}

/// Runs one-shot photo requests independently of clip recording.
///
/// Each request gets its own task and a request id; requests may overlap
/// with each other and with an open clip. Interrupting the session does not
/// cancel a request already in flight.
pub struct PhotoCaptureCoordinator {
    inner: Arc<CoordinatorInner>,
    next_request_id: AtomicU64,
}

impl PhotoCaptureCoordinator {
    /// Coordinator that can only freeze video frames from `router`
    pub fn new(config: &PhotoConfig, router: BufferRouter, event_bus: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                pipeline: None,
                router,
                event_bus,
                config: config.clone(),
                options: RenderOptions::from(config),
            }),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Coordinator backed by a dedicated photo pipeline
    pub fn with_pipeline(
        config: &PhotoConfig,
        pipeline: Arc<dyn PhotoPipeline>,
        router: BufferRouter,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                pipeline: Some(pipeline),
                router,
                event_bus,
                config: config.clone(),
                options: RenderOptions::from(config),
            }),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Submit a request.
    ///
    /// Variants the source cannot produce are refused here, before any work
    /// starts, and reported on the ticket; the request fails outright only
    /// when nothing it asks for can be produced.
    pub fn capture(&self, request: PhotoRequest) -> Result<PhotoTicket, PhotoError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let unsupported = request.unsupported_variants();

        if let Err(error) = validate(&request, &unsupported) {
            self.inner.event_bus.emit(CaptureEvent::PhotoFailed {
                request_id,
                error: error.to_string(),
            });
            return Err(error);
        }

        let rejected = unsupported
            .into_iter()
            .map(|variant| {
                warn!(
                    "Photo {} cannot produce {:?} from {:?}",
                    request_id, variant, request.source
                );
                self.inner
                    .event_bus
                    .emit(CaptureEvent::PhotoVariantUnsupported { request_id, variant });
                PhotoError::UnsupportedVariant { variant }
            })
            .collect();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run(request_id, request).await });
        Ok(PhotoTicket {
            request_id,
            rejected,
            handle,
        })
    }
}

fn validate(request: &PhotoRequest, unsupported: &BTreeSet<PhotoVariant>) -> Result<(), PhotoError> {
    if request.variants.is_empty() {
        return Err(PhotoError::EmptyRequest);
    }
    if unsupported.len() == request.variants.len() {
        if let Some(&variant) = unsupported.iter().next() {
            return Err(PhotoError::UnsupportedVariant { variant });
        }
    }
    Ok(())
}

impl CoordinatorInner {
    async fn run(
        self: Arc<Self>,
        request_id: u64,
        request: PhotoRequest,
    ) -> Result<PhotoResult, PhotoError> {
        info!(
            "Capturing photo {} from {:?} ({} variants)",
            request_id,
            request.source,
            request.variants.len()
        );
        self.event_bus.emit(CaptureEvent::PhotoWillCapture {
            request_id,
            source: request.source,
        });

        let frame = match self.acquire(&request).await {
            Ok(frame) => Arc::new(frame),
            Err(details) => {
                let error = PhotoError::CaptureFailed {
                    request_id,
                    details,
                };
                self.event_bus.emit(CaptureEvent::PhotoFailed {
                    request_id,
                    error: error.to_string(),
                });
                return Err(error);
            }
        };
        let captured_at = Utc::now();
        self.event_bus
            .emit(CaptureEvent::PhotoDidCapture { request_id });

        let unsupported = request.unsupported_variants();
        let mut unresolved: BTreeSet<PhotoVariant> =
            request.variants.difference(&unsupported).copied().collect();
        let mut artifacts = BTreeMap::new();
        let mut tasks = JoinSet::new();
        for variant in unresolved.iter().copied() {
            let inner = Arc::clone(&self);
            let frame = Arc::clone(&frame);
            let source = request.source;
            tasks.spawn(async move {
                let result = inner.process(source, &frame, variant).await;
                (variant, result)
            });
        }

        // Each variant is announced as soon as it resolves
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((variant, result)) => {
                    let bytes = result.unwrap_or_else(|e| {
                        warn!("Photo {} variant {:?} failed: {}", request_id, variant, e);
                        None
                    });
                    unresolved.remove(&variant);
                    self.event_bus.emit(CaptureEvent::PhotoVariantProcessed {
                        request_id,
                        variant,
                        available: bytes.is_some(),
                    });
                    artifacts.insert(variant, bytes);
                }
                Err(e) => warn!("Photo {} variant task ended abnormally: {}", request_id, e),
            }
        }

        for variant in unresolved {
            self.event_bus.emit(CaptureEvent::PhotoVariantProcessed {
                request_id,
                variant,
                available: false,
            });
            artifacts.insert(variant, None);
        }
        // Already announced as unsupported when the request was submitted
        for variant in unsupported {
            artifacts.insert(variant, None);
        }

        self.event_bus
            .emit(CaptureEvent::PhotoCompleted { request_id });
        debug!("Photo {} completed", request_id);

        Ok(PhotoResult {
            request_id,
            artifacts,
            metadata: PhotoMetadata {
                captured_at,
                width: frame.width,
                height: frame.height,
                source: request.source,
                flash_mode: request.flash_mode,
                orientation: request.orientation.unwrap_or_default(),
            },
        })
    }

    async fn acquire(&self, request: &PhotoRequest) -> Result<Sample, String> {
        match request.source {
            PhotoSource::PhotoPipeline => {
                let pipeline = self
                    .pipeline
                    .as_ref()
                    .ok_or_else(|| "No photo pipeline available".to_string())?;
                let capture = pipeline.capture(request);
                match self.config.timeout() {
                    Some(limit) => tokio::time::timeout(limit, capture)
                        .await
                        .map_err(|_| format!("Sensor capture timed out after {:?}", limit))?,
                    None => capture.await,
                }
            }
            PhotoSource::VideoFrame => {
                let wait = self.config.frame_wait();
                match tokio::time::timeout(wait, self.router.request_frame()).await {
                    Ok(Ok(frame)) => Ok(frame),
                    Ok(Err(_)) => Err("Frame request was dropped".to_string()),
                    Err(_) => Err(format!("No video frame arrived within {:?}", wait)),
                }
            }
        }
    }

    async fn process(
        &self,
        source: PhotoSource,
        frame: &Sample,
        variant: PhotoVariant,
    ) -> Result<Option<Vec<u8>>, String> {
        match (source, &self.pipeline) {
            (PhotoSource::PhotoPipeline, Some(pipeline)) => {
                pipeline.process(frame, variant, &self.options).await
            }
            _ => {
                let frame = frame.clone();
                let options = self.options;
                tokio::task::spawn_blocking(move || render_variant(&frame, variant, &options))
                    .await
                    .map_err(|e| format!("Render task failed: {}", e))?
            }
        }
    }
}
