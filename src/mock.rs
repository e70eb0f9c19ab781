//! Stand-ins for the device and storage seams, for running without hardware

use crate::error::WriteError;
use crate::photo::{PhotoPipeline, PhotoRequest};
use crate::sample::Sample;
use crate::session::SessionConfiguration;
use crate::source::DeviceNegotiator;
use crate::storage::{ClipSink, ClipTarget};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// In-memory sink whose targets fail every `fail_every`-th append
pub struct FlakySink {
    fail_every: u64,
    unavailable: bool,
    written: Arc<Mutex<Vec<(Uuid, u64)>>>,
}

impl FlakySink {
    /// `fail_every` of zero never fails
    pub fn new(fail_every: u64) -> Self {
        Self {
            fail_every,
            unavailable: false,
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sink that refuses to open any clip
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(0)
        }
    }

    /// `(clip id, sample id)` of every successful append, in write order
    pub fn written(&self) -> Vec<(Uuid, u64)> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl ClipSink for FlakySink {
    async fn open(&self, clip_id: Uuid) -> Result<Box<dyn ClipTarget>, WriteError> {
        if self.unavailable {
            return Err(WriteError::storage("Mock storage unavailable"));
        }
        Ok(Box::new(FlakyTarget {
            clip_id,
            fail_every: self.fail_every,
            attempts: 0,
            written: Arc::clone(&self.written),
        }))
    }
}

struct FlakyTarget {
    clip_id: Uuid,
    fail_every: u64,
    attempts: u64,
    written: Arc<Mutex<Vec<(Uuid, u64)>>>,
}

#[async_trait]
impl ClipTarget for FlakyTarget {
    async fn append(&mut self, sample: &Sample) -> Result<(), WriteError> {
        self.attempts += 1;
        if self.fail_every > 0 && self.attempts % self.fail_every == 0 {
            return Err(WriteError::storage("Injected write failure"));
        }
        self.written.lock().push((self.clip_id, sample.id));
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> Result<PathBuf, WriteError> {
        Ok(PathBuf::from(format!("memory/{}.clip", self.clip_id)))
    }
}

/// Negotiator that accepts requests unchanged unless told to fail
#[derive(Default)]
pub struct MockNegotiator {
    failure: Mutex<Option<String>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockNegotiator {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn failing<S: Into<String>>(details: S) -> Self {
        Self {
            failure: Mutex::new(Some(details.into())),
            ..Self::default()
        }
    }

    /// Take `delay` for every negotiation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failure(&self, failure: Option<String>) {
        *self.failure.lock() = failure;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DeviceNegotiator for MockNegotiator {
    async fn negotiate(
        &self,
        requested: &SessionConfiguration,
    ) -> Result<SessionConfiguration, String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().clone();
        match failure {
            Some(details) => Err(details),
            None => Ok(requested.clone()),
        }
    }
}

/// Photo pipeline returning a fixed frame
pub struct MockPhotoPipeline {
    frame: Sample,
    failure: Option<String>,
    delay: Duration,
    captures: AtomicUsize,
}

impl MockPhotoPipeline {
    pub fn new(frame: Sample) -> Self {
        Self {
            frame,
            failure: None,
            delay: Duration::ZERO,
            captures: AtomicUsize::new(0),
        }
    }

    /// Pipeline whose sensor capture always fails
    pub fn failing<S: Into<String>>(frame: Sample, details: S) -> Self {
        Self {
            failure: Some(details.into()),
            ..Self::new(frame)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PhotoPipeline for MockPhotoPipeline {
    async fn capture(&self, request: &PhotoRequest) -> Result<Sample, String> {
        self.captures.fetch_add(1, Ordering::Relaxed);
        debug!("Mock photo capture of {} variants", request.variants.len());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some(details) => Err(details.clone()),
            None => Ok(self.frame.clone()),
        }
    }
}
