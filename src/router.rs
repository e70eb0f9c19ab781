use crate::events::{CaptureEvent, EventBus};
use crate::sample::{Sample, Track};
use crate::session::SessionState;
use crate::writer::{AppendOutcome, ClipWriter};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace};
use uuid::Uuid;

/// Why a sample was not written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The session was not running when the sample arrived
    NotRunning(SessionState),
    NoOpenClip,
    /// The writer had too many samples of this track in flight
    Backpressure,
    /// The timestamp went backwards relative to the track's last accepted sample
    OutOfOrder,
    /// The clip was being finalized
    ClipClosed,
    /// Storage rejected the sample
    WriteFailed(String),
}

/// Final classification of one routed sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the open clip's writer
    Accepted,
    Skipped(SkipReason),
    /// Metadata detections go to observers only
    Published,
}

/// Counters for router monitoring
#[derive(Debug, Default)]
pub struct RouterStats {
    pub routed: AtomicU64,
    pub accepted: AtomicU64,
    pub skipped_not_running: AtomicU64,
    pub skipped_no_clip: AtomicU64,
    pub dropped_backpressure: AtomicU64,
    pub skipped_out_of_order: AtomicU64,
    pub skipped_clip_closed: AtomicU64,
    pub metadata_published: AtomicU64,
    pub frames_frozen: AtomicU64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            routed: self.routed.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            skipped_not_running: self.skipped_not_running.load(Ordering::Relaxed),
            skipped_no_clip: self.skipped_no_clip.load(Ordering::Relaxed),
            dropped_backpressure: self.dropped_backpressure.load(Ordering::Relaxed),
            skipped_out_of_order: self.skipped_out_of_order.load(Ordering::Relaxed),
            skipped_clip_closed: self.skipped_clip_closed.load(Ordering::Relaxed),
            metadata_published: self.metadata_published.load(Ordering::Relaxed),
            frames_frozen: self.frames_frozen.load(Ordering::Relaxed),
        }
    }

    fn record_skip(&self, reason: &SkipReason) {
        let counter = match reason {
            SkipReason::NotRunning(_) => &self.skipped_not_running,
            SkipReason::NoOpenClip => &self.skipped_no_clip,
            SkipReason::Backpressure => &self.dropped_backpressure,
            SkipReason::OutOfOrder => &self.skipped_out_of_order,
            SkipReason::ClipClosed => &self.skipped_clip_closed,
            // Counted on the clip by the write task; the router never sees it
            SkipReason::WriteFailed(_) => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub routed: u64,
    pub accepted: u64,
    pub skipped_not_running: u64,
    pub skipped_no_clip: u64,
    pub dropped_backpressure: u64,
    pub skipped_out_of_order: u64,
    pub skipped_clip_closed: u64,
    pub metadata_published: u64,
    pub frames_frozen: u64,
}

impl RouterStatsSnapshot {
    pub fn skipped(&self) -> u64 {
        self.skipped_not_running
            + self.skipped_no_clip
            + self.dropped_backpressure
            + self.skipped_out_of_order
            + self.skipped_clip_closed
    }
}

/// Session view the router consults for every sample
struct Routing {
    state: SessionState,
    writer: Option<Arc<ClipWriter>>,
}

struct RouterShared {
    routing: RwLock<Routing>,
    /// Last accepted timestamp per recorded track, in nanoseconds
    last_timestamps: [AtomicU64; 3],
    freeze_requests: Mutex<Vec<oneshot::Sender<Sample>>>,
    freeze_pending: AtomicBool,
    stats: RouterStats,
    event_bus: Arc<EventBus>,
}

/// Classifies samples from the frame source and forwards accepted ones to
/// the open clip.
///
/// `route` runs on the producer's timeline: it takes a read lock for a
/// constant-time decision, never awaits, and publishes notifications only
/// after the decision is made.
#[derive(Clone)]
pub struct BufferRouter {
    shared: Arc<RouterShared>,
}

impl BufferRouter {
    pub(crate) fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            shared: Arc::new(RouterShared {
                routing: RwLock::new(Routing {
                    state: SessionState::Idle,
                    writer: None,
                }),
                last_timestamps: Default::default(),
                freeze_requests: Mutex::new(Vec::new()),
                freeze_pending: AtomicBool::new(false),
                stats: RouterStats::default(),
                event_bus,
            }),
        }
    }

    /// Route one sample from the frame source
    pub fn route(&self, sample: Sample) -> RouteOutcome {
        let shared = &*self.shared;
        shared.stats.routed.fetch_add(1, Ordering::Relaxed);

        if sample.track == Track::Video && shared.freeze_pending.load(Ordering::Acquire) {
            self.freeze(&sample);
        }

        let track = sample.track;
        let sample_id = sample.id;
        let timestamp = sample.timestamp;

        match track {
            Track::Metadata => {
                shared.stats.metadata_published.fetch_add(1, Ordering::Relaxed);
                shared.event_bus.emit(CaptureEvent::MetadataObjectsDetected {
                    sample_id,
                    timestamp,
                    payload: Arc::clone(&sample.data),
                });
                return RouteOutcome::Published;
            }
            Track::Video | Track::Audio | Track::Depth => {}
        }

        let timestamp_nanos = timestamp.as_nanos() as u64;
        let (outcome, clip_id) = {
            let routing = shared.routing.read();
            let clip_id = routing.writer.as_ref().map(|w| w.clip_id());

            let outcome = match (&routing.writer, routing.state) {
                (Some(writer), SessionState::Running) => {
                    let last = &shared.last_timestamps[track.index()];
                    if timestamp_nanos < last.load(Ordering::Acquire) {
                        writer.record_skipped(track);
                        RouteOutcome::Skipped(SkipReason::OutOfOrder)
                    } else {
                        match writer.append(sample) {
                            AppendOutcome::Accepted => {
                                last.store(timestamp_nanos, Ordering::Release);
                                RouteOutcome::Accepted
                            }
                            AppendOutcome::WouldBlock => {
                                writer.record_skipped(track);
                                RouteOutcome::Skipped(SkipReason::Backpressure)
                            }
                            AppendOutcome::Closed => {
                                RouteOutcome::Skipped(SkipReason::ClipClosed)
                            }
                        }
                    }
                }
                (None, SessionState::Running) => RouteOutcome::Skipped(SkipReason::NoOpenClip),
                (writer, state) => {
                    if let Some(writer) = writer {
                        writer.record_skipped(track);
                    }
                    RouteOutcome::Skipped(SkipReason::NotRunning(state))
                }
            };
            (outcome, clip_id)
        };

        match &outcome {
            RouteOutcome::Accepted => {
                shared.stats.accepted.fetch_add(1, Ordering::Relaxed);
                trace!("Accepted {} sample {} at {:?}", track, sample_id, timestamp);
                if track == Track::Depth {
                    shared.event_bus.emit(CaptureEvent::DepthDataOutput {
                        sample_id,
                        timestamp,
                    });
                }
            }
            RouteOutcome::Skipped(reason) => {
                shared.stats.record_skip(reason);
                if track == Track::Depth {
                    shared.event_bus.emit(CaptureEvent::DepthDataDropped {
                        sample_id,
                        timestamp,
                        reason: reason.clone(),
                    });
                }
                shared.event_bus.emit(CaptureEvent::SampleSkipped {
                    clip_id,
                    track,
                    sample_id,
                    timestamp,
                    reason: reason.clone(),
                });
            }
            RouteOutcome::Published => {}
        }

        outcome
    }

    /// Hand a copy of this video frame to every waiting photo request
    fn freeze(&self, sample: &Sample) {
        let waiters = {
            let mut requests = self.shared.freeze_requests.lock();
            self.shared.freeze_pending.store(false, Ordering::Release);
            std::mem::take(&mut *requests)
        };

        for waiter in waiters {
            if waiter.send(sample.clone()).is_ok() {
                self.shared.stats.frames_frozen.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!("Froze video frame {} for photo capture", sample.id);
    }

    /// Ask for the next video frame that passes through the router
    pub(crate) fn request_frame(&self) -> oneshot::Receiver<Sample> {
        let (sender, receiver) = oneshot::channel();
        let mut requests = self.shared.freeze_requests.lock();
        requests.push(sender);
        self.shared.freeze_pending.store(true, Ordering::Release);
        receiver
    }

    pub fn state(&self) -> SessionState {
        self.shared.routing.read().state
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.shared.routing.write().state = state;
    }

    /// Install a freshly opened clip; per-track ordering restarts with it
    pub(crate) fn install_writer(&self, writer: Arc<ClipWriter>) {
        let mut routing = self.shared.routing.write();
        for last in &self.shared.last_timestamps {
            last.store(0, Ordering::Release);
        }
        routing.writer = Some(writer);
    }

    /// Detach the open clip; once this returns no further sample reaches it
    pub(crate) fn take_writer(&self) -> Option<Arc<ClipWriter>> {
        self.shared.routing.write().writer.take()
    }

    /// Change state and detach the open clip in one step
    pub(crate) fn set_state_and_take_writer(&self, state: SessionState) -> Option<Arc<ClipWriter>> {
        let mut routing = self.shared.routing.write();
        routing.state = state;
        routing.writer.take()
    }
}
