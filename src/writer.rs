use crate::clip::{save_metadata, Clip, ClipCounters, ClipCounts};
use crate::config::{BackpressurePolicy, WriterConfig};
use crate::error::WriteError;
use crate::events::{CaptureEvent, EventBus};
use crate::router::SkipReason;
use crate::sample::{Sample, Track};
use crate::storage::{ClipSink, ClipTarget};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of handing a sample to the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Queued for writing
    Accepted,
    /// The track still has too many writes in flight
    WouldBlock,
    /// The clip is finalizing or finalized
    Closed,
}

/// State shared between the writer handle and its write task
struct WriterShared {
    pending: [AtomicUsize; 4],
    counters: ClipCounters,
}

struct Completion {
    task: Option<JoinHandle<Result<Clip, WriteError>>>,
    result: Option<Result<Clip, WriteError>>,
}

/// Owns one open clip: appends are queued without blocking and written on a
/// dedicated task; `finalize` drains the queue and seals the clip.
pub struct ClipWriter {
    clip_id: Uuid,
    index: usize,
    sender: Mutex<Option<mpsc::UnboundedSender<Sample>>>,
    shared: Arc<WriterShared>,
    policy: BackpressurePolicy,
    max_pending: usize,
    completion: tokio::sync::Mutex<Completion>,
}

impl ClipWriter {
    /// Open a new clip target and start its write task
    pub async fn open(
        index: usize,
        sink: &dyn ClipSink,
        config: &WriterConfig,
        event_bus: Arc<EventBus>,
    ) -> Result<Self, WriteError> {
        let clip_id = Uuid::new_v4();
        let target = sink.open(clip_id).await?;

        let shared = Arc::new(WriterShared {
            pending: Default::default(),
            counters: ClipCounters::default(),
        });
        let (sender, receiver) = mpsc::unbounded_channel();

        let job = WriteJob {
            clip_id,
            index,
            opened_at: Utc::now(),
            metadata_dir: config.save_metadata.then(|| config.metadata_dir()),
        };
        let task = tokio::spawn(run_writer(
            job,
            target,
            receiver,
            Arc::clone(&shared),
            event_bus,
        ));

        info!("Opened clip {} ({})", index, clip_id);

        Ok(Self {
            clip_id,
            index,
            sender: Mutex::new(Some(sender)),
            shared,
            policy: config.backpressure,
            max_pending: config.max_pending_per_track,
            completion: tokio::sync::Mutex::new(Completion {
                task: Some(task),
                result: None,
            }),
        })
    }

    pub fn clip_id(&self) -> Uuid {
        self.clip_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Queue a sample for writing.
    ///
    /// Never waits: a track that already has `max_pending` writes in flight
    /// reports `WouldBlock` under the drop-newest policy.
    pub fn append(&self, sample: Sample) -> AppendOutcome {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return AppendOutcome::Closed;
        };

        let pending = &self.shared.pending[sample.track.index()];
        if self.policy == BackpressurePolicy::DropNewest
            && pending.load(Ordering::Acquire) >= self.max_pending
        {
            return AppendOutcome::WouldBlock;
        }

        pending.fetch_add(1, Ordering::AcqRel);
        let track = sample.track;
        if sender.send(sample).is_err() {
            self.shared.pending[track.index()].fetch_sub(1, Ordering::AcqRel);
            return AppendOutcome::Closed;
        }
        AppendOutcome::Accepted
    }

    /// Count a sample the router decided not to write while this clip was open
    pub fn record_skipped(&self, track: Track) {
        self.shared.counters.record_skipped(track);
    }

    /// Writes queued but not yet completed for a track
    pub fn pending(&self, track: Track) -> usize {
        self.shared.pending[track.index()].load(Ordering::Acquire)
    }

    /// Live counts; final counts are on the finalized `Clip`
    pub fn counts(&self) -> ClipCounts {
        self.shared.counters.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting samples, drain queued writes and seal the clip.
    ///
    /// Safe to call concurrently and repeatedly; every call returns the same
    /// outcome and only the first one touches storage.
    pub async fn finalize(&self) -> Result<Clip, WriteError> {
        // Dropping the sender lets the write task drain and exit
        self.sender.lock().take();

        let mut completion = self.completion.lock().await;
        if let Some(result) = &completion.result {
            return result.clone();
        }

        let result = match completion.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(WriteError::storage(format!("Clip write task failed: {}", e))),
            },
            None => Err(WriteError::storage("Clip write task missing")),
        };

        completion.result = Some(result.clone());
        result
    }
}

struct WriteJob {
    clip_id: Uuid,
    index: usize,
    opened_at: DateTime<Utc>,
    metadata_dir: Option<PathBuf>,
}

async fn run_writer(
    job: WriteJob,
    mut target: Box<dyn ClipTarget>,
    mut receiver: mpsc::UnboundedReceiver<Sample>,
    shared: Arc<WriterShared>,
    event_bus: Arc<EventBus>,
) -> Result<Clip, WriteError> {
    // Tracks interleave, so the span is the min and max over every appended sample
    let mut span: Option<(Duration, Duration)> = None;

    while let Some(sample) = receiver.recv().await {
        let track = sample.track;
        match target.append(&sample).await {
            Ok(()) => {
                shared.counters.record_appended(track);
                let timestamp = sample.timestamp;
                span = Some(match span {
                    Some((first, last)) => (first.min(timestamp), last.max(timestamp)),
                    None => (timestamp, timestamp),
                });
                event_bus.emit(CaptureEvent::SampleAppended {
                    clip_id: job.clip_id,
                    track,
                    sample_id: sample.id,
                    timestamp: sample.timestamp,
                });
            }
            Err(e) => {
                // A failed write costs one sample, not the clip
                warn!(
                    "Write of {} sample {} to clip {} failed: {}",
                    track, sample.id, job.clip_id, e
                );
                shared.counters.record_skipped(track);
                event_bus.emit(CaptureEvent::SampleSkipped {
                    clip_id: Some(job.clip_id),
                    track,
                    sample_id: sample.id,
                    timestamp: sample.timestamp,
                    reason: SkipReason::WriteFailed(e.to_string()),
                });
            }
        }
        drop(sample);
        shared.pending[track.index()].fetch_sub(1, Ordering::AcqRel);
    }

    debug!("Write queue for clip {} drained", job.clip_id);
    let path = target.finalize().await?;

    let clip = Clip {
        id: job.clip_id,
        index: job.index,
        start: span.map(|(first, _)| first),
        duration: span
            .map(|(first, last)| last.saturating_sub(first))
            .unwrap_or(Duration::ZERO),
        path,
        counts: shared.counters.snapshot(),
        opened_at: job.opened_at,
        finalized_at: Utc::now(),
    };

    if clip.is_empty() {
        info!("Clip {} finalized without samples", clip.id);
    }

    if let Some(dir) = &job.metadata_dir {
        if let Err(e) = save_metadata(&clip, dir).await {
            warn!("Failed to save metadata for clip {}: {}", clip.id, e);
        }
    }

    Ok(clip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FlakySink;
    use crate::sample::SampleFormat;
    use crate::storage::{ClipReader, FileClipSink};
    use tempfile::TempDir;

    fn writer_config(dir: &TempDir) -> WriterConfig {
        WriterConfig {
            path: dir.path().display().to_string(),
            max_pending_per_track: 16,
            ..WriterConfig::default()
        }
    }

    fn video(id: u64) -> Sample {
        Sample::video(
            id,
            Duration::from_millis(id * 10),
            vec![0u8; 64],
            8,
            8,
            SampleFormat::Mjpeg,
        )
    }

    #[tokio::test]
    async fn test_append_and_finalize() {
        let temp_dir = TempDir::new().unwrap();
        let config = writer_config(&temp_dir);
        let sink = FileClipSink::new(config.clip_dir(), config.sync_interval());
        let event_bus = Arc::new(EventBus::new(64));

        let writer = ClipWriter::open(0, &sink, &config, event_bus).await.unwrap();
        for i in 0..10 {
            assert_eq!(writer.append(video(i)), AppendOutcome::Accepted);
        }
        assert_eq!(writer.append(Sample::audio(99, Duration::from_millis(3), vec![0; 8])), AppendOutcome::Accepted);

        let clip = writer.finalize().await.unwrap();
        assert_eq!(clip.counts.video.appended, 10);
        assert_eq!(clip.counts.audio.appended, 1);
        assert_eq!(clip.start, Some(Duration::ZERO));
        assert_eq!(clip.duration, Duration::from_millis(90));

        let mut reader = ClipReader::open(&clip.path).await.unwrap();
        assert_eq!(reader.read_all().await.unwrap().len(), 11);
    }

    #[tokio::test]
    async fn test_clip_span_covers_interleaved_tracks() {
        let temp_dir = TempDir::new().unwrap();
        let config = writer_config(&temp_dir);
        let sink = FileClipSink::new(config.clip_dir(), config.sync_interval());
        let writer = ClipWriter::open(0, &sink, &config, Arc::new(EventBus::new(8)))
            .await
            .unwrap();

        // Video runs ahead of audio; each track is still in order
        writer.append(video(10));
        writer.append(Sample::audio(1, Duration::from_millis(50), vec![0; 8]));
        writer.append(video(12));
        writer.append(Sample::audio(2, Duration::from_millis(70), vec![0; 8]));

        let clip = writer.finalize().await.unwrap();
        assert_eq!(clip.start, Some(Duration::from_millis(50)));
        assert_eq!(clip.duration, Duration::from_millis(70));
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let config = writer_config(&temp_dir);
        let sink = FileClipSink::new(config.clip_dir(), config.sync_interval());
        let writer = ClipWriter::open(0, &sink, &config, Arc::new(EventBus::new(8)))
            .await
            .unwrap();

        writer.append(video(0));
        let first = writer.finalize().await.unwrap();
        let second = writer.finalize().await.unwrap();
        assert_eq!(first, second);

        // Nothing is accepted after finalize
        assert_eq!(writer.append(video(1)), AppendOutcome::Closed);
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn test_backpressure_reports_would_block() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = writer_config(&temp_dir);
        config.max_pending_per_track = 2;
        let sink = FileClipSink::new(config.clip_dir(), config.sync_interval());
        let writer = ClipWriter::open(0, &sink, &config, Arc::new(EventBus::new(8)))
            .await
            .unwrap();

        // The write task cannot run until this test yields
        assert_eq!(writer.append(video(0)), AppendOutcome::Accepted);
        assert_eq!(writer.append(video(1)), AppendOutcome::Accepted);
        assert_eq!(writer.append(video(2)), AppendOutcome::WouldBlock);
        // Other tracks have their own budget
        assert_eq!(
            writer.append(Sample::audio(3, Duration::ZERO, vec![0; 4])),
            AppendOutcome::Accepted
        );
        assert_eq!(writer.pending(Track::Video), 2);

        let clip = writer.finalize().await.unwrap();
        assert_eq!(clip.counts.video.appended, 2);
        assert_eq!(writer.pending(Track::Video), 0);
    }

    #[tokio::test]
    async fn test_unbounded_policy_never_blocks() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = writer_config(&temp_dir);
        config.max_pending_per_track = 1;
        config.backpressure = BackpressurePolicy::Unbounded;
        let sink = FileClipSink::new(config.clip_dir(), config.sync_interval());
        let writer = ClipWriter::open(0, &sink, &config, Arc::new(EventBus::new(8)))
            .await
            .unwrap();

        for i in 0..20 {
            assert_eq!(writer.append(video(i)), AppendOutcome::Accepted);
        }
        assert_eq!(writer.finalize().await.unwrap().counts.video.appended, 20);
    }

    #[tokio::test]
    async fn test_write_errors_do_not_abort_clip() {
        let temp_dir = TempDir::new().unwrap();
        let config = writer_config(&temp_dir);
        // Every third append fails
        let sink = FlakySink::new(3);
        let event_bus = Arc::new(EventBus::new(64));
        let mut events = event_bus.subscribe();

        let writer = ClipWriter::open(0, &sink, &config, Arc::clone(&event_bus))
            .await
            .unwrap();
        for i in 0..6 {
            writer.append(video(i));
        }
        let clip = writer.finalize().await.unwrap();

        assert_eq!(clip.counts.video.appended, 4);
        assert_eq!(clip.counts.video.skipped, 2);

        let mut write_failures = 0;
        while let Ok(event) = events.try_recv() {
            if let CaptureEvent::SampleSkipped {
                reason: SkipReason::WriteFailed(_),
                ..
            } = event
            {
                write_failures += 1;
            }
        }
        assert_eq!(write_failures, 2);
    }

    #[tokio::test]
    async fn test_empty_clip_finalizes() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = writer_config(&temp_dir);
        config.save_metadata = true;
        let sink = FileClipSink::new(config.clip_dir(), config.sync_interval());
        let writer = ClipWriter::open(4, &sink, &config, Arc::new(EventBus::new(8)))
            .await
            .unwrap();

        let clip = writer.finalize().await.unwrap();
        assert!(clip.is_empty());
        assert_eq!(clip.index, 4);
        assert_eq!(clip.start, None);
        assert_eq!(clip.duration, Duration::ZERO);
        assert!(clip.path.exists());
        assert!(config.metadata_dir().join(format!("{}.json", clip.id)).exists());
    }

    #[tokio::test]
    async fn test_concurrent_finalize_calls_agree() {
        let temp_dir = TempDir::new().unwrap();
        let config = writer_config(&temp_dir);
        let sink = FileClipSink::new(config.clip_dir(), config.sync_interval());
        let writer = Arc::new(
            ClipWriter::open(0, &sink, &config, Arc::new(EventBus::new(8)))
                .await
                .unwrap(),
        );
        for i in 0..5 {
            writer.append(video(i));
        }

        let a = tokio::spawn({
            let writer = Arc::clone(&writer);
            async move { writer.finalize().await }
        });
        let b = tokio::spawn({
            let writer = Arc::clone(&writer);
            async move { writer.finalize().await }
        });

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.counts.video.appended, 5);
    }
}
