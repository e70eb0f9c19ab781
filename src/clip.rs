use crate::error::{ClipcamError, Result};
use crate::sample::Track;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Appended vs. skipped sample counts for one track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackCounts {
    pub appended: u64,
    pub skipped: u64,
}

/// Per-track sample counts of a clip
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipCounts {
    pub video: TrackCounts,
    pub audio: TrackCounts,
    pub depth: TrackCounts,
}

impl ClipCounts {
    pub fn track(&self, track: Track) -> TrackCounts {
        match track {
            Track::Video => self.video,
            Track::Audio => self.audio,
            Track::Depth => self.depth,
            Track::Metadata => TrackCounts::default(),
        }
    }

    pub fn total_appended(&self) -> u64 {
        self.video.appended + self.audio.appended + self.depth.appended
    }

    pub fn total_skipped(&self) -> u64 {
        self.video.skipped + self.audio.skipped + self.depth.skipped
    }

    /// True when no track accepted a single sample
    pub fn is_empty(&self) -> bool {
        self.total_appended() == 0
    }
}

/// A finalized, independently readable recorded segment.
///
/// Values of this type are only produced by finalizing a clip writer, so a
/// `Clip` always describes a closed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: Uuid,
    /// Position of the clip within its session
    pub index: usize,
    /// Capture timestamp of the first appended sample
    pub start: Option<Duration>,
    /// Span between the first and last appended sample timestamps
    pub duration: Duration,
    pub path: PathBuf,
    pub counts: ClipCounts,
    pub opened_at: DateTime<Utc>,
    pub finalized_at: DateTime<Utc>,
}

impl Clip {
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Live counters shared by the router (skips) and the writer task (appends)
#[derive(Debug, Default)]
pub(crate) struct ClipCounters {
    appended: [AtomicU64; 3],
    skipped: [AtomicU64; 3],
}

impl ClipCounters {
    pub(crate) fn record_appended(&self, track: Track) {
        if track.is_recorded() {
            self.appended[track.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_skipped(&self, track: Track) {
        if track.is_recorded() {
            self.skipped[track.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> ClipCounts {
        let counts = |track: Track| TrackCounts {
            appended: self.appended[track.index()].load(Ordering::Relaxed),
            skipped: self.skipped[track.index()].load(Ordering::Relaxed),
        };
        ClipCounts {
            video: counts(Track::Video),
            audio: counts(Track::Audio),
            depth: counts(Track::Depth),
        }
    }
}

/// Write a JSON sidecar describing a finalized clip next to its file
pub(crate) async fn save_metadata(clip: &Clip, dir: &Path) -> Result<PathBuf> {
    let metadata_json = serde_json::to_string_pretty(clip).map_err(|e| {
        ClipcamError::component("clip_writer", &format!("Failed to serialize metadata: {}", e))
    })?;

    fs::create_dir_all(dir).await?;
    let metadata_path = dir.join(format!("{}.json", clip.id));
    fs::write(&metadata_path, metadata_json).await?;

    debug!("Saved clip metadata to {}", metadata_path.display());
    Ok(metadata_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_counters_ignore_metadata_track() {
        let counters = ClipCounters::default();
        counters.record_appended(Track::Video);
        counters.record_appended(Track::Video);
        counters.record_skipped(Track::Audio);
        counters.record_appended(Track::Metadata);

        let counts = counters.snapshot();
        assert_eq!(counts.video.appended, 2);
        assert_eq!(counts.audio.skipped, 1);
        assert_eq!(counts.total_appended(), 2);
        assert_eq!(counts.total_skipped(), 1);
        assert_eq!(counts.track(Track::Metadata), TrackCounts::default());
        assert!(!counts.is_empty());
    }

    #[tokio::test]
    async fn test_save_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let clip = Clip {
            id: Uuid::new_v4(),
            index: 0,
            start: Some(Duration::from_millis(5)),
            duration: Duration::from_millis(100),
            path: temp_dir.path().join("clip.clip"),
            counts: ClipCounts::default(),
            opened_at: Utc::now(),
            finalized_at: Utc::now(),
        };

        let path = save_metadata(&clip, temp_dir.path()).await.unwrap();
        let json = std::fs::read_to_string(path).unwrap();
        let parsed: Clip = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, clip);
    }
}
