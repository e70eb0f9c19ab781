use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClipcamConfig {
    pub session: SessionConfig,
    pub writer: WriterConfig,
    pub photo: PhotoConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SessionConfig {
    /// Capacity of the notification broadcast channel
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Maximum queued lifecycle requests awaiting the session arbiter
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
}

/// What the router does when a track's writes fall behind
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Drop the arriving sample once `max_pending_per_track` writes are in flight
    DropNewest,
    /// Never drop; the write queue grows without bound
    Unbounded,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WriterConfig {
    /// Directory clips are written to
    #[serde(default = "default_writer_path")]
    pub path: String,

    #[serde(default = "default_backpressure")]
    pub backpressure: BackpressurePolicy,

    /// In-flight writes allowed per track before the router drops
    #[serde(default = "default_max_pending_per_track")]
    pub max_pending_per_track: usize,

    /// Interval between fsyncs of an open clip, in milliseconds
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Save a JSON metadata file for each finalized clip
    #[serde(default = "default_save_metadata")]
    pub save_metadata: bool,

    /// Repair clip files left open by a crash when the engine starts
    #[serde(default = "default_recover_partial")]
    pub recover_partial: bool,
}

impl WriterConfig {
    pub fn clip_dir(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.clip_dir().join("metadata")
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PhotoConfig {
    /// Give up on a photo request after this many milliseconds (0 disables)
    #[serde(default = "default_photo_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum wait for a video frame to freeze, in milliseconds
    #[serde(default = "default_frame_wait_ms")]
    pub frame_wait_ms: u64,

    /// JPEG quality for frame-derived photos (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Longest edge of generated thumbnails, in pixels
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
}

impl PhotoConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn frame_wait(&self) -> Duration {
        Duration::from_millis(self.frame_wait_ms)
    }
}

impl ClipcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("clipcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "session.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "session.command_queue_capacity",
                default_command_queue_capacity() as i64,
            )?
            .set_default("writer.path", default_writer_path())?
            .set_default("writer.backpressure", "drop_newest")?
            .set_default(
                "writer.max_pending_per_track",
                default_max_pending_per_track() as i64,
            )?
            .set_default("writer.sync_interval_ms", default_sync_interval_ms())?
            .set_default("writer.save_metadata", default_save_metadata())?
            .set_default("writer.recover_partial", default_recover_partial())?
            .set_default("photo.timeout_ms", default_photo_timeout_ms())?
            .set_default("photo.frame_wait_ms", default_frame_wait_ms())?
            .set_default("photo.jpeg_quality", default_jpeg_quality() as i64)?
            .set_default("photo.thumbnail_size", default_thumbnail_size() as i64)?
            .add_source(File::with_name(&path_str).required(false))
            // CLIPCAM_WRITER__PATH=/data overrides writer.path
            .add_source(Environment::with_prefix("CLIPCAM").separator("__"))
            .build()?;

        let config: ClipcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.session.command_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Command queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.writer.path.is_empty() {
            return Err(ConfigError::Message(
                "Writer path must not be empty".to_string(),
            ));
        }

        if self.writer.backpressure == BackpressurePolicy::DropNewest
            && self.writer.max_pending_per_track == 0
        {
            return Err(ConfigError::Message(
                "max_pending_per_track must be greater than 0 with drop_newest backpressure"
                    .to_string(),
            ));
        }

        if self.photo.jpeg_quality == 0 || self.photo.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "Photo jpeg_quality must be between 1 and 100".to_string(),
            ));
        }

        if self.photo.thumbnail_size == 0 {
            return Err(ConfigError::Message(
                "Photo thumbnail_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ClipcamConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            writer: WriterConfig::default(),
            photo: PhotoConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
            command_queue_capacity: default_command_queue_capacity(),
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            path: default_writer_path(),
            backpressure: default_backpressure(),
            max_pending_per_track: default_max_pending_per_track(),
            sync_interval_ms: default_sync_interval_ms(),
            save_metadata: default_save_metadata(),
            recover_partial: default_recover_partial(),
        }
    }
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_photo_timeout_ms(),
            frame_wait_ms: default_frame_wait_ms(),
            jpeg_quality: default_jpeg_quality(),
            thumbnail_size: default_thumbnail_size(),
        }
    }
}

// Default value functions
fn default_event_bus_capacity() -> usize {
    1024
}
fn default_command_queue_capacity() -> usize {
    32
}

fn default_writer_path() -> String {
    "./clips".to_string()
}
fn default_backpressure() -> BackpressurePolicy {
    BackpressurePolicy::DropNewest
}
fn default_max_pending_per_track() -> usize {
    60
}
fn default_sync_interval_ms() -> u64 {
    1000
}
fn default_save_metadata() -> bool {
    false
}
fn default_recover_partial() -> bool {
    true
}

fn default_photo_timeout_ms() -> u64 {
    10_000
}
fn default_frame_wait_ms() -> u64 {
    1000
}
fn default_jpeg_quality() -> u8 {
    90
}
fn default_thumbnail_size() -> u32 {
    160
}
