use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Source track a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Track {
    Video,
    Audio,
    Depth,
    /// Detected metadata objects (faces, barcodes); published, never recorded
    Metadata,
}

impl Track {
    /// Tracks that a clip persists
    pub const RECORDED: [Track; 3] = [Track::Video, Track::Audio, Track::Depth];

    /// Stable index used for per-track counter arrays
    pub fn index(self) -> usize {
        match self {
            Track::Video => 0,
            Track::Audio => 1,
            Track::Depth => 2,
            Track::Metadata => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Track::Video),
            1 => Some(Track::Audio),
            2 => Some(Track::Depth),
            3 => Some(Track::Metadata),
            _ => None,
        }
    }

    pub fn is_recorded(self) -> bool {
        !matches!(self, Track::Metadata)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Track::Video => "video",
            Track::Audio => "audio",
            Track::Depth => "depth",
            Track::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

/// Payload encoding of a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Motion JPEG - each video sample is a complete JPEG image
    Mjpeg,
    /// YUV 4:2:2 packed video
    Yuyv,
    /// Packed 8-bit RGB video
    Rgb24,
    /// Interleaved signed 16-bit PCM audio
    PcmS16,
    /// 16-bit depth map
    Depth16,
    /// Opaque detection payload
    Opaque,
}

impl SampleFormat {
    /// Bytes per pixel for uncompressed image formats
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            SampleFormat::Yuyv => 2,
            SampleFormat::Rgb24 => 3,
            SampleFormat::Depth16 => 2,
            _ => 0,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, SampleFormat::Mjpeg)
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            SampleFormat::Mjpeg => 0,
            SampleFormat::Yuyv => 1,
            SampleFormat::Rgb24 => 2,
            SampleFormat::PcmS16 => 3,
            SampleFormat::Depth16 => 4,
            SampleFormat::Opaque => 5,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SampleFormat::Mjpeg),
            1 => Some(SampleFormat::Yuyv),
            2 => Some(SampleFormat::Rgb24),
            3 => Some(SampleFormat::PcmS16),
            4 => Some(SampleFormat::Depth16),
            5 => Some(SampleFormat::Opaque),
            _ => None,
        }
    }
}

/// Physical orientation of the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl DeviceOrientation {
    /// Clockwise rotation needed to present a frame upright
    pub fn degrees(&self) -> u16 {
        match self {
            DeviceOrientation::Portrait => 0,
            DeviceOrientation::LandscapeRight => 90,
            DeviceOrientation::PortraitUpsideDown => 180,
            DeviceOrientation::LandscapeLeft => 270,
        }
    }
}

/// One timestamped unit of capture data
#[derive(Debug, Clone)]
pub struct Sample {
    /// Source-assigned sequence number
    pub id: u64,
    pub track: Track,
    /// Monotonic capture time, relative to the source clock origin
    pub timestamp: Duration,
    /// Payload (shared so a frozen photo frame does not copy)
    pub data: Arc<Vec<u8>>,
    /// Image width in pixels (0 for non-image tracks)
    pub width: u32,
    /// Image height in pixels (0 for non-image tracks)
    pub height: u32,
    pub format: SampleFormat,
}

impl Sample {
    pub fn new(id: u64, track: Track, timestamp: Duration, data: Vec<u8>, format: SampleFormat) -> Self {
        Self {
            id,
            track,
            timestamp,
            data: Arc::new(data),
            width: 0,
            height: 0,
            format,
        }
    }

    /// Create a video sample with frame dimensions
    pub fn video(
        id: u64,
        timestamp: Duration,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: SampleFormat,
    ) -> Self {
        Self {
            id,
            track: Track::Video,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    pub fn audio(id: u64, timestamp: Duration, data: Vec<u8>) -> Self {
        Self::new(id, Track::Audio, timestamp, data, SampleFormat::PcmS16)
    }

    /// Expected payload size for uncompressed image formats
    pub fn expected_size(&self) -> Option<usize> {
        match self.format.bytes_per_pixel() {
            0 => None,
            bpp => Some(self.width as usize * self.height as usize * bpp),
        }
    }

    /// Validate payload size against the declared dimensions
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true,
        }
    }
}
