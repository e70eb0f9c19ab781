use crate::events::{AuthorizationStatus, DeviceAdjustment, MediaType};
use crate::sample::{DeviceOrientation, Sample, SampleFormat, Track};
use crate::session::{DevicePosition, FlashMode, SessionConfiguration, TorchMode};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Device-side notifications pushed by the frame source
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    AuthorizationChanged {
        media: MediaType,
        status: AuthorizationStatus,
    },
    /// A competing claim on the hardware paused delivery
    InterruptionBegan {
        reason: String,
    },
    InterruptionEnded,
    DevicePositionChanged {
        position: DevicePosition,
    },
    OrientationChanged {
        orientation: DeviceOrientation,
    },
    FormatChanged {
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
    AdjustmentChanged {
        adjustment: DeviceAdjustment,
        active: bool,
    },
    ZoomChanged {
        factor: f32,
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
}

/// Device and format negotiation performed before a session runs
#[async_trait]
pub trait DeviceNegotiator: Send + Sync {
    /// Agree on a configuration; the result may adjust the request
    async fn negotiate(
        &self,
        requested: &SessionConfiguration,
    ) -> Result<SessionConfiguration, String>;
}

/// Negotiator that accepts any configuration within fixed device limits
#[derive(Debug, Clone)]
pub struct CapabilityNegotiator {
    pub max_width: u32,
    pub max_height: u32,
    pub max_fps: u32,
    pub has_audio: bool,
}

impl Default for CapabilityNegotiator {
    fn default() -> Self {
        Self {
            max_width: 3840,
            max_height: 2160,
            max_fps: 60,
            has_audio: true,
        }
    }
}

#[async_trait]
impl DeviceNegotiator for CapabilityNegotiator {
    async fn negotiate(
        &self,
        requested: &SessionConfiguration,
    ) -> Result<SessionConfiguration, String> {
        let video = &requested.video;
        if video.width == 0 || video.height == 0 || video.fps == 0 {
            return Err("video dimensions and frame rate must be non-zero".to_string());
        }
        if video.width > self.max_width || video.height > self.max_height {
            return Err(format!(
                "{}x{} exceeds device limit {}x{}",
                video.width, video.height, self.max_width, self.max_height
            ));
        }
        if requested.audio.is_some() && !self.has_audio {
            return Err("no audio input available".to_string());
        }

        let mut negotiated = requested.clone();
        if video.fps > self.max_fps {
            debug!("Clamping frame rate {} to {}", video.fps, self.max_fps);
            negotiated.video.fps = self.max_fps;
        }
        Ok(negotiated)
    }
}

/// Generates a moving RGB test pattern and silent audio on a synthetic clock
pub struct SyntheticSource {
    width: u32,
    height: u32,
    fps: u32,
    next_id: u64,
    frame_index: u64,
    audio_position: Duration,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            next_id: 0,
            frame_index: 0,
            audio_position: Duration::ZERO,
        }
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Produce the next video frame
    pub fn next_video(&mut self) -> Sample {
        let id = self.take_id();
        let timestamp = Duration::from_nanos(self.frame_index * 1_000_000_000 / self.fps as u64);
        let shift = (self.frame_index % 256) as u32;
        self.frame_index += 1;

        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift) % 256) as u8);
                data.push((((x + y) / 2) % 256) as u8);
            }
        }

        Sample::video(id, timestamp, data, self.width, self.height, SampleFormat::Rgb24)
    }

    /// Produce `duration` of mono 16-bit silence at 44.1 kHz
    pub fn next_audio(&mut self, duration: Duration) -> Sample {
        let id = self.take_id();
        let timestamp = self.audio_position;
        self.audio_position += duration;

        let frames = (44_100.0 * duration.as_secs_f64()) as usize;
        Sample::new(id, Track::Audio, timestamp, vec![0u8; frames * 2], SampleFormat::PcmS16)
    }
}
