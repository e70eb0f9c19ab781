use crate::sample::SampleFormat;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DevicePosition {
    #[default]
    Back,
    Front,
}

/// Primary output the session is set up for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureMode {
    #[default]
    Video,
    Photo,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlashMode {
    #[default]
    Off,
    On,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TorchMode {
    #[default]
    Off,
    On,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfiguration {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: SampleFormat,
    /// Target encoder bitrate in bits per second
    pub bitrate: u32,
}

impl Default for VideoConfiguration {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            format: SampleFormat::Mjpeg,
            bitrate: 5_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfiguration {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

impl Default for AudioConfiguration {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bitrate: 96_000,
        }
    }
}

/// Everything the device layer must agree to before a session runs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionConfiguration {
    pub video: VideoConfiguration,
    /// `None` records without an audio track
    pub audio: Option<AudioConfiguration>,
    pub device_position: DevicePosition,
    pub capture_mode: CaptureMode,
    pub flash_mode: FlashMode,
    pub torch_mode: TorchMode,
}

impl SessionConfiguration {
    pub fn with_audio(mut self, audio: AudioConfiguration) -> Self {
        self.audio = Some(audio);
        self
    }
}
