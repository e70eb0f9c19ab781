mod configuration;
mod core;
mod state;
#[cfg(test)]
mod tests;

pub use configuration::{
    AudioConfiguration, CaptureMode, DevicePosition, FlashMode, SessionConfiguration, TorchMode,
    VideoConfiguration,
};
pub use self::core::{CaptureSession, SessionSnapshot};
pub use state::SessionState;
