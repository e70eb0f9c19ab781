use crate::photo::PhotoVariant;
use crate::session::SessionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClipcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("Photo error: {0}")]
    Photo(#[from] PhotoError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl ClipcamError {
    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by session lifecycle and clip segmentation requests
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Device or format negotiation failed; the session returns to idle
    #[error("Configuration failed: {details}")]
    Configuration { details: String },

    #[error("A clip is already open")]
    ClipAlreadyOpen,

    #[error("No clip is open")]
    NoOpenClip,

    #[error("Cannot {operation} while session is {from:?}")]
    InvalidTransition {
        from: SessionState,
        operation: &'static str,
    },

    /// Opening or finalizing clip storage failed
    #[error("Clip storage failed: {details}")]
    Storage { details: String },

    #[error("Session has shut down")]
    Closed,
}

/// Per-sample storage failures; never abort the clip
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error("Storage failure: {details}")]
    Storage { details: String },

    #[error("Corrupt clip file: {details}")]
    Corrupt { details: String },
}

impl WriteError {
    pub fn storage<S: Into<String>>(details: S) -> Self {
        Self::Storage {
            details: details.into(),
        }
    }
}

impl From<std::io::Error> for WriteError {
    fn from(e: std::io::Error) -> Self {
        Self::storage(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhotoError {
    /// The sensor pipeline failed entirely; no variant was produced
    #[error("Photo capture {request_id} failed: {details}")]
    CaptureFailed { request_id: u64, details: String },

    #[error("Variant {variant:?} cannot be produced from a video frame")]
    UnsupportedVariant { variant: PhotoVariant },

    #[error("Photo request names no variants")]
    EmptyRequest,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ClipcamError>;
