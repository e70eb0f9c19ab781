use crate::sample::DeviceOrientation;
use crate::session::FlashMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Artifact a photo request can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PhotoVariant {
    Jpeg,
    /// Square centre crop of the full image
    CroppedJpeg,
    Thumbnail,
    /// Unprocessed sensor data; only the photo pipeline has it
    Raw,
}

impl PhotoVariant {
    pub const ALL: [PhotoVariant; 4] = [
        PhotoVariant::Jpeg,
        PhotoVariant::CroppedJpeg,
        PhotoVariant::Thumbnail,
        PhotoVariant::Raw,
    ];

    /// Whether the variant can be rendered from a single video frame
    pub fn derivable_from_frame(self) -> bool {
        !matches!(self, PhotoVariant::Raw)
    }
}

/// Where the image for a request comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PhotoSource {
    /// Dedicated still-photo pipeline
    #[default]
    PhotoPipeline,
    /// Freeze the next live video frame
    VideoFrame,
}

/// One-shot capture intent
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRequest {
    pub variants: BTreeSet<PhotoVariant>,
    pub source: PhotoSource,
    pub flash_mode: FlashMode,
    /// Orientation recorded with the photo; portrait when unset
    pub orientation: Option<DeviceOrientation>,
}

impl PhotoRequest {
    pub fn new<I>(variants: I) -> Self
    where
        I: IntoIterator<Item = PhotoVariant>,
    {
        Self {
            variants: variants.into_iter().collect(),
            source: PhotoSource::PhotoPipeline,
            flash_mode: FlashMode::Off,
            orientation: None,
        }
    }

    pub fn from_video_frame(mut self) -> Self {
        self.source = PhotoSource::VideoFrame;
        self
    }

    pub fn with_flash(mut self, flash_mode: FlashMode) -> Self {
        self.flash_mode = flash_mode;
        self
    }

    pub fn with_orientation(mut self, orientation: DeviceOrientation) -> Self {
        self.orientation = Some(orientation);
        self
    }

    /// Requested variants the source cannot produce
    pub fn unsupported_variants(&self) -> BTreeSet<PhotoVariant> {
        match self.source {
            PhotoSource::PhotoPipeline => BTreeSet::new(),
            PhotoSource::VideoFrame => self
                .variants
                .iter()
                .copied()
                .filter(|v| !v.derivable_from_frame())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoMetadata {
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub source: PhotoSource,
    pub flash_mode: FlashMode,
    pub orientation: DeviceOrientation,
}

/// Terminal outcome of a successful request.
///
/// Every requested variant has an entry: the produced bytes, or `None` for a
/// recorded absence (including variants the source could not produce).
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoResult {
    pub request_id: u64,
    pub artifacts: BTreeMap<PhotoVariant, Option<Vec<u8>>>,
    pub metadata: PhotoMetadata,
}

impl PhotoResult {
    pub fn artifact(&self, variant: PhotoVariant) -> Option<&[u8]> {
        self.artifacts.get(&variant).and_then(|a| a.as_deref())
    }

    /// Variants that resolved to an absence
    pub fn missing(&self) -> Vec<PhotoVariant> {
        self.artifacts
            .iter()
            .filter(|(_, bytes)| bytes.is_none())
            .map(|(variant, _)| *variant)
            .collect()
    }
}
