use super::PhotoVariant;
use crate::config::PhotoConfig;
use crate::sample::{Sample, SampleFormat};
use tracing::debug;

#[cfg(feature = "frame_render")]
use image::{codecs::jpeg::JpegEncoder, ImageFormat, Rgb, RgbImage};

/// Encoding parameters for frame-derived photos
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub jpeg_quality: u8,
    /// Longest edge of a thumbnail, in pixels
    pub thumbnail_size: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            thumbnail_size: 160,
        }
    }
}

impl From<&PhotoConfig> for RenderOptions {
    fn from(config: &PhotoConfig) -> Self {
        Self {
            jpeg_quality: config.jpeg_quality,
            thumbnail_size: config.thumbnail_size,
        }
    }
}

/// Produce one variant from a captured frame.
///
/// `Ok(None)` means the variant cannot be produced from this frame and is
/// recorded as absent.
pub fn render_variant(
    frame: &Sample,
    variant: PhotoVariant,
    options: &RenderOptions,
) -> Result<Option<Vec<u8>>, String> {
    if variant == PhotoVariant::Raw {
        return Ok(Some(frame.data.to_vec()));
    }

    #[cfg(feature = "frame_render")]
    {
        if variant == PhotoVariant::Jpeg && frame.format == SampleFormat::Mjpeg {
            return Ok(Some(frame.data.to_vec()));
        }

        let image = match decode_rgb(frame)? {
            Some(image) => image,
            None => return Ok(None),
        };

        let rendered = match variant {
            PhotoVariant::CroppedJpeg => centre_square(&image),
            PhotoVariant::Thumbnail => {
                let (width, height) =
                    thumbnail_dimensions(image.width(), image.height(), options.thumbnail_size);
                image::imageops::thumbnail(&image, width, height)
            }
            PhotoVariant::Jpeg | PhotoVariant::Raw => image,
        };

        encode_jpeg(&rendered, options.jpeg_quality).map(Some)
    }

    #[cfg(not(feature = "frame_render"))]
    {
        let _ = options;
        if variant == PhotoVariant::Jpeg && frame.format == SampleFormat::Mjpeg {
            return Ok(Some(frame.data.to_vec()));
        }
        debug!(
            "Variant {:?} of frame {} needs the frame_render feature; recording absence",
            variant, frame.id
        );
        Ok(None)
    }
}

/// Scale `width`x`height` so the longest edge is at most `max_edge`
pub fn thumbnail_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge || longest == 0 {
        return (width.max(1), height.max(1));
    }
    let scale = |edge: u32| ((edge as u64 * max_edge as u64) / longest as u64).max(1) as u32;
    (scale(width), scale(height))
}

#[cfg(feature = "frame_render")]
fn decode_rgb(frame: &Sample) -> Result<Option<RgbImage>, String> {
    match frame.format {
        SampleFormat::Rgb24 => RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec())
            .map(Some)
            .ok_or_else(|| {
                format!(
                    "RGB24 frame {} is too small for {}x{}",
                    frame.id, frame.width, frame.height
                )
            }),
        SampleFormat::Mjpeg => image::load_from_memory_with_format(&frame.data, ImageFormat::Jpeg)
            .map(|image| Some(image.to_rgb8()))
            .map_err(|e| format!("JPEG decode of frame {} failed: {}", frame.id, e)),
        SampleFormat::Yuyv => yuyv_to_rgb(frame).map(Some),
        other => {
            debug!("Frame {} has non-image format {:?}", frame.id, other);
            Ok(None)
        }
    }
}

/// YUYV packs two pixels in four bytes: Y0 U Y1 V
#[cfg(feature = "frame_render")]
fn yuyv_to_rgb(frame: &Sample) -> Result<RgbImage, String> {
    let width = frame.width;
    let height = frame.height;
    if frame.data.len() < (width * height * 2) as usize {
        return Err(format!("YUYV frame {} is truncated", frame.id));
    }

    let mut image = RgbImage::new(width, height);
    for y in 0..height {
        for x in (0..width).step_by(2) {
            let base = ((y * width + x) * 2) as usize;
            if base + 3 >= frame.data.len() {
                break;
            }
            let (y0, u, y1, v) = (
                frame.data[base],
                frame.data[base + 1],
                frame.data[base + 2],
                frame.data[base + 3],
            );
            image.put_pixel(x, y, yuv_pixel(y0, u, v));
            if x + 1 < width {
                image.put_pixel(x + 1, y, yuv_pixel(y1, u, v));
            }
        }
    }
    Ok(image)
}

#[cfg(feature = "frame_render")]
fn yuv_pixel(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = 1.164 * (y as f32 - 16.0);
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |value: f32| value.round().clamp(0.0, 255.0) as u8;
    Rgb([
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
    ])
}

#[cfg(feature = "frame_render")]
fn centre_square(image: &RgbImage) -> RgbImage {
    let side = image.width().min(image.height());
    let x = (image.width() - side) / 2;
    let y = (image.height() - side) / 2;
    image::imageops::crop_imm(image, x, y, side, side).to_image()
}

#[cfg(feature = "frame_render")]
fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        encoder
            .encode_image(image)
            .map_err(|e| format!("JPEG encoding failed: {}", e))?;
    }
    Ok(buf)
}
