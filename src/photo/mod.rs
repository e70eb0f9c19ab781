mod coordinator;
mod render;
mod request;
#[cfg(test)]
mod tests;

pub use coordinator::{PhotoCaptureCoordinator, PhotoPipeline, PhotoTicket};
pub use render::{render_variant, thumbnail_dimensions, RenderOptions};
pub use request::{PhotoMetadata, PhotoRequest, PhotoResult, PhotoSource, PhotoVariant};
