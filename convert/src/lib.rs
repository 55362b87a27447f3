use std::path::Path;

use image::ImageResult;

pub use converter::*;
pub use editor::*;
pub use error::Error;
pub use format::*;
pub use resize::{ImageSizeTransform, ResizeMode};
pub use write_format::EncodeError;

mod converter;
mod editor;
mod error;
mod format;
pub mod resize;
pub mod write_format;

/// Read the pixel dimensions of an image file without decoding the whole thing.
pub fn image_dimensions(path: &Path) -> ImageResult<(u32, u32)> {
    image::image_dimensions(path)
}
