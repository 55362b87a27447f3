use std::{num::NonZeroU32, path::Path};

use pixrefiner_convert::{resize, Error, ImageEditor, TargetFormat};

pub(super) const THUMBNAIL_SIZE: NonZeroU32 = match NonZeroU32::new(150) {
    Some(size) => size,
    None => panic!("thumbnail size must be positive"),
};
pub(super) const THUMBNAIL_SUFFIX: &str = "-150x150";
pub(super) const THUMBNAIL_NAME: &str = "thumbnail";

/// Cut a fixed-size, center-cropped thumbnail from `source`.
pub(super) fn generate(
    editor: &dyn ImageEditor,
    source: &Path,
    destination: &Path,
    format: TargetFormat,
    quality: u8,
) -> Result<(), Error> {
    let image = editor.open(source)?;
    let thumbnail = resize::crop_to_fill(&image, THUMBNAIL_SIZE, THUMBNAIL_SIZE);
    editor.save(&thumbnail, destination, format, quality)
}
