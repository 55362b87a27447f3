use std::{collections::BTreeMap, fs, io, path::Path};

use pixrefiner_convert::{Derivative, TargetFormat};
use pixrefiner_store::{AttachmentMetadata, SizeEntry};

use super::thumbnail::{THUMBNAIL_NAME, THUMBNAIL_SIZE};

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(super) fn size_name(dimension: u32) -> String {
    format!("custom-{dimension}")
}

/// Build attachment metadata for a converted upload: the main file, every extra size variant,
/// and the thumbnail if there is one.
pub(super) fn build(
    primary: &Derivative,
    extra_variants: &[(u32, Derivative)],
    thumbnail: Option<&Path>,
    format: TargetFormat,
) -> io::Result<AttachmentMetadata> {
    let filesize = fs::metadata(&primary.path)?.len();
    let mime_type = format.mime_type().to_string();

    let mut sizes = BTreeMap::new();
    for (dimension, variant) in extra_variants {
        sizes.insert(
            size_name(*dimension),
            SizeEntry {
                file: file_name(&variant.path),
                width: variant.width,
                height: variant.height,
                mime_type: mime_type.clone(),
            },
        );
    }

    if let Some(thumbnail) = thumbnail {
        sizes.insert(
            THUMBNAIL_NAME.to_string(),
            SizeEntry {
                file: file_name(thumbnail),
                width: THUMBNAIL_SIZE.get(),
                height: THUMBNAIL_SIZE.get(),
                mime_type,
            },
        );
    }

    Ok(AttachmentMetadata {
        width: primary.width,
        height: primary.height,
        file: file_name(&primary.path),
        filesize,
        sizes,
    })
}
