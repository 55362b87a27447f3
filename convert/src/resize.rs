use std::num::NonZeroU32;

use image::{imageops, DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

/// Which side of the image the configured maximum dimensions apply to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    #[default]
    Width,
    Height,
}

impl ResizeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Width => "width",
            Self::Height => "height",
        }
    }
}

pub struct ImageSizeTransform {
    /// Desired width of the scaled object
    pub width: Option<NonZeroU32>,
    /// Desired height of the scaled object
    pub height: Option<NonZeroU32>,

    /// Preserve aspect ratio, only checked if both width and height are provided.
    pub preserve_aspect_ratio: bool,
}

impl ImageSizeTransform {
    /// Constrain one side to `max`, letting the other side follow the aspect ratio.
    pub fn bounded(mode: ResizeMode, max: NonZeroU32) -> Self {
        let (width, height) = match mode {
            ResizeMode::Width => (Some(max), None),
            ResizeMode::Height => (None, Some(max)),
        };

        ImageSizeTransform {
            width,
            height,
            preserve_aspect_ratio: true,
        }
    }

    /// Scale and crop to exactly `width` x `height`.
    pub fn exact(width: NonZeroU32, height: NonZeroU32) -> Self {
        ImageSizeTransform {
            width: Some(width),
            height: Some(height),
            preserve_aspect_ratio: false,
        }
    }
}

pub fn resize_image(input: &DynamicImage, transform: &ImageSizeTransform) -> DynamicImage {
    let tw = transform.width.map(|w| w.get());
    let th = transform.height.map(|h| h.get());

    match (tw, th, transform.preserve_aspect_ratio) {
        (Some(tw), Some(th), false) => {
            input.resize_to_fill(tw, th, imageops::FilterType::CatmullRom)
        }
        (Some(tw), Some(th), true) => input.resize(tw, th, imageops::FilterType::CatmullRom),
        (Some(tw), None, _) => input.resize(tw, u32::MAX, imageops::FilterType::CatmullRom),
        (None, Some(th), _) => input.resize(u32::MAX, th, imageops::FilterType::CatmullRom),
        (None, None, _) => input.clone(),
    }
}

/// Shrink the image so that the side selected by `mode` is at most `max`. Images that already
/// fit are returned as `None`, since they only need to be re-encoded.
pub fn fit_within(input: &DynamicImage, mode: ResizeMode, max: NonZeroU32) -> Option<DynamicImage> {
    let (width, height) = input.dimensions();
    let current = match mode {
        ResizeMode::Width => width,
        ResizeMode::Height => height,
    };

    if current <= max.get() {
        return None;
    }

    Some(resize_image(
        input,
        &ImageSizeTransform::bounded(mode, max),
    ))
}

/// Scale and center-crop to a fixed box, the way thumbnails are cut.
pub fn crop_to_fill(input: &DynamicImage, width: NonZeroU32, height: NonZeroU32) -> DynamicImage {
    resize_image(input, &ImageSizeTransform::exact(width, height))
}
