use std::{borrow::Cow, io::Write};

use image::{DynamicImage, GenericImageView, ImageEncoder, ImageFormat};
#[cfg(feature = "avif")]
use rgb::FromSlice;
use thiserror::Error;

/// The encoders below only take 8-bit RGB or RGBA buffers.
fn to_8bit(image: &'_ DynamicImage) -> Cow<'_, DynamicImage> {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => Cow::Borrowed(image),
        _ if image.color().has_alpha() => Cow::Owned(DynamicImage::from(image.to_rgba8())),
        _ => Cow::Owned(DynamicImage::from(image.to_rgb8())),
    }
}

fn write_png(image: &DynamicImage, writer: impl Write) -> Result<(), image::ImageError> {
    let encoder = image::codecs::png::PngEncoder::new_with_quality(
        writer,
        image::codecs::png::CompressionType::Best,
        image::codecs::png::FilterType::Adaptive,
    );

    let image = to_8bit(image);
    let (width, height) = image.dimensions();
    encoder.write_image(image.as_bytes(), width, height, image.color())
}

fn write_webp(image: &DynamicImage, quality: u8, mut writer: impl Write) -> Result<(), std::io::Error> {
    let image = to_8bit(image);
    let format = if image.color().has_alpha() {
        webp::PixelLayout::Rgba
    } else {
        webp::PixelLayout::Rgb
    };

    let (width, height) = image.dimensions();
    let encoder = webp::Encoder::new(image.as_bytes(), format, width, height);
    let output = encoder.encode(f32::from(quality));

    writer.write_all(&output)
}

fn write_jpeg(image: &DynamicImage, quality: u8, mut writer: impl Write) -> Result<(), image::ImageError> {
    // JPEG has no alpha channel.
    let image = DynamicImage::from(image.to_rgb8());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, quality.max(1));
    let (width, height) = image.dimensions();

    encoder.write_image(image.as_bytes(), width, height, image.color())
}

#[cfg(feature = "avif")]
fn write_avif(image: &DynamicImage, quality: u8, mut writer: impl Write) -> Result<(), EncodeError> {
    let quality = f32::from(quality);
    // From https://github.com/kornelski/cavif-rs/blob/main/src/main.rs
    let alpha_quality = ((quality + 100.0_f32) / 2.).min(quality + quality / 4. + 2.);

    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);

    let encoder = ravif::Encoder::new()
        .with_quality(quality)
        .with_alpha_quality(alpha_quality)
        .with_speed(6);

    let output = if image.color().has_alpha() {
        let data = image.to_rgba8();
        encoder.encode_rgba(ravif::Img::new(data.as_raw().as_rgba(), width, height))
    } else {
        let data = image.to_rgb8();
        encoder.encode_rgb(ravif::Img::new(data.as_raw().as_rgb(), width, height))
    };

    let output = output.map_err(|e| EncodeError::StringError(e.to_string()))?;

    writer.write_all(&output.avif_file)?;
    Ok(())
}

#[cfg(not(feature = "avif"))]
fn write_avif(_image: &DynamicImage, _quality: u8, _writer: impl Write) -> Result<(), EncodeError> {
    Err(EncodeError::UnsupportedFormat(ImageFormat::Avif))
}

/// True if this build can encode `format` at all.
pub fn can_encode(format: ImageFormat) -> bool {
    match format {
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Jpeg => true,
        ImageFormat::Avif => cfg!(feature = "avif"),
        _ => false,
    }
}

/// Encode `image` into `output_format`. `quality` runs from 0 to 100 and is ignored by lossless
/// formats.
pub fn write_image(
    image: &DynamicImage,
    output_format: ImageFormat,
    quality: u8,
    writer: impl Write,
) -> Result<(), EncodeError> {
    let quality = quality.min(100);
    match output_format {
        ImageFormat::Png => write_png(image, writer)?,
        ImageFormat::WebP => write_webp(image, quality, writer)?,
        ImageFormat::Avif => write_avif(image, quality, writer)?,
        ImageFormat::Jpeg => write_jpeg(image, quality, writer)?,
        _ => Err(EncodeError::UnsupportedFormat(output_format))?,
    };

    Ok(())
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error(transparent)]
    ImageError(image::ImageError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Unsupported output format {0:?}")]
    UnsupportedFormat(image::ImageFormat),
    #[error("{0}")]
    StringError(String),
}

impl From<image::ImageError> for EncodeError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => EncodeError::IoError(e),
            _ => EncodeError::ImageError(err),
        }
    }
}
