use std::{fs, path::Path};

use image::DynamicImage;
use tracing::{event, instrument, Level};

use crate::{write_format, Error, TargetFormat};

/// The operations the upload pipeline needs from an image backend.
pub trait ImageEditor: Send + Sync {
    /// True if the backend can decode sources at all.
    fn is_available(&self) -> bool;

    /// True if the backend can encode `format`.
    fn supports(&self, format: TargetFormat) -> bool;

    /// True if sources with this file extension can be decoded.
    fn can_decode(&self, extension: &str) -> bool;

    fn open(&self, path: &Path) -> Result<DynamicImage, Error>;

    /// Encode `image` and write it to `path`. Nothing is left at `path` when this fails.
    fn save(
        &self,
        image: &DynamicImage,
        path: &Path,
        format: TargetFormat,
        quality: u8,
    ) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub webp: bool,
    pub avif: bool,
    /// Reading AVIF sources needs dav1d, which is a separate build feature from AVIF output.
    pub avif_decode: bool,
}

impl Capabilities {
    /// Everything this build was compiled with.
    pub fn detect() -> Self {
        Capabilities {
            webp: write_format::can_encode(image::ImageFormat::WebP),
            avif: write_format::can_encode(image::ImageFormat::Avif),
            avif_decode: cfg!(feature = "avif-decode"),
        }
    }
}

/// Editor backed by the `image` crate for decoding and the workspace encoders for output.
#[derive(Debug, Clone)]
pub struct NativeEditor {
    capabilities: Capabilities,
}

impl NativeEditor {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::detect())
    }

    /// Restrict the editor to a subset of what it could do, e.g. to turn off AVIF output.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        let detected = Capabilities::detect();
        NativeEditor {
            capabilities: Capabilities {
                webp: capabilities.webp && detected.webp,
                avif: capabilities.avif && detected.avif,
                avif_decode: capabilities.avif_decode && detected.avif_decode,
            },
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

impl Default for NativeEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageEditor for NativeEditor {
    fn is_available(&self) -> bool {
        self.capabilities.webp || self.capabilities.avif
    }

    fn supports(&self, format: TargetFormat) -> bool {
        match format {
            TargetFormat::Webp => self.capabilities.webp,
            TargetFormat::Avif => self.capabilities.avif,
        }
    }

    fn can_decode(&self, extension: &str) -> bool {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "webp" => true,
            "avif" => self.capabilities.avif_decode,
            _ => false,
        }
    }

    #[instrument(skip(self))]
    fn open(&self, path: &Path) -> Result<DynamicImage, Error> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !self.can_decode(&extension) {
            return Err(Error::DecodeNotSupported(extension));
        }

        image::open(path).map_err(|e| Error::read_error(path, e))
    }

    #[instrument(skip(self, image))]
    fn save(
        &self,
        image: &DynamicImage,
        path: &Path,
        format: TargetFormat,
        quality: u8,
    ) -> Result<(), Error> {
        if !self.supports(format) {
            return Err(Error::FormatNotSupported(format));
        }

        let mut output = Vec::new();
        write_format::write_image(image, format.image_format(), quality, &mut output)
            .map_err(|e| Error::save_error(path, e))?;
        write_atomically(path, &output).map_err(|e| Error::save_error(path, e))?;

        event!(Level::DEBUG, path=%path.display(), bytes = output.len(), "Saved image");
        Ok(())
    }
}

/// Write `data` to a sibling temp file and rename it over `path`. The temp file is removed if
/// either step fails, so `path` ends up either complete or untouched.
fn write_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let result = fs::write(&temp_path, data).and_then(|_| fs::rename(&temp_path, path));
    if result.is_err() {
        fs::remove_file(&temp_path).ok();
    }
    result
}
