use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// File extensions that the upload pipeline will try to convert.
pub const CONVERTIBLE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "avif"];

/// The format that derivatives are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Webp,
    Avif,
}

impl TargetFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Webp => "image/webp",
            Self::Avif => "image/avif",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            Self::Webp => image::ImageFormat::WebP,
            Self::Avif => image::ImageFormat::Avif,
        }
    }

    /// True if a file with this (lowercase) extension is already in this format.
    pub fn matches_extension(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case(self.extension())
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webp => f.write_str("WebP"),
            Self::Avif => f.write_str("AVIF"),
        }
    }
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webp" => Ok(Self::Webp),
            "avif" => Ok(Self::Avif),
            _ => Err(format!("Unknown target format {s}")),
        }
    }
}

/// Guess a MIME type from a file extension, for the image types the media library accepts.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "gif" => "image/gif",
        _ => return None,
    };

    Some(mime)
}

pub fn is_convertible_extension(extension: &str) -> bool {
    CONVERTIBLE_EXTENSIONS
        .iter()
        .any(|e| e.eq_ignore_ascii_case(extension))
}
