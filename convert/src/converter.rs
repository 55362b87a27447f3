use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
};

use image::GenericImageView;
use tracing::{event, instrument, Level};

use crate::{resize, Error, ImageEditor, ResizeMode, TargetFormat};

#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    pub format: TargetFormat,
    /// 0 to 100
    pub quality: u8,
    pub resize_mode: ResizeMode,
}

/// A file written by [FormatConverter].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// False when the source already fit and was only re-encoded.
    pub resized: bool,
}

/// Converts one source file into one resized, re-encoded derivative.
pub struct FormatConverter<'a> {
    editor: &'a dyn ImageEditor,
    options: ConvertOptions,
}

/// Fails with a capability error unless `editor` can produce `format`.
pub fn check_backend(editor: &dyn ImageEditor, format: TargetFormat) -> Result<(), Error> {
    if !editor.is_available() {
        Err(Error::NoBackend)
    } else if !editor.supports(format) {
        Err(Error::FormatNotSupported(format))
    } else {
        Ok(())
    }
}

fn log_prefix(attachment_id: Option<u64>) -> String {
    match attachment_id {
        Some(id) => format!("[#{id}] "),
        None => String::new(),
    }
}

impl<'a> FormatConverter<'a> {
    pub fn new(editor: &'a dyn ImageEditor, options: ConvertOptions) -> Self {
        FormatConverter { editor, options }
    }

    /// `{dir}/{stem}{suffix}.{ext}` for the configured output format.
    pub fn output_path(&self, source: &Path, suffix: &str) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        let file_name = format!("{stem}{suffix}.{}", self.options.format.extension());
        source.with_file_name(file_name)
    }

    /// Convert `source` to the derivative path built from `suffix`.
    pub fn convert(
        &self,
        source: &Path,
        dimension: NonZeroU32,
        log: Option<&mut Vec<String>>,
        attachment_id: Option<u64>,
        suffix: &str,
    ) -> Result<Derivative, Error> {
        let destination = self.output_path(source, suffix);
        self.convert_to(source, &destination, dimension, log, attachment_id)
    }

    /// Convert `source` into `destination`. The source is never modified.
    #[instrument(skip(self, log))]
    pub fn convert_to(
        &self,
        source: &Path,
        destination: &Path,
        dimension: NonZeroU32,
        mut log: Option<&mut Vec<String>>,
        attachment_id: Option<u64>,
    ) -> Result<Derivative, Error> {
        let prefix = log_prefix(attachment_id);
        let mut push = |line: String| {
            event!(Level::INFO, "{line}");
            if let Some(log) = log.as_deref_mut() {
                log.push(line);
            }
        };

        let format = self.options.format;
        if let Err(e) = check_backend(self.editor, format) {
            push(format!("{prefix}Error: {e}"));
            return Err(e);
        }

        let image = match self.editor.open(source) {
            Ok(image) => image,
            Err(e) => {
                push(format!(
                    "{prefix}Error: could not open {}: {e}",
                    source.display()
                ));
                return Err(e);
            }
        };

        let resized = resize::fit_within(&image, self.options.resize_mode, dimension);
        let did_resize = resized.is_some();
        let output = resized.unwrap_or(image);
        let (width, height) = output.dimensions();

        if let Err(e) = self
            .editor
            .save(&output, destination, format, self.options.quality)
        {
            push(format!(
                "{prefix}Error: failed to save {} as {format}: {e}",
                destination.display()
            ));
            return Err(e);
        }

        let resize_note = if did_resize {
            format!("resized to {width}x{height}")
        } else {
            format!("kept at {width}x{height}, no resize needed")
        };
        push(format!(
            "{prefix}Converted: {} -> {} ({resize_note})",
            source.display(),
            destination.display()
        ));

        Ok(Derivative {
            path: destination.to_path_buf(),
            width,
            height,
            resized: did_resize,
        })
    }
}
