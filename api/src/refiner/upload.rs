use std::{
    fmt, fs,
    num::NonZeroU32,
    path::{Path, PathBuf},
};

use pixrefiner_convert::{
    check_backend, is_convertible_extension, Derivative, Error as ConvertError, FormatConverter,
};
use pixrefiner_storage as storage;
use pixrefiner_store::{AttachmentId, AttachmentMetadata, ConversionLog, ConversionSettings, Settings};
use serde::{Deserialize, Serialize};
use tracing::{event, instrument, Level};

use super::{log_prefix, metadata, thumbnail, Refiner};

/// The file the host just received. Handed to the pipeline and handed back, either untouched
/// or pointing at the converted replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDescriptor {
    pub file: PathBuf,
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// A new upload. Honors the auto-conversion switch.
    Upload,
    /// An explicit admin request to convert an existing attachment.
    Batch,
}

/// Why an upload was handed back without trying to convert it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassReason {
    AutoConversionDisabled,
    UnsupportedExtension,
    Excluded,
    NoSizesConfigured,
    DirectoryNotWritable,
    MissingFile,
    BelowMinimumSize,
    BackendUnavailable,
}

/// The step that failed when an upload was rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PerVariantConversion,
    ThumbnailGeneration,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PerVariantConversion => "size variant conversion",
            Self::ThumbnailGeneration => "thumbnail generation",
            Self::Commit => "replacing the original",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    PassedThrough {
        reason: PassReason,
    },
    Converted {
        /// Size variants written, not counting the thumbnail.
        variants: usize,
        original_deleted: bool,
    },
    RolledBack {
        stage: Stage,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub descriptor: UploadDescriptor,
    pub outcome: Outcome,
    /// Metadata for the converted file. When the upload has no attachment yet, the caller
    /// should store this with the attachment it creates.
    pub metadata: Option<AttachmentMetadata>,
}

impl UploadResult {
    fn unchanged(descriptor: UploadDescriptor, outcome: Outcome) -> Self {
        UploadResult {
            descriptor,
            outcome,
            metadata: None,
        }
    }

    pub fn is_converted(&self) -> bool {
        matches!(self.outcome, Outcome::Converted { .. })
    }
}

/// The in-flight state of one upload.
struct UploadArtifact {
    original: PathBuf,
    mime_type: String,
    attachment_id: Option<AttachmentId>,
    /// Every file written so far, in order. Rollback removes these.
    derived: Vec<PathBuf>,
}

impl UploadArtifact {
    fn new(upload: &UploadDescriptor, attachment_id: Option<AttachmentId>) -> Self {
        UploadArtifact {
            original: upload.file.clone(),
            mime_type: upload.mime_type.clone(),
            attachment_id,
            derived: Vec::new(),
        }
    }
}

struct Variant {
    dimension: NonZeroU32,
    derivative: Derivative,
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Where the primary variant goes when it would otherwise overwrite the original before the
/// upload is known to succeed.
fn staging_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    let extension = extension_of(path);
    path.with_file_name(format!("{stem}.refining.{extension}"))
}

impl<'a> Refiner<'a> {
    /// Convert a new upload. Never fails: every problem is written to the conversion log and
    /// the upload is handed back unchanged.
    pub fn handle_upload(
        &self,
        upload: UploadDescriptor,
        attachment_id: Option<AttachmentId>,
    ) -> UploadResult {
        self.process(upload, attachment_id, Trigger::Upload)
    }

    #[instrument(skip(self), fields(file = %upload.file.display()))]
    pub(crate) fn process(
        &self,
        upload: UploadDescriptor,
        attachment_id: Option<AttachmentId>,
        trigger: Trigger,
    ) -> UploadResult {
        let settings = Settings::new(self.options).load();
        let mut log = Vec::new();

        let result = self.run(upload, attachment_id, trigger, &settings, &mut log);
        event!(Level::INFO, outcome = ?result.outcome, "Upload processed");

        if let Err(e) = ConversionLog::new(self.options).append(log) {
            event!(Level::ERROR, error = %e, "Failed to write conversion log");
        }

        result
    }

    fn run(
        &self,
        upload: UploadDescriptor,
        attachment_id: Option<AttachmentId>,
        trigger: Trigger,
        settings: &ConversionSettings,
        log: &mut Vec<String>,
    ) -> UploadResult {
        if let Some(reason) = self.pass_through_reason(&upload, attachment_id, trigger, settings, log)
        {
            event!(Level::DEBUG, ?reason, "Passing upload through");
            return UploadResult::unchanged(upload, Outcome::PassedThrough { reason });
        }

        let prefix = log_prefix(attachment_id);
        let format = settings.target_format();
        let converter = FormatConverter::new(self.editor, settings.convert_options());
        let mut artifact = UploadArtifact::new(&upload, attachment_id);

        // Size variants. The first one replaces the upload.
        let mut variants = Vec::with_capacity(settings.dimensions().len());
        let mut staged = None;
        for (index, dimension) in settings.dimensions().iter().copied().enumerate() {
            let suffix = if index == 0 {
                String::new()
            } else {
                format!("-{dimension}")
            };

            let mut destination = converter.output_path(&artifact.original, &suffix);
            if destination == artifact.original {
                // The upload is already in the target format. Keep the original in place
                // until everything else has worked.
                destination = staging_path(&destination);
                staged = Some(destination.clone());
            }

            let existed = destination.exists();
            match converter.convert_to(
                &artifact.original,
                &destination,
                dimension,
                Some(&mut *log),
                attachment_id.map(|id| id.0),
            ) {
                Ok(derivative) => {
                    artifact.derived.push(derivative.path.clone());
                    variants.push(Variant {
                        dimension,
                        derivative,
                    });
                }
                Err(e) => {
                    // A save that died partway can leave a truncated file.
                    if !existed && destination.exists() {
                        artifact.derived.push(destination);
                    }
                    return self.roll_back(upload, &artifact, Stage::PerVariantConversion, &e, log);
                }
            }
        }

        // Thumbnail
        let thumbnail_path = converter.output_path(&artifact.original, thumbnail::THUMBNAIL_SUFFIX);
        let thumbnail_existed = thumbnail_path.exists();
        if let Err(e) = thumbnail::generate(
            self.editor,
            &artifact.original,
            &thumbnail_path,
            format,
            settings.quality,
        ) {
            log.push(format!(
                "{prefix}Error: failed to generate thumbnail {}: {e}",
                thumbnail_path.display()
            ));
            if !thumbnail_existed && thumbnail_path.exists() {
                artifact.derived.push(thumbnail_path);
            }
            return self.roll_back(upload, &artifact, Stage::ThumbnailGeneration, &e, log);
        }
        artifact.derived.push(thumbnail_path.clone());
        log.push(format!(
            "{prefix}Generated thumbnail: {}",
            thumbnail_path.display()
        ));

        let mut variants = variants.into_iter();
        let Some(mut primary) = variants.next() else {
            // pass_through_reason rejects an empty size list, so this can't happen.
            return self.roll_back(upload, &artifact, Stage::Commit, &"no size variants", log);
        };

        if let Some(staging) = staged {
            if let Err(e) = fs::rename(&staging, &artifact.original) {
                return self.roll_back(upload, &artifact, Stage::Commit, &e, log);
            }
            primary.derivative.path = artifact.original.clone();
        }

        // Everything is on disk. From here on failures are logged but nothing is undone.
        let extra_variants = variants
            .map(|v| (v.dimension.get(), v.derivative))
            .collect::<Vec<_>>();
        let primary = primary.derivative;

        let descriptor = UploadDescriptor {
            file: primary.path.clone(),
            url: storage::replace_url_file_name(&upload.url, &file_name_of(&primary.path)),
            mime_type: format.mime_type().to_string(),
        };

        let thumbnail =
            self.ensure_thumbnail(&primary.path, &thumbnail_path, settings, &prefix, log);
        let metadata =
            match metadata::build(&primary, &extra_variants, thumbnail.as_deref(), format) {
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    log.push(format!(
                        "{prefix}Error: could not regenerate metadata for {}: {e}",
                        primary.path.display()
                    ));
                    None
                }
            };

        if let Some(id) = attachment_id {
            self.update_attachment(id, &descriptor, metadata.as_ref(), &prefix, log);
        }

        let original_deleted =
            self.clean_up_original(&artifact.original, &primary.path, settings, &prefix, log);

        log.push(format!(
            "{prefix}Finished {} ({}): {} size(s) as {format}",
            artifact.original.display(),
            artifact.mime_type,
            extra_variants.len() + 1
        ));

        UploadResult {
            descriptor,
            outcome: Outcome::Converted {
                variants: extra_variants.len() + 1,
                original_deleted,
            },
            metadata,
        }
    }

    fn pass_through_reason(
        &self,
        upload: &UploadDescriptor,
        attachment_id: Option<AttachmentId>,
        trigger: Trigger,
        settings: &ConversionSettings,
        log: &mut Vec<String>,
    ) -> Option<PassReason> {
        let prefix = log_prefix(attachment_id);

        if trigger == Trigger::Upload && settings.disable_auto_conversion {
            return Some(PassReason::AutoConversionDisabled);
        }

        if !is_convertible_extension(&extension_of(&upload.file)) {
            return Some(PassReason::UnsupportedExtension);
        }

        if let Some(id) = attachment_id {
            if settings.is_excluded(id) {
                log.push(format!(
                    "{prefix}Skipped: {} is excluded from conversion",
                    upload.file.display()
                ));
                return Some(PassReason::Excluded);
            }
        }

        if settings.dimensions().is_empty() {
            return Some(PassReason::NoSizesConfigured);
        }

        let directory = upload
            .file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if !storage::is_writable(directory) {
            log.push(format!(
                "{prefix}Error: upload directory {} is not writable",
                directory.display()
            ));
            return Some(PassReason::DirectoryNotWritable);
        }

        let size = match fs::metadata(&upload.file) {
            Ok(m) => m.len(),
            Err(e) => {
                log.push(format!(
                    "{prefix}Error: cannot read {}: {e}",
                    upload.file.display()
                ));
                return Some(PassReason::MissingFile);
            }
        };

        if settings.min_size_kb > 0 && size < settings.min_size_bytes() {
            log.push(format!(
                "{prefix}Skipped: {} is {} bytes, below the {} KB minimum",
                upload.file.display(),
                size,
                settings.min_size_kb
            ));
            return Some(PassReason::BelowMinimumSize);
        }

        if let Err(e) = check_backend(self.editor, settings.target_format()) {
            log.push(format!("{prefix}Error: {e}"));
            return Some(PassReason::BackendUnavailable);
        }

        let extension = extension_of(&upload.file);
        if !self.editor.can_decode(&extension) {
            log.push(format!(
                "{prefix}Error: {}: {}",
                upload.file.display(),
                ConvertError::DecodeNotSupported(extension)
            ));
            return Some(PassReason::BackendUnavailable);
        }

        None
    }

    fn roll_back(
        &self,
        upload: UploadDescriptor,
        artifact: &UploadArtifact,
        stage: Stage,
        error: &dyn fmt::Display,
        log: &mut Vec<String>,
    ) -> UploadResult {
        let prefix = log_prefix(artifact.attachment_id);
        log.push(format!(
            "{prefix}Error: {stage} failed for {}: {error}; rolling back {} file(s)",
            artifact.original.display(),
            artifact.derived.len()
        ));

        for failure in storage::remove_files(&artifact.derived) {
            log.push(format!("{prefix}Error: rollback could not remove {failure}"));
        }

        log.push(format!(
            "{prefix}Original preserved: {}",
            artifact.original.display()
        ));

        event!(Level::WARN, %stage, %error, "Rolled back conversion");
        UploadResult::unchanged(upload, Outcome::RolledBack { stage })
    }

    /// The thumbnail should still be there, but if something removed it, cut it again rather
    /// than registering a missing file.
    fn ensure_thumbnail(
        &self,
        source: &Path,
        path: &Path,
        settings: &ConversionSettings,
        prefix: &str,
        log: &mut Vec<String>,
    ) -> Option<PathBuf> {
        if path.exists() {
            return Some(path.to_path_buf());
        }

        log.push(format!(
            "{prefix}Thumbnail {} missing, regenerating",
            path.display()
        ));
        match thumbnail::generate(
            self.editor,
            source,
            path,
            settings.target_format(),
            settings.quality,
        ) {
            Ok(()) => Some(path.to_path_buf()),
            Err(e) => {
                log.push(format!(
                    "{prefix}Error: failed to regenerate thumbnail {}: {e}",
                    path.display()
                ));
                None
            }
        }
    }

    fn update_attachment(
        &self,
        id: AttachmentId,
        descriptor: &UploadDescriptor,
        metadata: Option<&AttachmentMetadata>,
        prefix: &str,
        log: &mut Vec<String>,
    ) {
        let result = metadata
            .map_or(Ok(()), |m| self.library.update_metadata(id, m))
            .and_then(|_| {
                self.library
                    .set_file(id, descriptor.file.clone(), descriptor.url.clone())
            })
            .and_then(|_| self.library.set_mime_type(id, &descriptor.mime_type));

        if let Err(e) = result {
            log.push(format!("{prefix}Error: failed to update attachment {id}: {e}"));
        }
    }

    /// Delete the original once it has been replaced, unless originals are kept. Returns true
    /// if it was deleted.
    fn clean_up_original(
        &self,
        original: &Path,
        replacement: &Path,
        settings: &ConversionSettings,
        prefix: &str,
        log: &mut Vec<String>,
    ) -> bool {
        if original == replacement {
            return false;
        }

        if settings.preserve_originals {
            log.push(format!("{prefix}Preserved original: {}", original.display()));
            return false;
        }

        match storage::delete_with_retry(original, &self.delete_policy) {
            Ok(attempts) => {
                let note = if attempts > 1 {
                    format!(" after {attempts} attempts")
                } else {
                    String::new()
                };
                log.push(format!(
                    "{prefix}Deleted original: {}{note}",
                    original.display()
                ));
                true
            }
            Err(e) => {
                log.push(format!("{prefix}Error: {e}"));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, path::Path};

    use assert_matches::assert_matches;
    use image::GenericImageView;
    use pixrefiner_convert::{
        Capabilities, EncodeError, Error as ConvertError, ImageEditor, NativeEditor, TargetFormat,
    };
    use pixrefiner_storage::RetryPolicy;
    use pixrefiner_store::{
        AttachmentStore, ConversionLog, MediaLibrary, NewAttachment, OptionStore, Options,
        SettingName, Settings,
    };
    use serde_json::json;
    use temp_dir::TempDir;

    use super::*;

    /// Fails every save whose file name contains `fail_on`.
    struct FlakyEditor {
        inner: NativeEditor,
        fail_on: &'static str,
    }

    impl ImageEditor for FlakyEditor {
        fn is_available(&self) -> bool {
            self.inner.is_available()
        }

        fn supports(&self, format: TargetFormat) -> bool {
            self.inner.supports(format)
        }

        fn can_decode(&self, extension: &str) -> bool {
            self.inner.can_decode(extension)
        }

        fn open(&self, path: &Path) -> Result<image::DynamicImage, ConvertError> {
            self.inner.open(path)
        }

        fn save(
            &self,
            image: &image::DynamicImage,
            path: &Path,
            format: TargetFormat,
            quality: u8,
        ) -> Result<(), ConvertError> {
            if file_name_of(path).contains(self.fail_on) {
                return Err(ConvertError::save_error(
                    path,
                    EncodeError::StringError("simulated editor failure".to_string()),
                ));
            }
            self.inner.save(image, path, format, quality)
        }
    }

    /// Like `FlakyEditor`, but leaves a truncated file behind before failing, the way a full
    /// disk would.
    struct TruncatingEditor {
        inner: NativeEditor,
        fail_on: &'static str,
    }

    impl ImageEditor for TruncatingEditor {
        fn is_available(&self) -> bool {
            self.inner.is_available()
        }

        fn supports(&self, format: TargetFormat) -> bool {
            self.inner.supports(format)
        }

        fn can_decode(&self, extension: &str) -> bool {
            self.inner.can_decode(extension)
        }

        fn open(&self, path: &Path) -> Result<image::DynamicImage, ConvertError> {
            self.inner.open(path)
        }

        fn save(
            &self,
            image: &image::DynamicImage,
            path: &Path,
            format: TargetFormat,
            quality: u8,
        ) -> Result<(), ConvertError> {
            if file_name_of(path).contains(self.fail_on) {
                fs::write(path, b"RIFF\0\0").unwrap();
                return Err(ConvertError::save_error(
                    path,
                    std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"),
                ));
            }
            self.inner.save(image, path, format, quality)
        }
    }

    struct Fixture {
        dir: TempDir,
        options: Options,
        library: MediaLibrary,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                dir: TempDir::new().unwrap(),
                options: Options::in_memory(),
                library: MediaLibrary::in_memory(),
            }
        }

        fn settings(&self) -> Settings<'_> {
            Settings::new(&self.options)
        }

        fn upload(&self, name: &str, width: u32, height: u32) -> UploadDescriptor {
            let path = self.dir.child(name);
            pixrefiner_test::write_image(&path, width, height);
            self.descriptor(name)
        }

        fn avif_upload(&self, name: &str, width: u32, height: u32) -> UploadDescriptor {
            let mut data = Vec::new();
            pixrefiner_convert::write_format::write_image(
                &pixrefiner_test::test_image(width, height),
                image::ImageFormat::Avif,
                80,
                &mut data,
            )
            .unwrap();
            fs::write(self.dir.child(name), data).unwrap();
            self.descriptor(name)
        }

        fn descriptor(&self, name: &str) -> UploadDescriptor {
            let extension = extension_of(Path::new(name));
            UploadDescriptor {
                file: self.dir.child(name),
                url: format!("https://example.com/uploads/{name}"),
                mime_type: pixrefiner_convert::mime_for_extension(&extension)
                    .unwrap_or("application/octet-stream")
                    .to_string(),
            }
        }

        fn run(&self, editor: &dyn ImageEditor, upload: UploadDescriptor) -> UploadResult {
            self.run_for(editor, upload, None)
        }

        fn run_for(
            &self,
            editor: &dyn ImageEditor,
            upload: UploadDescriptor,
            id: Option<AttachmentId>,
        ) -> UploadResult {
            Refiner::new(&self.options, &self.library, editor)
                .with_delete_policy(RetryPolicy::immediate(5))
                .handle_upload(upload, id)
        }

        fn files(&self) -> BTreeSet<String> {
            fs::read_dir(self.dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        }

        fn log(&self) -> Vec<String> {
            ConversionLog::new(&self.options).entries()
        }

        fn log_contains(&self, needle: &str) -> bool {
            self.log().iter().any(|line| line.contains(needle))
        }
    }

    fn names(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn converts_jpeg_to_webp() {
        let fixture = Fixture::new();
        fixture.settings().set_max_widths("800").unwrap();
        fixture.settings().set_quality(80).unwrap();
        let upload = fixture.upload("photo.jpg", 1600, 1200);

        let result = fixture.run(&NativeEditor::new(), upload);

        assert_eq!(
            result.outcome,
            Outcome::Converted {
                variants: 1,
                original_deleted: true
            }
        );
        assert_eq!(result.descriptor.file, fixture.dir.child("photo.webp"));
        assert_eq!(result.descriptor.url, "https://example.com/uploads/photo.webp");
        assert_eq!(result.descriptor.mime_type, "image/webp");

        let converted = image::open(fixture.dir.child("photo.webp")).unwrap();
        assert_eq!(converted.dimensions(), (800, 600));
        let thumbnail = image::open(fixture.dir.child("photo-150x150.webp")).unwrap();
        assert_eq!(thumbnail.dimensions(), (150, 150));
        assert_eq!(fixture.files(), names(&["photo.webp", "photo-150x150.webp"]));

        let metadata = result.metadata.unwrap();
        assert_eq!((metadata.width, metadata.height), (800, 600));
        assert_eq!(metadata.file, "photo.webp");
        assert!(metadata.sizes.contains_key("thumbnail"));

        assert!(fixture.log_contains("Converted"));
        assert!(fixture.log_contains("Deleted original"));
    }

    #[test]
    fn size_variants_are_registered_on_the_attachment() {
        let fixture = Fixture::new();
        fixture.settings().set_max_widths("1000,400").unwrap();
        let upload = fixture.upload("photo.png", 1600, 1200);
        let id = fixture
            .library
            .insert(NewAttachment {
                file: upload.file.clone(),
                url: upload.url.clone(),
                mime_type: upload.mime_type.clone(),
                metadata: None,
            })
            .unwrap();

        let result = fixture.run_for(&NativeEditor::new(), upload, Some(id));
        assert!(result.is_converted());
        assert_eq!(
            fixture.files(),
            names(&["photo.webp", "photo-400.webp", "photo-150x150.webp"])
        );

        let attachment = fixture.library.get(id).unwrap().unwrap();
        assert_eq!(attachment.file, fixture.dir.child("photo.webp"));
        assert_eq!(attachment.url, "https://example.com/uploads/photo.webp");
        assert_eq!(attachment.mime_type, "image/webp");

        let metadata = attachment.metadata.unwrap();
        assert_eq!((metadata.width, metadata.height), (1000, 750));
        let variant = &metadata.sizes["custom-400"];
        assert_eq!(variant.file, "photo-400.webp");
        assert_eq!((variant.width, variant.height), (400, 300));
        assert_eq!(metadata.sizes["thumbnail"].file, "photo-150x150.webp");

        assert!(fixture.log().iter().all(|l| l.starts_with(&format!("[#{id}]"))));
    }

    #[test]
    fn height_mode_uses_max_heights() {
        let fixture = Fixture::new();
        fixture.settings().set_max_heights("300").unwrap();
        fixture
            .settings()
            .set_from_value(SettingName::ResizeMode, &json!("height"))
            .unwrap();
        let upload = fixture.upload("tall.jpg", 600, 1200);

        let result = fixture.run(&NativeEditor::new(), upload);
        assert!(result.is_converted());
        let converted = image::open(fixture.dir.child("tall.webp")).unwrap();
        assert_eq!(converted.dimensions(), (150, 300));
    }

    #[test]
    fn avif_without_backend_support_passes_through() {
        let fixture = Fixture::new();
        fixture
            .settings()
            .set_flag(SettingName::UseAvif, true)
            .unwrap();
        let upload = fixture.upload("photo.jpg", 400, 300);
        let editor = NativeEditor::with_capabilities(Capabilities {
            webp: true,
            avif: false,
            avif_decode: false,
        });

        let result = fixture.run(&editor, upload.clone());

        assert_eq!(result.descriptor, upload);
        assert_eq!(
            result.outcome,
            Outcome::PassedThrough {
                reason: PassReason::BackendUnavailable
            }
        );
        assert_eq!(fixture.files(), names(&["photo.jpg"]));
        assert!(fixture.log_contains("AVIF not supported"));
    }

    #[test]
    fn failed_second_variant_rolls_back() {
        let fixture = Fixture::new();
        fixture.settings().set_max_widths("800,400").unwrap();
        let upload = fixture.upload("photo.jpg", 1600, 1200);
        let original = fs::read(&upload.file).unwrap();
        let editor = FlakyEditor {
            inner: NativeEditor::new(),
            fail_on: "-400",
        };

        let result = fixture.run(&editor, upload.clone());

        assert_eq!(result.descriptor, upload);
        assert_eq!(
            result.outcome,
            Outcome::RolledBack {
                stage: Stage::PerVariantConversion
            }
        );
        assert_eq!(fixture.files(), names(&["photo.jpg"]));
        assert_eq!(fs::read(&upload.file).unwrap(), original);

        assert!(fixture.log_contains("simulated editor failure"));
        assert!(fixture.log_contains("rolling back"));
        assert!(fixture.log_contains("Original preserved"));
        assert!(!fixture.log_contains("Deleted original"));
    }

    #[test]
    fn failed_thumbnail_rolls_back_every_variant() {
        let fixture = Fixture::new();
        fixture.settings().set_max_widths("800,400,200").unwrap();
        let upload = fixture.upload("photo.jpg", 1600, 1200);
        let editor = FlakyEditor {
            inner: NativeEditor::new(),
            fail_on: "-150x150",
        };

        let result = fixture.run(&editor, upload.clone());

        assert_eq!(
            result.outcome,
            Outcome::RolledBack {
                stage: Stage::ThumbnailGeneration
            }
        );
        assert_eq!(result.descriptor, upload);
        assert_eq!(fixture.files(), names(&["photo.jpg"]));
        assert!(fixture.log_contains("rolling back 3 file(s)"));
    }

    #[test]
    fn truncated_variant_is_removed_on_rollback() {
        let fixture = Fixture::new();
        fixture.settings().set_max_widths("800,400").unwrap();
        let upload = fixture.upload("photo.jpg", 1600, 1200);
        let editor = TruncatingEditor {
            inner: NativeEditor::new(),
            fail_on: "-400",
        };

        let result = fixture.run(&editor, upload.clone());

        assert_eq!(
            result.outcome,
            Outcome::RolledBack {
                stage: Stage::PerVariantConversion
            }
        );
        assert_eq!(fixture.files(), names(&["photo.jpg"]));
        assert!(fixture.log_contains("rolling back 2 file(s)"));
    }

    #[test]
    fn truncated_thumbnail_is_removed_on_rollback() {
        let fixture = Fixture::new();
        fixture.settings().set_max_widths("800").unwrap();
        let upload = fixture.upload("photo.jpg", 1600, 1200);
        let editor = TruncatingEditor {
            inner: NativeEditor::new(),
            fail_on: "150x150",
        };

        let result = fixture.run(&editor, upload);

        assert_eq!(
            result.outcome,
            Outcome::RolledBack {
                stage: Stage::ThumbnailGeneration
            }
        );
        assert_eq!(fixture.files(), names(&["photo.jpg"]));
    }

    #[test]
    fn avif_source_without_decoder_passes_through() {
        let fixture = Fixture::new();
        let upload = fixture.avif_upload("photo.avif", 400, 300);
        let editor = NativeEditor::with_capabilities(Capabilities {
            webp: true,
            avif: true,
            avif_decode: false,
        });

        let result = fixture.run(&editor, upload.clone());

        assert_eq!(result.descriptor, upload);
        assert_eq!(
            result.outcome,
            Outcome::PassedThrough {
                reason: PassReason::BackendUnavailable
            }
        );
        assert_eq!(fixture.files(), names(&["photo.avif"]));
        assert!(fixture.log_contains("Reading .avif sources not supported"));
    }

    #[test]
    fn avif_source_is_never_rolled_back() {
        let fixture = Fixture::new();
        let upload = fixture.avif_upload("photo.avif", 400, 300);
        let editor = NativeEditor::new();

        let result = fixture.run(&editor, upload);

        if editor.can_decode("avif") {
            assert_matches!(result.outcome, Outcome::Converted { .. });
            assert!(fixture.files().contains("photo.webp"));
        } else {
            assert_eq!(
                result.outcome,
                Outcome::PassedThrough {
                    reason: PassReason::BackendUnavailable
                }
            );
            assert_eq!(fixture.files(), names(&["photo.avif"]));
        }
    }

    #[test]
    fn webp_upload_is_replaced_in_place() {
        let fixture = Fixture::new();
        fixture.settings().set_max_widths("800,400").unwrap();
        let path = fixture.dir.child("photo.webp");
        let mut encoded = Vec::new();
        pixrefiner_convert::write_format::write_image(
            &pixrefiner_test::test_image(1600, 1200),
            image::ImageFormat::WebP,
            90,
            &mut encoded,
        )
        .unwrap();
        fs::write(&path, encoded).unwrap();

        let result = fixture.run(&NativeEditor::new(), fixture.descriptor("photo.webp"));

        assert_eq!(
            result.outcome,
            Outcome::Converted {
                variants: 2,
                original_deleted: false
            }
        );
        assert_eq!(result.descriptor.file, path);
        assert_eq!(
            fixture.files(),
            names(&["photo.webp", "photo-400.webp", "photo-150x150.webp"])
        );
        assert_eq!(image::open(&path).unwrap().dimensions(), (800, 600));
    }

    #[test]
    fn webp_upload_survives_rollback() {
        let fixture = Fixture::new();
        fixture.settings().set_max_widths("800").unwrap();
        let path = fixture.dir.child("photo.webp");
        let mut encoded = Vec::new();
        pixrefiner_convert::write_format::write_image(
            &pixrefiner_test::test_image(1600, 1200),
            image::ImageFormat::WebP,
            90,
            &mut encoded,
        )
        .unwrap();
        fs::write(&path, &encoded).unwrap();
        let editor = FlakyEditor {
            inner: NativeEditor::new(),
            fail_on: "-150x150",
        };

        let result = fixture.run(&editor, fixture.descriptor("photo.webp"));

        assert_matches!(result.outcome, Outcome::RolledBack { .. });
        assert_eq!(fixture.files(), names(&["photo.webp"]));
        assert_eq!(fs::read(&path).unwrap(), encoded);
    }

    #[test]
    fn preserve_originals_keeps_the_upload() {
        let fixture = Fixture::new();
        fixture.settings().set_max_widths("800").unwrap();
        fixture
            .settings()
            .set_flag(SettingName::PreserveOriginals, true)
            .unwrap();
        let upload = fixture.upload("photo.jpg", 1600, 1200);

        let result = fixture.run(&NativeEditor::new(), upload);

        assert_eq!(
            result.outcome,
            Outcome::Converted {
                variants: 1,
                original_deleted: false
            }
        );
        assert_eq!(
            fixture.files(),
            names(&["photo.jpg", "photo.webp", "photo-150x150.webp"])
        );
        assert!(fixture.log_contains("Preserved original"));
    }

    #[test]
    fn min_size_boundary() {
        let fixture = Fixture::new();
        fixture.settings().set_max_widths("32").unwrap();
        fixture.settings().set_min_size_kb(100).unwrap();

        let exact = fixture.upload("exact.jpg", 64, 64);
        pixrefiner_test::pad_file(&exact.file, 100 * 1024);
        let small = fixture.upload("small.jpg", 64, 64);
        pixrefiner_test::pad_file(&small.file, 100 * 1024 - 1);

        let result = fixture.run(&NativeEditor::new(), exact);
        assert!(result.is_converted());

        let result = fixture.run(&NativeEditor::new(), small.clone());
        assert_eq!(result.descriptor, small);
        assert_eq!(
            result.outcome,
            Outcome::PassedThrough {
                reason: PassReason::BelowMinimumSize
            }
        );
        assert!(small.file.exists());
        assert!(!fixture.dir.child("small.webp").exists());
        assert!(fixture.log_contains("Skipped"));
    }

    #[test]
    fn disabled_auto_conversion_is_silent() {
        let fixture = Fixture::new();
        fixture
            .settings()
            .set_flag(SettingName::DisableAutoConversion, true)
            .unwrap();
        let upload = fixture.upload("photo.jpg", 100, 100);

        let result = fixture.run(&NativeEditor::new(), upload.clone());

        assert_eq!(result.descriptor, upload);
        assert_eq!(
            result.outcome,
            Outcome::PassedThrough {
                reason: PassReason::AutoConversionDisabled
            }
        );
        assert!(fixture.log().is_empty());
        assert_eq!(fixture.files(), names(&["photo.jpg"]));
    }

    #[test]
    fn unsupported_extensions_pass_through() {
        let fixture = Fixture::new();
        let path = fixture.dir.child("animation.gif");
        fs::write(&path, b"GIF89a").unwrap();

        let result = fixture.run(&NativeEditor::new(), fixture.descriptor("animation.gif"));
        assert_eq!(
            result.outcome,
            Outcome::PassedThrough {
                reason: PassReason::UnsupportedExtension
            }
        );
        assert!(fixture.log().is_empty());
    }

    #[test]
    fn excluded_attachments_pass_through() {
        let fixture = Fixture::new();
        fixture.settings().exclude(AttachmentId(9)).unwrap();
        let upload = fixture.upload("photo.jpg", 100, 100);

        let result = fixture.run_for(&NativeEditor::new(), upload, Some(AttachmentId(9)));
        assert_eq!(
            result.outcome,
            Outcome::PassedThrough {
                reason: PassReason::Excluded
            }
        );
        assert_eq!(fixture.files(), names(&["photo.jpg"]));
    }

    #[test]
    fn missing_source_passes_through() {
        let fixture = Fixture::new();
        let result = fixture.run(&NativeEditor::new(), fixture.descriptor("gone.jpg"));
        assert_eq!(
            result.outcome,
            Outcome::PassedThrough {
                reason: PassReason::MissingFile
            }
        );
        assert!(fixture.log_contains("cannot read"));
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_directory_passes_through() {
        use std::os::unix::fs::PermissionsExt;

        let fixture = Fixture::new();
        let locked = fixture.dir.child("locked");
        fs::create_dir(&locked).unwrap();
        let source = locked.join("photo.jpg");
        pixrefiner_test::write_image(&source, 100, 100);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let upload = UploadDescriptor {
            file: source.clone(),
            url: "https://example.com/uploads/locked/photo.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
        };
        let result = fixture.run(&NativeEditor::new(), upload);

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(
            result.outcome,
            Outcome::PassedThrough {
                reason: PassReason::DirectoryNotWritable
            }
        );
        assert!(fixture.log_contains("not writable"));
    }

    #[test]
    fn log_is_appended_per_upload() {
        let fixture = Fixture::new();
        fixture.settings().set_max_widths("50").unwrap();
        fixture
            .options
            .set("webp_conversion_log", json!(["earlier entry"]))
            .unwrap();

        let upload = fixture.upload("photo.jpg", 100, 100);
        fixture.run(&NativeEditor::new(), upload);

        let log = fixture.log();
        assert_eq!(log[0], "earlier entry");
        assert!(log.len() > 1);
    }

    #[test]
    fn staging_path_keeps_extension() {
        assert_eq!(
            staging_path(Path::new("/uploads/photo.webp")),
            PathBuf::from("/uploads/photo.refining.webp")
        );
    }
}
