use std::path::PathBuf;

use pixrefiner_convert::{is_convertible_extension, TargetFormat};
use pixrefiner_store::{Attachment, AttachmentId, ConversionLog, ConversionSettings, Settings};
use serde::Serialize;
use tracing::{event, instrument, Level};

use super::{Outcome, Refiner, Trigger, UploadDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub id: AttachmentId,
    pub file: PathBuf,
    pub outcome: Outcome,
}

/// The result of converting one batch of existing attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Candidates left after this batch.
    pub remaining: usize,
    /// Pass this as the offset of the next batch. Converted attachments drop out of the
    /// candidate list, so only the ones left behind move the offset forward.
    pub next_offset: usize,
    pub complete: bool,
    pub items: Vec<BatchItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionStatus {
    pub format: TargetFormat,
    pub total_images: usize,
    pub converted: usize,
    pub excluded: usize,
    pub remaining: usize,
}

fn extension_of(attachment: &Attachment) -> String {
    attachment
        .file
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// True if the attachment is an image this pipeline could still convert.
fn is_candidate(attachment: &Attachment, settings: &ConversionSettings) -> bool {
    attachment.is_image()
        && attachment.mime_type != settings.target_format().mime_type()
        && !settings.is_excluded(attachment.id)
        && is_convertible_extension(&extension_of(attachment))
}

impl<'a> Refiner<'a> {
    /// Convert the next `batch_size` attachments that are not yet in the target format,
    /// starting `offset` entries into the candidate list. The auto-conversion switch does not
    /// apply to explicit batches.
    #[instrument(skip(self))]
    pub fn convert_batch(&self, offset: usize) -> pixrefiner_store::Result<BatchReport> {
        let settings = Settings::new(self.options).load();
        let candidates = self
            .library
            .list()?
            .into_iter()
            .filter(|a| is_candidate(a, &settings))
            .collect::<Vec<_>>();

        let start = offset.min(candidates.len());
        let batch = candidates
            .into_iter()
            .skip(start)
            .take(settings.batch_size as usize)
            .collect::<Vec<_>>();
        let total = start + batch.len();

        let mut report = BatchReport {
            converted: 0,
            skipped: 0,
            failed: 0,
            remaining: 0,
            next_offset: start,
            complete: false,
            items: Vec::with_capacity(batch.len()),
        };

        for attachment in &batch {
            let upload = UploadDescriptor {
                file: attachment.file.clone(),
                url: attachment.url.clone(),
                mime_type: attachment.mime_type.clone(),
            };

            let result = self.process(upload, Some(attachment.id), Trigger::Batch);
            match result.outcome {
                Outcome::Converted { .. } => report.converted += 1,
                Outcome::PassedThrough { .. } => report.skipped += 1,
                Outcome::RolledBack { .. } => report.failed += 1,
            }

            report.items.push(BatchItem {
                id: attachment.id,
                file: attachment.file.clone(),
                outcome: result.outcome,
            });
        }

        // Everything past this batch is still waiting.
        report.remaining = self.candidate_count(&settings)?.saturating_sub(
            start + report.skipped + report.failed,
        );
        report.next_offset = start + report.skipped + report.failed;
        report.complete = report.remaining == 0;

        event!(
            Level::INFO,
            converted = report.converted,
            skipped = report.skipped,
            failed = report.failed,
            remaining = report.remaining,
            total,
            "Finished batch"
        );

        let summary = format!(
            "Batch: {} converted, {} skipped, {} failed, {} remaining",
            report.converted, report.skipped, report.failed, report.remaining
        );
        if let Err(e) = ConversionLog::new(self.options).append([summary]) {
            event!(Level::ERROR, error = %e, "Failed to write conversion log");
        }

        Ok(report)
    }

    fn candidate_count(&self, settings: &ConversionSettings) -> pixrefiner_store::Result<usize> {
        Ok(self
            .library
            .list()?
            .iter()
            .filter(|a| is_candidate(a, settings))
            .count())
    }

    /// How much of the media library is already in the target format.
    pub fn status(&self) -> pixrefiner_store::Result<ConversionStatus> {
        let settings = Settings::new(self.options).load();
        let format = settings.target_format();

        let mut status = ConversionStatus {
            format,
            total_images: 0,
            converted: 0,
            excluded: 0,
            remaining: 0,
        };

        for attachment in self.library.list()?.iter().filter(|a| a.is_image()) {
            status.total_images += 1;
            if attachment.mime_type == format.mime_type() {
                status.converted += 1;
            } else if settings.is_excluded(attachment.id) {
                status.excluded += 1;
            } else if is_candidate(attachment, &settings) {
                status.remaining += 1;
            }
        }

        Ok(status)
    }
}
