//! The upload-time conversion pipeline.
//!
//! An upload runs through `Start -> PerVariantConversion -> ThumbnailGeneration ->
//! MetadataUpdate -> OriginalCleanup`. Any failure before metadata is written removes every
//! derivative made so far and hands back the upload untouched.

mod batch;
mod metadata;
mod thumbnail;
mod upload;

pub use batch::*;
pub use upload::*;

use pixrefiner_convert::ImageEditor;
use pixrefiner_storage::RetryPolicy;
use pixrefiner_store::{AttachmentId, AttachmentStore, OptionStore};

/// Everything the pipeline needs from its host.
#[derive(Clone, Copy)]
pub struct Refiner<'a> {
    pub options: &'a dyn OptionStore,
    pub library: &'a dyn AttachmentStore,
    pub editor: &'a dyn ImageEditor,
    /// Used when deleting a replaced original.
    pub delete_policy: RetryPolicy,
}

impl<'a> Refiner<'a> {
    pub fn new(
        options: &'a dyn OptionStore,
        library: &'a dyn AttachmentStore,
        editor: &'a dyn ImageEditor,
    ) -> Self {
        Refiner {
            options,
            library,
            editor,
            delete_policy: RetryPolicy::default(),
        }
    }

    pub fn with_delete_policy(mut self, policy: RetryPolicy) -> Self {
        self.delete_policy = policy;
        self
    }
}

fn log_prefix(attachment_id: Option<AttachmentId>) -> String {
    match attachment_id {
        Some(id) => format!("[#{id}] "),
        None => String::new(),
    }
}
