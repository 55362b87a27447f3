use std::sync::Arc;

use pixrefiner_convert::ImageEditor;
use pixrefiner_storage::{RetryPolicy, UploadsDir};
use pixrefiner_store::{AttachmentStore, OptionStore};

use crate::{auth::AuthConfig, refiner::Refiner};

pub struct InnerState {
    pub production: bool,
    pub options: Arc<dyn OptionStore>,
    pub library: Arc<dyn AttachmentStore>,
    pub editor: Arc<dyn ImageEditor>,
    pub uploads: UploadsDir,
    pub auth: AuthConfig,
    pub delete_policy: RetryPolicy,
}

impl InnerState {
    pub fn refiner(&self) -> Refiner<'_> {
        Refiner::new(
            self.options.as_ref(),
            self.library.as_ref(),
            self.editor.as_ref(),
        )
        .with_delete_policy(self.delete_policy)
    }
}

pub type State = Arc<InnerState>;
