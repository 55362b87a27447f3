use std::{
    collections::BTreeMap,
    fmt,
    path::PathBuf,
    str::FromStr,
    sync::{Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use tracing::{event, instrument, Level};

use crate::{json_file::JsonFile, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(pub u64);

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AttachmentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(AttachmentId)
    }
}

/// One named derivative registered on an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeEntry {
    /// File name, relative to the attachment's directory.
    pub file: String,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub width: u32,
    pub height: u32,
    /// File name of the main file, relative to the attachment's directory.
    pub file: String,
    pub filesize: u64,
    #[serde(default)]
    pub sizes: BTreeMap<String, SizeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub file: PathBuf,
    pub url: String,
    pub mime_type: String,
    pub metadata: Option<AttachmentMetadata>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub file: PathBuf,
    pub url: String,
    pub mime_type: String,
    pub metadata: Option<AttachmentMetadata>,
}

/// The host's record of uploaded media.
pub trait AttachmentStore: Send + Sync {
    fn get(&self, id: AttachmentId) -> Result<Option<Attachment>>;
    /// All attachments, ordered by id.
    fn list(&self) -> Result<Vec<Attachment>>;
    fn insert(&self, attachment: NewAttachment) -> Result<AttachmentId>;
    fn update_metadata(&self, id: AttachmentId, metadata: &AttachmentMetadata) -> Result<()>;
    fn set_file(&self, id: AttachmentId, file: PathBuf, url: String) -> Result<()>;
    fn set_mime_type(&self, id: AttachmentId, mime_type: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryData {
    next_id: u64,
    attachments: BTreeMap<AttachmentId, Attachment>,
}

/// Attachment store kept in memory and optionally written through to a JSON file.
#[derive(Debug)]
pub struct MediaLibrary {
    file: Option<JsonFile>,
    data: Mutex<LibraryData>,
}

impl MediaLibrary {
    pub fn in_memory() -> Self {
        MediaLibrary {
            file: None,
            data: Mutex::new(LibraryData::default()),
        }
    }

    #[instrument]
    pub fn open(path: PathBuf) -> Result<Self> {
        let file = JsonFile::new(path);
        let data: LibraryData = file.load()?;
        event!(
            Level::DEBUG,
            count = data.attachments.len(),
            "Loaded media library"
        );

        Ok(MediaLibrary {
            file: Some(file),
            data: Mutex::new(data),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LibraryData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, data: &LibraryData) -> Result<()> {
        match &self.file {
            Some(file) => file.save(data),
            None => Ok(()),
        }
    }

    fn modify(&self, id: AttachmentId, f: impl FnOnce(&mut Attachment)) -> Result<()> {
        let mut data = self.lock();
        let attachment = data
            .attachments
            .get_mut(&id)
            .ok_or(Error::AttachmentNotFound(id))?;
        f(attachment);
        self.persist(&data)
    }
}

impl AttachmentStore for MediaLibrary {
    fn get(&self, id: AttachmentId) -> Result<Option<Attachment>> {
        Ok(self.lock().attachments.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<Attachment>> {
        Ok(self.lock().attachments.values().cloned().collect())
    }

    fn insert(&self, attachment: NewAttachment) -> Result<AttachmentId> {
        let mut data = self.lock();
        data.next_id += 1;
        let id = AttachmentId(data.next_id);
        data.attachments.insert(
            id,
            Attachment {
                id,
                file: attachment.file,
                url: attachment.url,
                mime_type: attachment.mime_type,
                metadata: attachment.metadata,
            },
        );
        self.persist(&data)?;
        Ok(id)
    }

    fn update_metadata(&self, id: AttachmentId, metadata: &AttachmentMetadata) -> Result<()> {
        self.modify(id, |a| a.metadata = Some(metadata.clone()))
    }

    fn set_file(&self, id: AttachmentId, file: PathBuf, url: String) -> Result<()> {
        self.modify(id, |a| {
            a.file = file;
            a.url = url;
        })
    }

    fn set_mime_type(&self, id: AttachmentId, mime_type: &str) -> Result<()> {
        self.modify(id, |a| a.mime_type = mime_type.to_string())
    }
}
