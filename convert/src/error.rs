use std::path::PathBuf;

use thiserror::Error;

use crate::{EncodeError, TargetFormat};

#[derive(Debug, Error)]
pub enum Error {
    #[error("No image processing backend is available")]
    NoBackend,

    #[error("{0} not supported by the image backend")]
    FormatNotSupported(TargetFormat),

    #[error("Reading .{0} sources not supported by the image backend")]
    DecodeNotSupported(String),

    #[error("Reading {path:?}: {error}")]
    Read { path: PathBuf, error: eyre::Report },

    #[error("Saving {path:?}: {error}")]
    Save { path: PathBuf, error: EncodeError },

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl Error {
    pub fn read_error(path: impl Into<PathBuf>, e: impl Into<eyre::Report>) -> Self {
        Self::Read {
            path: path.into(),
            error: e.into(),
        }
    }

    pub fn save_error(path: impl Into<PathBuf>, e: impl Into<EncodeError>) -> Self {
        Self::Save {
            path: path.into(),
            error: e.into(),
        }
    }

    /// Capability errors mean the backend can't do the job at all, as opposed to a failure
    /// on this particular file.
    pub fn is_capability_error(&self) -> bool {
        matches!(
            self,
            Self::NoBackend | Self::FormatNotSupported(_) | Self::DecodeNotSupported(_)
        )
    }
}
