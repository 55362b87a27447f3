use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not delete {path:?} after {attempts} attempts: {source}")]
    DeleteFailed {
        path: PathBuf,
        attempts: u32,
        source: std::io::Error,
    },

    #[error("Invalid file name {0:?}")]
    InvalidFileName(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
