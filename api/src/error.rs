use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use pixrefiner_http_errors::ErrorResponseData;

use crate::auth::Capability;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing capability {0}")]
    MissingCapability(Capability),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Invalid or missing nonce for {0}")]
    InvalidNonce(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] pixrefiner_storage::Error),

    #[error(transparent)]
    Store(#[from] pixrefiner_store::Error),

    #[error("Unknown {0}")]
    ObjectNotFound(&'static str),

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    AxumError(#[from] axum::Error),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("request body is empty")]
    EmptyBody,

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Generic(#[from] anyhow::Error),
}

impl Error {
    fn error_kind(&self) -> &'static str {
        match self {
            Error::MissingCapability(_) => "missing_capability",
            Error::Unauthenticated => "authn",
            Error::InvalidNonce(_) => "invalid_nonce",
            Error::StorageError(pixrefiner_storage::Error::InvalidFileName(_)) => "bad_request",
            Error::StorageError(_) => "storage",
            Error::Store(pixrefiner_store::Error::UnknownSetting(_)) => "unknown_setting",
            Error::Store(pixrefiner_store::Error::InvalidValue { .. }) => "invalid_value",
            Error::Store(pixrefiner_store::Error::AttachmentNotFound(_)) => "not_found",
            Error::Store(_) => "store",
            Error::ObjectNotFound(_) => "not_found",
            Error::IoError(_) => "internal_server_error",
            Error::AxumError(_) => "bad_request",
            Error::UnsupportedFileType(_) => "unsupported_file_type",
            Error::EmptyBody => "bad_request",
            Error::TaskFailed(_) => "internal_server_error",
            Error::Generic(_) => "internal_server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingCapability(_) => StatusCode::FORBIDDEN,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::InvalidNonce(_) => StatusCode::FORBIDDEN,
            Error::StorageError(pixrefiner_storage::Error::InvalidFileName(_)) => {
                StatusCode::BAD_REQUEST
            }
            Error::Store(pixrefiner_store::Error::UnknownSetting(_))
            | Error::Store(pixrefiner_store::Error::InvalidValue { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Error::Store(pixrefiner_store::Error::AttachmentNotFound(_)) => StatusCode::NOT_FOUND,
            Error::ObjectNotFound(_) => StatusCode::NOT_FOUND,
            Error::AxumError(_) => StatusCode::BAD_REQUEST,
            Error::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::EmptyBody => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn response_tuple(&self) -> (StatusCode, ErrorResponseData) {
        (
            self.status_code(),
            ErrorResponseData::new(self.error_kind(), self.to_string()),
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (code, json) = self.response_tuple();
        (code, json).into_response()
    }
}
