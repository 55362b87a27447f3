use std::path::Path;

use axum::{
    extract::{DefaultBodyLimit, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Extension, Router,
};
use bytes::Bytes;
use pixrefiner_convert::{image_dimensions, mime_for_extension, TargetFormat};
use pixrefiner_http_errors::Envelope;
use pixrefiner_store::{AttachmentId, AttachmentMetadata, NewAttachment};
use serde::{Deserialize, Serialize};
use tracing::{event, instrument, Level};

use pixrefiner_storage as storage;

use crate::{
    auth::{Capability, UserInfo},
    refiner::{Outcome, UploadDescriptor},
    shared_state::{InnerState, State},
    Error,
};

#[derive(Debug, Deserialize)]
struct UploadQuery {
    filename: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    id: AttachmentId,
    #[serde(flatten)]
    upload: UploadDescriptor,
    outcome: Outcome,
}

/// Metadata for an upload that was kept as it came in.
fn plain_metadata(path: &Path) -> Option<AttachmentMetadata> {
    let (width, height) = image_dimensions(path).ok()?;
    Some(AttachmentMetadata {
        width,
        height,
        file: path.file_name()?.to_string_lossy().into_owned(),
        filesize: std::fs::metadata(path).ok()?.len(),
        sizes: Default::default(),
    })
}

#[instrument(skip(state, body), fields(len = body.len()))]
fn store_upload(
    state: &InnerState,
    file_name: &str,
    mime_type: &str,
    body: &[u8],
) -> Result<UploadResponse, Error> {
    state.uploads.ensure_exists()?;

    let derived_extensions = [TargetFormat::Webp.extension(), TargetFormat::Avif.extension()];
    let path = state.uploads.unique_path(file_name, &derived_extensions);
    std::fs::write(&path, body).map_err(|e| storage::Error::io(&path, e))?;

    let url = state
        .uploads
        .url_for(&path)
        .ok_or(Error::ObjectNotFound("upload url"))?;
    let upload = UploadDescriptor {
        file: path,
        url,
        mime_type: mime_type.to_string(),
    };

    let result = state.refiner().handle_upload(upload, None);
    let metadata = result
        .metadata
        .clone()
        .or_else(|| plain_metadata(&result.descriptor.file));

    let id = state.library.insert(NewAttachment {
        file: result.descriptor.file.clone(),
        url: result.descriptor.url.clone(),
        mime_type: result.descriptor.mime_type.clone(),
        metadata,
    })?;

    event!(Level::INFO, %id, file = %result.descriptor.file.display(), "Stored upload");
    Ok(UploadResponse {
        id,
        upload: result.descriptor,
        outcome: result.outcome,
    })
}

async fn upload_media(
    Extension(ref state): Extension<State>,
    user: UserInfo,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    user.require(Capability::UploadFiles)?;
    if body.is_empty() {
        return Err(Error::EmptyBody);
    }

    let file_name = storage::sanitize_file_name(&query.filename)?;
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let mime_type =
        mime_for_extension(&extension).ok_or_else(|| Error::UnsupportedFileType(file_name.clone()))?;

    let state = state.clone();
    let response =
        tokio::task::spawn_blocking(move || store_upload(&state, &file_name, mime_type, &body))
            .await??;

    Ok((StatusCode::CREATED, Envelope::success(response)))
}

pub fn configure(max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/media", post(upload_media))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
