use axum::{http::StatusCode, response::IntoResponse, routing::get, Extension, Json, Router};
use pixrefiner_convert::TargetFormat;
use serde::Serialize;

use crate::shared_state::State;

#[derive(Serialize)]
struct HealthResponse {
    /// If new files can be written to the uploads directory
    uploads_writable: bool,
    webp: bool,
    avif: bool,
    /// If all the other fields indicate healthy status.
    healthy: bool,
}

async fn health(Extension(ref state): Extension<State>) -> impl IntoResponse {
    let uploads_writable = pixrefiner_storage::is_writable(state.uploads.root());
    let webp = state.editor.supports(TargetFormat::Webp);
    let avif = state.editor.supports(TargetFormat::Avif);

    (
        StatusCode::OK,
        Json(HealthResponse {
            healthy: uploads_writable && state.editor.is_available(),
            uploads_writable,
            webp,
            avif,
        }),
    )
}

pub fn configure() -> Router {
    Router::new().route("/health", get(health))
}
