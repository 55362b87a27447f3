use axum::{
    extract::{Path, Query},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use pixrefiner_http_errors::Envelope;
use pixrefiner_store::{AttachmentId, ConversionLog, SettingName, Settings};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{event, Level};

use crate::{
    auth::{Capability, Nonce, UserInfo},
    shared_state::State,
    Error,
};

pub const CONVERT_BATCH: &str = "convert-batch";
pub const READ_LOG: &str = "read-log";
pub const CLEAR_LOG: &str = "clear-log";
pub const UPDATE_SETTING: &str = "update-setting";
pub const EXCLUDE_IMAGE: &str = "exclude-image";
pub const INCLUDE_IMAGE: &str = "include-image";
pub const RESET_DEFAULTS: &str = "reset-defaults";
pub const VIEW_STATUS: &str = "view-status";

#[derive(Debug, Default, Deserialize)]
struct BatchQuery {
    #[serde(default)]
    offset: usize,
}

async fn convert_batch(
    Extension(ref state): Extension<State>,
    user: UserInfo,
    Nonce(nonce): Nonce,
    Query(query): Query<BatchQuery>,
) -> Result<impl IntoResponse, Error> {
    state.auth.authorize(
        &user,
        Capability::ManageOptions,
        CONVERT_BATCH,
        nonce.as_deref(),
    )?;

    let state = state.clone();
    let report =
        tokio::task::spawn_blocking(move || state.refiner().convert_batch(query.offset)).await??;
    Ok(Envelope::success(report))
}

async fn get_log(
    Extension(ref state): Extension<State>,
    user: UserInfo,
    Nonce(nonce): Nonce,
) -> Result<impl IntoResponse, Error> {
    state
        .auth
        .authorize(&user, Capability::ManageOptions, READ_LOG, nonce.as_deref())?;
    let entries = ConversionLog::new(state.options.as_ref()).entries();
    Ok(Envelope::success(json!({ "entries": entries })))
}

async fn clear_log(
    Extension(ref state): Extension<State>,
    user: UserInfo,
    Nonce(nonce): Nonce,
) -> Result<impl IntoResponse, Error> {
    state
        .auth
        .authorize(&user, Capability::ManageOptions, CLEAR_LOG, nonce.as_deref())?;
    ConversionLog::new(state.options.as_ref()).clear()?;
    Ok(Envelope::success(json!({ "message": "Log cleared" })))
}

#[derive(Debug, Deserialize)]
struct SettingInput {
    value: Value,
}

async fn update_setting(
    Extension(ref state): Extension<State>,
    user: UserInfo,
    Nonce(nonce): Nonce,
    Path(name): Path<String>,
    Json(input): Json<SettingInput>,
) -> Result<impl IntoResponse, Error> {
    state.auth.authorize(
        &user,
        Capability::ManageOptions,
        UPDATE_SETTING,
        nonce.as_deref(),
    )?;

    let name = name.parse::<SettingName>()?;
    let settings = Settings::new(state.options.as_ref());
    settings.set_from_value(name, &input.value)?;

    Ok(Envelope::success(json!({
        "name": name.as_str(),
        "settings": settings.load(),
    })))
}

async fn exclude_image(
    Extension(ref state): Extension<State>,
    user: UserInfo,
    Nonce(nonce): Nonce,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, Error> {
    state.auth.authorize(
        &user,
        Capability::ManageOptions,
        EXCLUDE_IMAGE,
        nonce.as_deref(),
    )?;

    let id = AttachmentId(id);
    state
        .library
        .get(id)?
        .ok_or(pixrefiner_store::Error::AttachmentNotFound(id))?;

    let changed = Settings::new(state.options.as_ref()).exclude(id)?;
    event!(Level::INFO, %id, changed, "Excluded attachment from conversion");
    Ok(Envelope::success(json!({
        "id": id,
        "excluded": true,
        "changed": changed,
    })))
}

async fn include_image(
    Extension(ref state): Extension<State>,
    user: UserInfo,
    Nonce(nonce): Nonce,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, Error> {
    state.auth.authorize(
        &user,
        Capability::ManageOptions,
        INCLUDE_IMAGE,
        nonce.as_deref(),
    )?;

    let id = AttachmentId(id);
    let changed = Settings::new(state.options.as_ref()).include(id)?;
    event!(Level::INFO, %id, changed, "Removed attachment from the exclusion list");
    Ok(Envelope::success(json!({
        "id": id,
        "excluded": false,
        "changed": changed,
    })))
}

async fn reset_defaults(
    Extension(ref state): Extension<State>,
    user: UserInfo,
    Nonce(nonce): Nonce,
) -> Result<impl IntoResponse, Error> {
    state.auth.authorize(
        &user,
        Capability::ManageOptions,
        RESET_DEFAULTS,
        nonce.as_deref(),
    )?;

    let settings = Settings::new(state.options.as_ref());
    settings.reset_defaults()?;
    Ok(Envelope::success(json!({ "settings": settings.load() })))
}

async fn status(
    Extension(ref state): Extension<State>,
    user: UserInfo,
    Nonce(nonce): Nonce,
) -> Result<impl IntoResponse, Error> {
    state
        .auth
        .authorize(&user, Capability::ManageOptions, VIEW_STATUS, nonce.as_deref())?;
    let state = state.clone();
    let status = tokio::task::spawn_blocking(move || state.refiner().status()).await??;
    Ok(Envelope::success(status))
}

pub fn configure() -> Router {
    Router::new()
        .route("/convert-batch", post(convert_batch))
        .route("/log", get(get_log).delete(clear_log))
        .route("/settings/:name", post(update_setting))
        .route("/exclude/:id", post(exclude_image).delete(include_image))
        .route("/reset-defaults", post(reset_defaults))
        .route("/status", get(status))
}
