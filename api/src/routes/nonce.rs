use axum::{extract::Path, response::IntoResponse, routing::get, Extension, Router};
use pixrefiner_http_errors::Envelope;
use serde_json::json;

use super::NONCE_ACTIONS;
use crate::{
    auth::{Capability, UserInfo},
    shared_state::State,
    Error,
};

async fn get_nonce(
    Extension(ref state): Extension<State>,
    user: UserInfo,
    Path(action): Path<String>,
) -> Result<impl IntoResponse, Error> {
    user.require(Capability::ManageOptions)?;
    if !NONCE_ACTIONS.contains(&action.as_str()) {
        return Err(Error::ObjectNotFound("action"));
    }

    let nonce = state.auth.nonce(&action);
    Ok(Envelope::success(json!({ "action": action, "nonce": nonce })))
}

pub fn configure() -> Router {
    Router::new().route("/nonce/:action", get(get_nonce))
}
