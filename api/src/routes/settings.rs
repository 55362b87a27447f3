use axum::{response::IntoResponse, routing::get, Extension, Form, Router};
use pixrefiner_http_errors::Envelope;
use pixrefiner_store::{OptionStore, Options, SettingName, Settings};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::{Capability, Nonce, UserInfo},
    shared_state::State,
    Error,
};

pub const SAVE_SETTINGS: &str = "save-settings";

/// The settings form as an HTML form would post it. Checkboxes that aren't ticked are left out
/// entirely, so a missing flag means false.
#[derive(Debug, Default, Deserialize)]
struct SettingsForm {
    max_widths: Option<String>,
    max_heights: Option<String>,
    resize_mode: Option<String>,
    quality: Option<String>,
    batch_size: Option<String>,
    min_size_kb: Option<String>,
    preserve_originals: Option<String>,
    disable_auto_conversion: Option<String>,
    use_avif: Option<String>,
    #[serde(rename = "_nonce")]
    nonce: Option<String>,
}

impl SettingsForm {
    fn fields(&self) -> Vec<(SettingName, Value)> {
        let text = [
            (SettingName::MaxWidths, &self.max_widths),
            (SettingName::MaxHeights, &self.max_heights),
            (SettingName::ResizeMode, &self.resize_mode),
            (SettingName::Quality, &self.quality),
            (SettingName::BatchSize, &self.batch_size),
            (SettingName::MinSizeKb, &self.min_size_kb),
        ];
        let flags = [
            (SettingName::PreserveOriginals, &self.preserve_originals),
            (SettingName::DisableAutoConversion, &self.disable_auto_conversion),
            (SettingName::UseAvif, &self.use_avif),
        ];

        text.into_iter()
            .filter_map(|(name, value)| Some((name, Value::String(value.clone()?))))
            .chain(flags.into_iter().map(|(name, value)| {
                (name, Value::String(value.clone().unwrap_or_default()))
            }))
            .collect()
    }
}

fn apply(store: &dyn OptionStore, fields: &[(SettingName, Value)]) -> Result<(), Error> {
    let settings = Settings::new(store);
    for (name, value) in fields {
        settings.set_from_value(*name, value)?;
    }
    Ok(())
}

async fn get_settings(
    Extension(ref state): Extension<State>,
    user: UserInfo,
) -> Result<impl IntoResponse, Error> {
    user.require(Capability::ManageOptions)?;
    let settings = Settings::new(state.options.as_ref()).load();
    Ok(Envelope::success(json!({
        "settings": settings,
        "nonce": state.auth.nonce(SAVE_SETTINGS),
    })))
}

async fn save_settings(
    Extension(ref state): Extension<State>,
    user: UserInfo,
    Nonce(header_nonce): Nonce,
    Form(form): Form<SettingsForm>,
) -> Result<impl IntoResponse, Error> {
    let nonce = header_nonce.or_else(|| form.nonce.clone());
    state.auth.authorize(
        &user,
        Capability::ManageOptions,
        SAVE_SETTINGS,
        nonce.as_deref(),
    )?;

    // Validate the whole form before touching the real store, so a bad field saves nothing.
    let fields = form.fields();
    apply(&Options::in_memory(), &fields)?;
    apply(state.options.as_ref(), &fields)?;

    let settings = Settings::new(state.options.as_ref()).load();
    Ok(Envelope::success(json!({ "settings": settings })))
}

pub fn configure() -> Router {
    Router::new().route("/settings", get(get_settings).post(save_settings))
}
