use axum::Router;

mod admin;
mod health;
mod media;
mod nonce;
mod settings;

/// Actions that need a nonce, as passed to `GET /api/nonce/{action}`.
pub const NONCE_ACTIONS: [&str; 9] = [
    admin::CONVERT_BATCH,
    admin::READ_LOG,
    admin::CLEAR_LOG,
    admin::UPDATE_SETTING,
    admin::EXCLUDE_IMAGE,
    admin::INCLUDE_IMAGE,
    admin::RESET_DEFAULTS,
    admin::VIEW_STATUS,
    settings::SAVE_SETTINGS,
];

pub fn configure_routes(router: Router, max_upload_bytes: usize) -> Router {
    let api = Router::new()
        .merge(health::configure())
        .merge(nonce::configure())
        .merge(settings::configure())
        .merge(media::configure(max_upload_bytes))
        .nest("/admin", admin::configure());

    router.nest("/api", api)
}
