use axum::{
    body::Body,
    http::{header, StatusCode},
};
use pixrefiner_api::auth::NONCE_HEADER;
use pixrefiner_store::Settings;

use crate::common::{request, TestApp, ADMIN_KEY, UPLOAD_KEY};

async fn post_form(app: &TestApp, form: &str) -> (StatusCode, serde_json::Value) {
    app.send(
        request("POST", "/api/settings", Some(ADMIN_KEY))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn get_settings_includes_nonce() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/settings", Some(ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["settings"]["quality"], 80);
    assert_eq!(body["data"]["nonce"], app.nonce("save-settings"));
}

#[tokio::test]
async fn save_form() {
    let app = TestApp::new();
    let nonce = app.nonce("save-settings");
    let (status, body) = post_form(
        &app,
        &format!("max_widths=800%2C400&quality=70&resize_mode=height&use_avif=on&_nonce={nonce}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let settings = Settings::new(app.state.options.as_ref()).load();
    assert_eq!(settings.quality, 70);
    assert!(settings.use_avif);
    assert!(!settings.preserve_originals);
    assert_eq!(
        settings
            .max_widths
            .iter()
            .map(|w| w.get())
            .collect::<Vec<_>>(),
        vec![800, 400]
    );
}

#[tokio::test]
async fn invalid_form_changes_nothing() {
    let app = TestApp::new();
    let nonce = app.nonce("save-settings");
    let (status, body) =
        post_form(&app, &format!("quality=70&batch_size=500&_nonce={nonce}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["kind"], "invalid_value");

    assert_eq!(Settings::new(app.state.options.as_ref()).quality(), 80);
}

#[tokio::test]
async fn form_needs_nonce() {
    let app = TestApp::new();
    let (status, body) = post_form(&app, "quality=70").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["data"]["kind"], "invalid_nonce");

    // A nonce for a different action doesn't count.
    let wrong = app.nonce("clear-log");
    let (status, _) = post_form(&app, &format!("quality=70&_nonce={wrong}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The header works as well as the form field.
    let (status, _) = app
        .send(
            request("POST", "/api/settings", Some(ADMIN_KEY))
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(NONCE_HEADER, app.nonce("save-settings"))
                .body(Body::from("quality=60"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(Settings::new(app.state.options.as_ref()).quality(), 60);
}

#[tokio::test]
async fn settings_need_manage_options() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/settings", Some(UPLOAD_KEY)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["data"]["kind"], "missing_capability");
}

#[tokio::test]
async fn update_single_setting() {
    let app = TestApp::new();
    let (status, body) = app
        .admin_action(
            "POST",
            "/api/admin/settings/quality",
            "update-setting",
            Some(serde_json::json!({ "value": 55 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["settings"]["quality"], 55);

    let (status, body) = app
        .admin_action(
            "POST",
            "/api/admin/settings/colour",
            "update-setting",
            Some(serde_json::json!({ "value": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["kind"], "unknown_setting");
}

#[tokio::test]
async fn reset_defaults() {
    let app = TestApp::new();
    let settings = Settings::new(app.state.options.as_ref());
    settings.set_quality(30).unwrap();
    settings.exclude(pixrefiner_store::AttachmentId(4)).unwrap();

    let (status, body) = app
        .admin_action("POST", "/api/admin/reset-defaults", "reset-defaults", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["settings"]["quality"], 80);
    assert!(settings.load().is_excluded(pixrefiner_store::AttachmentId(4)));
}
