use std::{io::Cursor, sync::Arc};

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use once_cell::sync::Lazy;
use serde_json::Value;
use temp_dir::TempDir;
use tower::ServiceExt;

use pixrefiner_api::{
    auth::{AuthConfig, Capability, NONCE_HEADER},
    shared_state::{InnerState, State},
};
use pixrefiner_convert::NativeEditor;
use pixrefiner_storage::{RetryPolicy, UploadsDir};
use pixrefiner_store::{MediaLibrary, Options};

pub const ADMIN_KEY: &str = "test-admin-key";
pub const UPLOAD_KEY: &str = "test-upload-key";
pub const UPLOADS_URL: &str = "https://example.com/uploads";

pub struct TestApp {
    pub dir: TempDir,
    pub state: State,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> TestApp {
        Self::with_production(false)
    }

    pub fn with_production(production: bool) -> TestApp {
        Lazy::force(&pixrefiner_test::TRACING);

        let dir = TempDir::new().expect("creating temp dir");
        let uploads = UploadsDir::new(dir.child("uploads"), UPLOADS_URL);
        uploads.ensure_exists().expect("creating uploads dir");

        let auth = AuthConfig::new("test nonce secret")
            .with_key(
                ADMIN_KEY,
                &[Capability::ManageOptions, Capability::UploadFiles],
            )
            .with_key(UPLOAD_KEY, &[Capability::UploadFiles]);

        let state = Arc::new(InnerState {
            production,
            options: Arc::new(Options::in_memory()),
            library: Arc::new(MediaLibrary::in_memory()),
            editor: Arc::new(NativeEditor::new()),
            uploads,
            auth,
            delete_policy: RetryPolicy::immediate(3),
        });

        let router = pixrefiner_api::create_router(state.clone(), 16 * 1024 * 1024);
        TestApp { dir, state, router }
    }

    pub fn nonce(&self, action: &str) -> String {
        self.state.auth.nonce(action)
    }

    /// Send a request and return the status and the JSON body, or `Value::Null` when the body
    /// is empty.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("sending request");
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .expect("reading body");
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&body).into_owned())
            })
        };
        (status, json)
    }

    /// An admin request carrying the nonce for `action`.
    pub async fn admin_action(
        &self,
        method: &str,
        uri: &str,
        action: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = request(method, uri, Some(ADMIN_KEY)).header(NONCE_HEADER, self.nonce(action));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        self.send(request.expect("building request")).await
    }

    pub async fn get(&self, uri: &str, key: Option<&str>) -> (StatusCode, Value) {
        self.send(
            request("GET", uri, key)
                .body(Body::empty())
                .expect("building request"),
        )
        .await
    }

    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> (StatusCode, Value) {
        self.send(
            request("POST", &format!("/api/media?filename={file_name}"), Some(UPLOAD_KEY))
                .body(Body::from(bytes))
                .expect("building request"),
        )
        .await
    }
}

pub fn request(method: &str, uri: &str, key: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder().method(method).uri(uri);
    match key {
        Some(key) => builder.header(header::AUTHORIZATION, format!("Bearer {key}")),
        None => builder,
    }
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut output = Cursor::new(Vec::new());
    pixrefiner_test::test_image(width, height)
        .write_to(&mut output, image::ImageOutputFormat::Jpeg(90))
        .expect("encoding jpeg");
    output.into_inner()
}
