pub mod auth;
pub mod config;
pub mod error;
pub mod obfuscate_errors;
pub mod panic_handler;
pub mod refiner;
pub mod routes;
pub mod shared_state;
pub mod tracing_config;

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{routing::IntoMakeService, Extension, Router};
use hyper::server::conn::AddrIncoming;
use pixrefiner_convert::NativeEditor;
use pixrefiner_storage::{RetryPolicy, UploadsDir};
use pixrefiner_store::{MediaLibrary, Options};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::MakeRequestUuid,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::{event, Level};

pub use error::Error;

use crate::{
    auth::{AuthConfig, Capability},
    config::Config,
    obfuscate_errors::ObfuscateErrorLayer,
    shared_state::{InnerState, State},
};

pub struct Server {
    pub host: String,
    pub port: u16,
    pub server: axum::Server<AddrIncoming, IntoMakeService<Router>>,
}

pub fn auth_config(config: &Config) -> AuthConfig {
    let mut auth = AuthConfig::new(&config.nonce_secret);
    if let Some(key) = config.admin_key.as_deref() {
        auth = auth.with_key(key, &[Capability::ManageOptions, Capability::UploadFiles]);
    }
    if let Some(key) = config.upload_key.as_deref() {
        auth = auth.with_key(key, &[Capability::UploadFiles]);
    }
    auth
}

/// Open the stores under the data directory and set up the image editor.
pub fn create_state(config: &Config) -> Result<State, anyhow::Error> {
    std::fs::create_dir_all(&config.data_dir)?;
    let options = Options::open(config.options_path())?;
    let library = MediaLibrary::open(config.library_path())?;

    let uploads = UploadsDir::new(&config.uploads_dir, &config.uploads_url);
    uploads.ensure_exists()?;

    let editor = NativeEditor::new();
    let capabilities = editor.capabilities();
    event!(
        Level::INFO,
        webp = capabilities.webp,
        avif = capabilities.avif,
        "Image backend ready"
    );

    Ok(Arc::new(InnerState {
        production: config.production(),
        options: Arc::new(options),
        library: Arc::new(library),
        editor: Arc::new(editor),
        uploads,
        auth: auth_config(config),
        delete_policy: RetryPolicy::new(
            config.delete_attempts,
            Duration::from_millis(config.delete_backoff_ms),
        ),
    }))
}

pub fn create_router(state: State, max_upload_bytes: usize) -> Router {
    let production = state.production;
    let uploads = ServeDir::new(state.uploads.root());

    routes::configure_routes(Router::new(), max_upload_bytes)
        .nest_service("/uploads", uploads)
        .layer(
            // Global middlewares
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(move |err| {
                    panic_handler::handle_panic(production, err)
                }))
                .layer(ObfuscateErrorLayer::new(production))
                .compression()
                .set_x_request_id(MakeRequestUuid)
                .propagate_x_request_id()
                .layer(Extension(state))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO)),
                )
                .into_inner(),
        )
}

pub async fn run_server(config: Config) -> Result<Server, anyhow::Error> {
    let state = create_state(&config)?;
    let app = create_router(state, config.max_upload_mb * 1024 * 1024);

    let bind_ip: IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((bind_ip, config.port));
    let builder = axum::Server::try_bind(&addr)?;
    let server = builder.serve(app.into_make_service());
    let port = server.local_addr().port();
    event!(Level::INFO, "Listening on {}:{}", config.host, port);

    Ok(Server {
        host: config.host,
        port,
        server,
    })
}
