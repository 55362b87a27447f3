use std::any::Any;

use axum::{
    body::Body,
    http::{header, Response, StatusCode},
};
use tracing::{event, Level};

pub fn handle_panic(production: bool, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic message".to_string()
    };

    event!(Level::ERROR, %details, "Request handler panicked");

    let body = if production {
        serde_json::json!({
            "success": false,
            "data": { "kind": "internal_server_error", "message": "Server error" }
        })
    } else {
        serde_json::json!({
            "success": false,
            "data": { "kind": "panic", "message": details }
        })
    };

    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::from("Server error")))
}
