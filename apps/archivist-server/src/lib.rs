//! Archivist Server Library
//!
//! Accepts file uploads over HTTP and relays them to a Backblaze B2 bucket.
//! The binary is in main.rs; the router is exposed here for tests.
//!
//! # Modules
//!
//! - `storage`: B2 session cache and retrying uploader
//! - `routes`: HTTP handlers (upload, health)
//! - `request_id`: correlation id middleware

pub mod config;
pub mod error;
pub mod request_id;
pub mod routes;
pub mod state;
pub mod storage;

use std::time::Duration;

use axum::{
    body::HttpBody,
    extract::Request,
    http::header,
    middleware,
    response::Response,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use request_id::RequestId;
use state::AppState;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http()
        .make_span_with(request_span)
        .on_response(log_response);

    Router::new()
        .nest("/health", routes::health::router())
        .merge(routes::upload::router())
        .layer(trace)
        .layer(middleware::from_fn(request_id::assign_request_id))
        .layer(cors)
        .with_state(state)
}

fn request_span(request: &Request) -> tracing::Span {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(RequestId::as_str)
        .unwrap_or("");

    tracing::info_span!(
        "request",
        http_method = %request.method(),
        http_resource = %request.uri().path(),
        request_id = %request_id,
    )
}

fn log_response(response: &Response, latency: Duration, _span: &tracing::Span) {
    tracing::info!(
        http_status = response.status().as_u16(),
        request_duration_ms = latency.as_millis() as u64,
        request_length = response_length(response),
        "Request served"
    );
}

/// Bytes in the response body: `Content-Length` if set, else the exact body size
fn response_length(response: &Response) -> u64 {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or_else(|| response.body().size_hint().exact())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, response::IntoResponse};

    #[test]
    fn test_response_length_from_body() {
        let response = (axum::http::StatusCode::BAD_REQUEST, "missing name").into_response();
        assert_eq!(response_length(&response), 12);
    }

    #[test]
    fn test_response_length_prefers_header() {
        let response = Response::builder()
            .header(header::CONTENT_LENGTH, "42")
            .body(Body::empty())
            .unwrap();
        assert_eq!(response_length(&response), 42);
    }
}
