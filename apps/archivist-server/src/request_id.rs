//! Request ID middleware
//!
//! Tags every request with a correlation id of the form
//! `host.example.com/Ab3dE6gH9j-000042`: a per-process random prefix plus an
//! atomically incremented counter. An inbound `X-Request-Id` is honoured.
//! The host part is read from the kernel so it is right even when
//! `$HOSTNAME` is not exported.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

static PREFIX: OnceLock<String> = OnceLock::new();
static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Correlation id stored in request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn prefix() -> &'static str {
    PREFIX.get_or_init(|| {
        let hostname = hostname();

        let random: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(10)
            .collect();

        format!("{}/{}", hostname, random)
    })
}

/// Kernel hostname, then `$HOSTNAME`, then `localhost`
fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}

/// Generate the next process-unique request id
pub fn next_request_id() -> RequestId {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    RequestId(format!("{}-{:06}", prefix(), n))
}

/// Middleware: attach a [`RequestId`] and echo it in the response
pub async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| RequestId(v.to_string()))
        .unwrap_or_else(next_request_id);

    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), value);
    }

    response
}
