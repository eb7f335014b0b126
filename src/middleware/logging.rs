//! Request logging and request-id middleware
//!
//! Every request gets a UUID request id (set before routing, propagated
//! onto the response) and one structured log line with method, path,
//! status and latency.

use axum::{extract::Request, middleware::Next, response::Response};
use http::HeaderValue;
use std::time::Instant;
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::{error, info};
use uuid::Uuid;

/// Generates a UUID v4 for `x-request-id` when the client did not send one
#[derive(Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Log one line per request with latency and status
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = Instant::now();
    let response = next.run(request).await;
    let latency_ms = start.elapsed().as_millis();
    let status = response.status();

    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            latency_ms = %latency_ms,
            request_id = %request_id,
            "Request failed"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            latency_ms = %latency_ms,
            request_id = %request_id,
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_distinct_uuids() {
        let mut maker = UuidRequestId;
        let request = http::Request::new(());

        let first = maker.make_request_id(&request).expect("id generated");
        let second = maker.make_request_id(&request).expect("id generated");

        let first = first.header_value().to_str().expect("ascii").to_string();
        let second = second.header_value().to_str().expect("ascii").to_string();
        assert!(Uuid::parse_str(&first).is_ok());
        assert_ne!(first, second);
    }
}
