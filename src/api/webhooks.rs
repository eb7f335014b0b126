use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::middleware::error::{get_request_id_from_headers, json_error_response};
use crate::services::webhook_processor::WebhookProcessor;

pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
}

/// POST /api/webhooks/{gateway}
///
/// The raw body is handed to the processor untouched: signature schemes
/// sign the exact bytes on the wire, so any re-serialization here would
/// break verification. Anything the processor acknowledged comes back
/// `200 {"received": true}` so the gateway stops redelivering; transient
/// failures come back 500 so it retries (a copy is already parked on the
/// retry queue by then).
pub async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(gateway): Path<String>,
    headers: axum::http::HeaderMap,
    body: String,
) -> impl IntoResponse {
    info!(gateway = %gateway, bytes = body.len(), "Received webhook");

    let request_id = get_request_id_from_headers(&headers);

    match state
        .processor
        .process(&gateway, &headers, body.as_bytes())
        .await
    {
        Ok(outcome) => {
            info!(gateway = %gateway, outcome = outcome.as_str(), "Webhook processed");
            (StatusCode::OK, Json(serde_json::json!({"received": true}))).into_response()
        }
        Err(e) if e.is_retryable() => {
            warn!(gateway = %gateway, error = %e, "Webhook deferred for retry");
            json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Webhook processing failed; delivery will be retried",
                request_id,
            )
            .into_response()
        }
        Err(e) => {
            // Terminal rejections: redelivery would fail the same way, so
            // tell the gateway the request itself was bad.
            warn!(gateway = %gateway, error = %e, "Webhook rejected");
            json_error_response(StatusCode::BAD_REQUEST, e.to_string(), request_id)
                .into_response()
        }
    }
}
