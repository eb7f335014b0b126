use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::api::billing::app_error_response;
use crate::api::require_admin;
use crate::database::user_repository::UserRepository;
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::services::refunds::RefundService;

#[derive(Clone)]
pub struct RefundsState {
    pub refunds: Arc<RefundService>,
    pub user_repo: Arc<UserRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub transaction_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub refund_id: String,
}

/// POST /api/billing/refunds — admin only.
///
/// Issues the refund at the gateway first, then reverses credits and
/// records the refund locally. Errors come back structured: 404 unknown
/// transaction, 409 already refunded, 422 not refundable or gateway
/// unconfigured.
pub async fn create_refund(
    State(state): State<Arc<RefundsState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<RefundRequest>,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);

    let admin = match require_admin(&state.user_repo, &headers).await {
        Ok(admin) => admin,
        Err(e) => return app_error_response(e, request_id),
    };

    let transaction_id = match Uuid::parse_str(&body.transaction_id) {
        Ok(id) => id,
        Err(_) => {
            let err = AppError::new(AppErrorKind::Validation(ValidationError::InvalidIdentifier {
                value: body.transaction_id.clone(),
                reason: "transactionId must be a UUID".to_string(),
            }));
            return app_error_response(err, request_id);
        }
    };

    match state
        .refunds
        .initiate_refund(transaction_id, admin.id, body.reason.as_deref())
        .await
    {
        Ok(record) => {
            info!(
                refund_id = %record.refund.id,
                transaction_id = %body.transaction_id,
                admin = %admin.id,
                credits_reversed = record.credits_reversed,
                "Admin refund completed"
            );
            (
                StatusCode::OK,
                Json(RefundResponse {
                    refund_id: record.refund.id.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => app_error_response(e, request_id),
    }
}
