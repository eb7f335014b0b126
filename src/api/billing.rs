use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::api::require_admin;
use crate::database::user_repository::UserRepository;
use crate::error::AppError;
use crate::gateways::factory::GatewayFactory;
use crate::gateways::types::GatewayName;
use crate::middleware::error::{get_request_id_from_headers, json_error_response};
use crate::services::currency::CurrencyService;

#[derive(Clone)]
pub struct BillingState {
    pub factory: Arc<GatewayFactory>,
    pub currency: Arc<CurrencyService>,
    pub user_repo: Arc<UserRepository>,
}

/// Client-facing view of one gateway. `public_key` is the publishable
/// key; secret credentials never leave the server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfigResponse {
    pub gateway: String,
    pub enabled: bool,
    pub configured: bool,
    pub public_key: Option<String>,
    pub currency: String,
    pub supported_currencies: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CurrencyResponse {
    pub currency: String,
    pub locked: bool,
}

#[derive(Debug, Deserialize)]
pub struct CurrencyUpdateRequest {
    pub code: String,
}

/// GET /api/billing/{gateway}/config
///
/// Answers for unconfigured gateways too (`enabled: false`) so clients
/// can decide which checkout buttons to render without a second probe.
pub async fn get_gateway_config(
    State(state): State<Arc<BillingState>>,
    Path(gateway): Path<String>,
    headers: axum::http::HeaderMap,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);

    let name = match GatewayName::from_str(&gateway) {
        Ok(name) => name,
        Err(_) => {
            return json_error_response(
                StatusCode::BAD_REQUEST,
                format!("Unknown gateway: {}", gateway),
                request_id,
            )
            .into_response();
        }
    };

    let settings = match state.currency.get().await {
        Ok(settings) => settings,
        Err(e) => return app_error_response(e, request_id),
    };

    match state.factory.status(name).await {
        Ok(status) => {
            let body = GatewayConfigResponse {
                gateway: status.gateway.as_str().to_string(),
                enabled: status.enabled,
                configured: status.configured,
                public_key: status.public_key,
                currency: settings.currency,
                supported_currencies: status.supported_currencies,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => app_error_response(AppError::from(e), request_id),
    }
}

/// GET /api/billing/currency
pub async fn get_currency(State(state): State<Arc<BillingState>>) -> Response {
    match state.currency.get().await {
        Ok(settings) => (
            StatusCode::OK,
            Json(CurrencyResponse {
                currency: settings.currency,
                locked: settings.currency_locked,
            }),
        )
            .into_response(),
        Err(e) => app_error_response(e, None),
    }
}

/// PUT /api/billing/currency — admin only, rejected once locked
pub async fn update_currency(
    State(state): State<Arc<BillingState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CurrencyUpdateRequest>,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);

    let admin = match require_admin(&state.user_repo, &headers).await {
        Ok(admin) => admin,
        Err(e) => return app_error_response(e, request_id),
    };

    match state.currency.set_currency(&body.code, admin.id).await {
        Ok(settings) => {
            info!(currency = %settings.currency, admin = %admin.id, "Platform currency updated");
            (
                StatusCode::OK,
                Json(CurrencyResponse {
                    currency: settings.currency,
                    locked: settings.currency_locked,
                }),
            )
                .into_response()
        }
        Err(e) => app_error_response(e, request_id),
    }
}

/// POST /api/billing/currency/lock — admin only, cannot be undone
pub async fn lock_currency(
    State(state): State<Arc<BillingState>>,
    headers: axum::http::HeaderMap,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);

    let admin = match require_admin(&state.user_repo, &headers).await {
        Ok(admin) => admin,
        Err(e) => return app_error_response(e, request_id),
    };

    match state.currency.lock(admin.id).await {
        Ok(settings) => (
            StatusCode::OK,
            Json(CurrencyResponse {
                currency: settings.currency,
                locked: settings.currency_locked,
            }),
        )
            .into_response(),
        Err(e) => app_error_response(e, request_id),
    }
}

pub(crate) fn app_error_response(e: AppError, request_id: Option<String>) -> Response {
    match request_id {
        Some(id) => e.with_request_id(id).into_response(),
        None => e.into_response(),
    }
}
