//! HTTP handlers, grouped by route family. Each family gets its own
//! state struct so handlers only see the services they use.

pub mod billing;
pub mod refunds;
pub mod webhooks;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::database::user_repository::{User, UserRepository};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};

/// Resolve the calling principal from the `x-user-id` header (injected
/// by the auth layer upstream of this service) and require an admin.
pub(crate) async fn require_admin(
    user_repo: &UserRepository,
    headers: &HeaderMap,
) -> AppResult<User> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::new(AppErrorKind::Validation(ValidationError::MissingHeader {
                name: "x-user-id".to_string(),
            }))
        })?;

    let user_id = Uuid::parse_str(raw).map_err(|_| {
        AppError::new(AppErrorKind::Validation(ValidationError::InvalidIdentifier {
            value: raw.to_string(),
            reason: "x-user-id must be a UUID".to_string(),
        }))
    })?;

    let user = user_repo.find_by_user_id(user_id).await?.ok_or_else(|| {
        AppError::new(AppErrorKind::Domain(DomainError::AdminRequired {
            user_id: user_id.to_string(),
        }))
    })?;

    if !user.is_admin {
        return Err(AppError::new(AppErrorKind::Domain(
            DomainError::AdminRequired {
                user_id: user_id.to_string(),
            },
        )));
    }

    Ok(user)
}
