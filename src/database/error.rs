//! Database error types shared by all repositories.

use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

/// Classified database failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum DatabaseErrorKind {
    /// No row matched the lookup
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    /// Unique constraint rejected the write (Postgres 23505)
    #[error("unique constraint violated{}", constraint.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    UniqueViolation { constraint: Option<String> },

    /// Check constraint rejected the write (Postgres 23514)
    #[error("check constraint violated{}", constraint.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    CheckViolation { constraint: Option<String> },

    /// Connection or pool failure, worth retrying
    #[error("database connection error: {message}")]
    Connection { message: String },

    /// Anything else
    #[error("database error: {message}")]
    Unknown { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    /// Map an sqlx error into our classification
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().map(str::to_string);
                match db_err.code().as_deref() {
                    Some("23505") => DatabaseErrorKind::UniqueViolation { constraint },
                    Some("23514") => DatabaseErrorKind::CheckViolation { constraint },
                    _ => DatabaseErrorKind::Unknown {
                        message: db_err.to_string(),
                    },
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DatabaseErrorKind::Connection {
                message: err.to_string(),
            },
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };

        Self { kind }
    }

    /// True when the write hit a unique constraint. Callers use this to
    /// detect replayed gateway events and idempotency-key collisions.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let kind = match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } => match entity.as_str() {
                "user" => AppErrorKind::Domain(DomainError::UserNotFound {
                    user_id: id.clone(),
                }),
                _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message: err.to_string(),
                    is_retryable: false,
                }),
            },
            DatabaseErrorKind::Connection { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message: message.clone(),
                    is_retryable: true,
                })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: false,
            }),
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_domain_error() {
        let err = DatabaseError::new(DatabaseErrorKind::NotFound {
            entity: "user".to_string(),
            id: "42".to_string(),
        });

        let app: AppError = err.into();
        assert_eq!(app.status_code(), 404);
    }

    #[test]
    fn unique_violation_is_detectable() {
        let err = DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: Some("payment_transactions_gateway_txn_key".to_string()),
        });
        assert!(err.is_unique_violation());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("payment_transactions_gateway_txn_key"));
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::Connection {
            message: "pool timed out".to_string(),
        });
        assert!(err.is_retryable());

        let app: AppError = err.into();
        assert_eq!(app.status_code(), 500);
        assert!(app.is_retryable());
    }
}
