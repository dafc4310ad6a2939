//! Typed errors, driver error classification and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// SQLSTATE raised when `statement_timeout` cancels a statement.
const QUERY_CANCELED: &str = "57014";

/// SQLSTATE for "database does not exist".
pub(crate) const INVALID_CATALOG_NAME: &str = "3D000";

#[derive(Error, Debug)]
pub enum TenancyError {
    /// Missing or malformed connection settings. Fatal at startup.
    #[error("configuration: {0}")]
    Configuration(String),
    /// Core database unreachable or failing its liveness probe.
    #[error("connectivity: {0}")]
    Connectivity(String),
    /// Unknown, inactive or unreachable tenant.
    #[error("tenant not found: {slug}")]
    TenantNotFound { slug: String },
    /// Pool acquisition or statement exceeded its bound.
    #[error("timed out: {0}")]
    Timeout(String),
    /// Anything else reported by the database, passed through verbatim.
    #[error("query: {0}")]
    Query(sqlx::Error),
    /// Core pool requested before bootstrap.
    #[error("core pool not initialized")]
    NotInitialized,
    /// Registry already shut down.
    #[error("pool registry is closed")]
    Closed,
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    /// One entry per pool that failed to close.
    #[error("shutdown finished with {} failure(s): {}", failures.len(), failures.join("; "))]
    Shutdown { failures: Vec<String> },
}

impl TenancyError {
    pub fn tenant_not_found(slug: impl Into<String>) -> Self {
        TenancyError::TenantNotFound { slug: slug.into() }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TenancyError::Timeout(_))
    }

    pub fn is_tenant_not_found(&self) -> bool {
        matches!(self, TenancyError::TenantNotFound { .. })
    }

    /// SQLSTATE of the underlying database error, when there is one.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            TenancyError::Query(e) => sqlstate_of(e),
            _ => None,
        }
    }
}

pub(crate) fn sqlstate_of(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

impl From<sqlx::Error> for TenancyError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut => TenancyError::Timeout("connection acquire".into()),
            sqlx::Error::PoolClosed => TenancyError::Closed,
            sqlx::Error::Configuration(inner) => TenancyError::Configuration(inner.to_string()),
            sqlx::Error::Database(_) if sqlstate_of(&e).as_deref() == Some(QUERY_CANCELED) => {
                TenancyError::Timeout("statement".into())
            }
            _ => TenancyError::Query(e),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for TenancyError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            TenancyError::TenantNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            TenancyError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            TenancyError::Connectivity(_) | TenancyError::Closed => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            TenancyError::Query(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            TenancyError::Configuration(_)
            | TenancyError::NotInitialized
            | TenancyError::InvalidTransition { .. }
            | TenancyError::Shutdown { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        // Never echo the slug: a missing and a disabled library must look the same.
        // Driver messages name tables and constraints; they go to the log only.
        let message = match &self {
            TenancyError::TenantNotFound { .. } => "library not found".to_string(),
            TenancyError::Query(_) => "database error".to_string(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
