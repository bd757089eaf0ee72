//! Error handling module
//!
//! Provides unified error types and handling for the entire application.

use crate::ledger::LedgerError;
use crate::types::{Address, Amount};
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Application-wide error type
///
/// Every variant is terminal for the invocation that produced it; nothing is
/// retried or remembered across calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient funds: {who} holds {have} of token {token}, needs {need} ({have} < {need})")]
    InsufficientFunds {
        who: Address,
        token: Address,
        have: Amount,
        need: Amount,
    },

    #[error("Insufficient allowance: {who} allows {have} of token {token}, needs {need} ({have} < {need})")]
    InsufficientAllowance {
        who: Address,
        token: Address,
        have: Amount,
        need: Amount,
    },

    #[error("Ledger rejected the call: {0}")]
    LedgerRejection(String),

    #[error("Token query failed for {token}: {reason}")]
    TokenQueryFailed { token: Address, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wrap a failed token collaborator call
    pub fn token_query(token: &Address, source: LedgerError) -> Self {
        AppError::TokenQueryFailed {
            token: token.clone(),
            reason: source.to_string(),
        }
    }

    /// True for failures detected locally, before any mutating call was sent
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            AppError::Config(_)
                | AppError::Validation(_)
                | AppError::InsufficientFunds { .. }
                | AppError::InsufficientAllowance { .. }
        )
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Reverted(reason) => AppError::LedgerRejection(reason),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "A configuration error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::InsufficientFunds { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INSUFFICIENT_FUNDS",
                self.to_string(),
                None,
            ),
            AppError::InsufficientAllowance { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INSUFFICIENT_ALLOWANCE",
                self.to_string(),
                None,
            ),
            AppError::LedgerRejection(reason) => (
                StatusCode::CONFLICT,
                "LEDGER_REJECTION",
                "The ledger rejected the call".to_string(),
                Some(reason.clone()),
            ),
            AppError::TokenQueryFailed { token, reason } => {
                error!("Token query failed for {}: {}", token, reason);
                (
                    StatusCode::BAD_GATEWAY,
                    "TOKEN_QUERY_FAILED",
                    format!("Token {} did not answer a standard query", token),
                    Some(reason.clone()),
                )
            }
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                None,
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        if self.is_preflight() {
            warn!("Rejected before any ledger call: {}", self);
        }

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}
