use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::responses::RequestMeta;
use crate::types::{Currency, RequestStatus, Subaccount};

pub const E_INVALID_AMOUNT: &str = "INVALID_AMOUNT";
pub const E_INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
pub const E_ALREADY_PROCESSED: &str = "ALREADY_PROCESSED";
pub const E_RECORD_NOT_FOUND: &str = "RECORD_NOT_FOUND";
pub const E_TRANSACTION_CONFLICT: &str = "TRANSACTION_CONFLICT";
pub const E_INVALID_TRANSITION: &str = "INVALID_TRANSITION";
pub const E_UNSUPPORTED_SUBACCOUNT: &str = "UNSUPPORTED_SUBACCOUNT";
pub const E_INVALID_REFERRAL_CODE: &str = "INVALID_REFERRAL_CODE";
pub const E_DUPLICATE_RECORD: &str = "DUPLICATE_RECORD";
pub const E_DB_FAILURE: &str = "DB_FAILURE";

/// Errors raised by a document store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A document read inside the transaction changed before commit.
    #[error("write conflict on {collection}/{id}")]
    Conflict { collection: String, id: String },

    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Errors surfaced by the ledger core.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient {currency}/{subaccount} balance for {user_id}: have {available}, need {required}")]
    InsufficientBalance {
        user_id: String,
        currency: Currency,
        subaccount: Subaccount,
        available: Decimal,
        required: Decimal,
    },

    #[error("request {request_id} already processed (status={status})")]
    AlreadyProcessed {
        request_id: String,
        status: RequestStatus,
    },

    #[error("{collection} record {id} not found")]
    RecordNotFound { collection: String, id: String },

    #[error("transaction conflict persisted after {attempts} attempts")]
    TransactionConflict { attempts: u32 },

    #[error("cannot {action} request {request_id} in status {from}")]
    InvalidTransition {
        request_id: String,
        from: RequestStatus,
        action: &'static str,
    },

    #[error("{currency} has no {subaccount} subaccount")]
    UnsupportedSubaccount {
        currency: Currency,
        subaccount: Subaccount,
    },

    #[error("unknown referral code: {0}")]
    InvalidReferralCode(String),

    #[error("{collection} record {id} already exists")]
    DuplicateRecord { collection: String, id: String },

    #[error(transparent)]
    Store(StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists { collection, id } => {
                LedgerError::DuplicateRecord { collection, id }
            }
            other => LedgerError::Store(other),
        }
    }
}

impl LedgerError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => E_INVALID_AMOUNT,
            Self::InsufficientBalance { .. } => E_INSUFFICIENT_BALANCE,
            Self::AlreadyProcessed { .. } => E_ALREADY_PROCESSED,
            Self::RecordNotFound { .. } => E_RECORD_NOT_FOUND,
            Self::TransactionConflict { .. } => E_TRANSACTION_CONFLICT,
            Self::InvalidTransition { .. } => E_INVALID_TRANSITION,
            Self::UnsupportedSubaccount { .. } => E_UNSUPPORTED_SUBACCOUNT,
            Self::InvalidReferralCode(_) => E_INVALID_REFERRAL_CODE,
            Self::DuplicateRecord { .. } => E_DUPLICATE_RECORD,
            Self::Store(_) | Self::Serialization(_) => E_DB_FAILURE,
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransactionConflict { .. } | Self::Store(StoreError::Conflict { .. })
        )
    }

    pub(crate) fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount(_)
            | LedgerError::UnsupportedSubaccount { .. }
            | LedgerError::InvalidReferralCode(_) => ApiError::BadRequest(err.to_string()),
            LedgerError::RecordNotFound { .. } => ApiError::NotFound(err.to_string()),
            LedgerError::InsufficientBalance { .. }
            | LedgerError::AlreadyProcessed { .. }
            | LedgerError::InvalidTransition { .. }
            | LedgerError::DuplicateRecord { .. } => ApiError::Conflict(err.to_string()),
            LedgerError::TransactionConflict { .. } => ApiError::Unavailable(err.to_string()),
            LedgerError::Store(_) | LedgerError::Serialization(_) => {
                ApiError::Internal(err.into())
            }
        }
    }
}

impl LedgerError {
    pub fn into_api(self, meta: RequestMeta) -> ApiErrorWithMeta {
        let code = self.code();
        ApiError::from(self).with_meta(meta).with_code(code)
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
