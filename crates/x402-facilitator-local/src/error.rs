//! The facilitator's HTTP-visible error type.
//!
//! Every component (Session Engine, Scheme Router, Capture Scheduler, Reclaim
//! Orchestrator, API Surface) ultimately produces an [`ApiError`], which
//! carries exactly the [`ErrorCode`] taxonomy spec §7 defines and renders the
//! `{error, details?}` envelope.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use x402_chain_eip155::error::Eip155ChainError;
use x402_store::StoreError;
use x402_types::error::ErrorCode;
use x402_types::proto::ErrorEnvelope;

#[derive(Debug, thiserror::Error)]
#[error("{code}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub details: Option<Vec<String>>,
}

impl ApiError {
    pub fn new(code: ErrorCode) -> Self {
        Self { code, details: None }
    }

    pub fn with_details(code: ErrorCode, details: impl Into<Vec<String>>) -> Self {
        Self { code, details: Some(details.into()) }
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        ApiError::new(code)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if matches!(err, StoreError::Database(_)) {
            tracing::error!(error = %err, "store error");
        }
        ApiError::new(err.as_error_code())
    }
}

/// Chain errors need the failing operation to pick the right code (§7:
/// "reverts bubble as the relevant operation error"); call sites convert
/// explicitly via [`Eip155ChainError::as_operation_error`] instead of relying
/// on a blanket `From` that can't know which escrow method was in flight.
pub fn chain_error(err: &Eip155ChainError, op: x402_chain_eip155::error::EscrowOperation) -> ApiError {
    tracing::warn!(error = %err, ?op, "chain adapter call failed");
    ApiError::new(err.as_operation_error(op))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match self.details {
            Some(details) => ErrorEnvelope::with_details(self.code, details),
            None => ErrorEnvelope::new(self.code),
        };
        (status, Json(body)).into_response()
    }
}
