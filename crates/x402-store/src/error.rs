//! Errors surfaced by the store, mapped onto [`x402_types::error::ErrorCode`]
//! at the session engine's boundary.

use x402_types::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("network {0} not found or not active")]
    NetworkNotFound(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session {0} is not active")]
    SessionNotActive(String),

    #[error("session {0}'s authorization has expired")]
    SessionExpired(String),

    #[error("debit of {amount} exceeds available balance {available} for session {session_id}")]
    InsufficientBalance { session_id: String, amount: u128, available: u128 },

    #[error("api key not found")]
    ApiKeyNotFound,
}

impl StoreError {
    pub fn as_error_code(&self) -> ErrorCode {
        match self {
            StoreError::Database(_) => ErrorCode::DbError,
            StoreError::NetworkNotFound(_) => ErrorCode::InvalidNetwork,
            StoreError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            StoreError::SessionNotActive(_) => ErrorCode::SessionInactive,
            StoreError::SessionExpired(_) => ErrorCode::SessionExpired,
            StoreError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            StoreError::ApiKeyNotFound => ErrorCode::Unauthorized,
        }
    }
}
