//! The error code taxonomy shared across the facilitator workspace.
//!
//! [`ErrorCode`] is the string surfaced to HTTP clients (`invalidReason`,
//! `errorReason`, or the `error` field of the JSON envelope). Every crate in
//! the workspace maps its own typed error enum onto one of these codes at
//! its outer boundary; the codes themselves never carry payload beyond what
//! `Display` needs.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// A stable, wire-visible error code.
///
/// Serializes to snake_case (`session_not_found`) so it round-trips directly
/// as the `error`/`invalidReason`/`errorReason` field values described in the
/// API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Authentication
    Unauthorized,
    RateLimited,

    // Request shape
    InvalidRequest,
    InvalidPayload,
    UnsupportedScheme,

    // Signature / authorization
    InvalidSignature,
    InvalidRecipient,
    InvalidAsset,
    InvalidTokenCollector,
    AuthorizationNotYetValid,
    AuthorizationExpired,
    NonceAlreadyUsed,

    // Economic
    InsufficientAmount,
    InsufficientFunds,
    DepositOutOfBounds,
    DepositLessThanCost,
    InsufficientBalance,

    // Session
    SessionNotFound,
    SessionInactive,
    SessionExpired,
    SessionTokenNotConfigured,
    InvalidSessionToken,
    NetworkMismatch,
    SessionExpiryInvalid,
    SessionExpiryExceedsAuthorization,
    Tier3CaptureFailed,

    // Infrastructure
    InvalidNetwork,
    DbError,
    RequestTimeout,
    InternalError,

    // On-chain operation failures (§7 propagation policy: reverts bubble as
    // the relevant operation error)
    EscrowAuthorizationFailed,
    EscrowCaptureFailed,
    EscrowVoidFailed,
    TransferFailed,
}

impl ErrorCode {
    /// The HTTP status this code maps to, per §7's user-visible behavior table.
    pub fn http_status(&self) -> u16 {
        use ErrorCode::*;
        match self {
            Unauthorized => 401,
            RateLimited => 429,
            InvalidRequest | InvalidPayload | UnsupportedScheme | InvalidSignature
            | InvalidRecipient | InvalidAsset | InvalidTokenCollector
            | AuthorizationNotYetValid | AuthorizationExpired | NonceAlreadyUsed
            | InsufficientAmount | InsufficientFunds | DepositOutOfBounds
            | DepositLessThanCost | InsufficientBalance | SessionInactive | SessionExpired
            | SessionTokenNotConfigured | InvalidSessionToken | NetworkMismatch
            | SessionExpiryInvalid | SessionExpiryExceedsAuthorization | Tier3CaptureFailed
            | InvalidNetwork | EscrowAuthorizationFailed | EscrowCaptureFailed
            | EscrowVoidFailed | TransferFailed => 400,
            SessionNotFound => 404,
            RequestTimeout => 504,
            DbError | InternalError => 500,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{}", json.trim_matches('"'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_snake_case() {
        assert_eq!(ErrorCode::SessionNotFound.to_string(), "session_not_found");
        assert_eq!(ErrorCode::InsufficientBalance.to_string(), "insufficient_balance");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ErrorCode::SessionNotFound.http_status(), 404);
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
        assert_eq!(ErrorCode::RequestTimeout.http_status(), 504);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
        assert_eq!(ErrorCode::InvalidPayload.http_status(), 400);
    }
}
