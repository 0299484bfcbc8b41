//! Chain-adapter error taxonomy, mapped onto [`x402_types::error::ErrorCode`]
//! at this crate's outer boundary.

use x402_types::error::ErrorCode;

/// Errors arising from on-chain reads, writes, or off-chain signature recovery.
#[derive(Debug, thiserror::Error)]
pub enum Eip155ChainError {
    #[error("rpc transport error: {0}")]
    Transport(String),

    #[error("escrow contract call reverted: {0}")]
    ContractRevert(String),

    #[error("no signer configured for network")]
    NoSigner,

    #[error("signature recovery failed: {0}")]
    SignatureRecovery(String),

    #[error("signature does not recover to the expected payer")]
    SignatureMismatch,

    #[error("transaction receipt not observed within timeout")]
    ReceiptTimeout,

    #[error("multicall3 call at index {index} failed")]
    MulticallCallFailed { index: usize },
}

impl Eip155ChainError {
    /// Maps this error onto the wire-visible error taxonomy. On-chain
    /// operation failures keep the caller's intent (authorize/capture/void)
    /// rather than collapsing to a generic `internal_error` (§7: reverts
    /// bubble as the relevant operation error).
    pub fn as_operation_error(&self, op: EscrowOperation) -> ErrorCode {
        match self {
            Eip155ChainError::SignatureMismatch | Eip155ChainError::SignatureRecovery(_) => {
                ErrorCode::InvalidSignature
            }
            Eip155ChainError::ReceiptTimeout => ErrorCode::RequestTimeout,
            _ => match op {
                EscrowOperation::Authorize => ErrorCode::EscrowAuthorizationFailed,
                EscrowOperation::Capture => ErrorCode::EscrowCaptureFailed,
                EscrowOperation::Void => ErrorCode::EscrowVoidFailed,
                EscrowOperation::Charge => ErrorCode::TransferFailed,
            },
        }
    }
}

/// Which escrow contract method a failed call was attempting, used to pick
/// the right wire error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowOperation {
    Authorize,
    Capture,
    Void,
    Charge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_revert_maps_to_operation_specific_code() {
        let err = Eip155ChainError::ContractRevert("reverted".into());
        assert_eq!(err.as_operation_error(EscrowOperation::Capture), ErrorCode::EscrowCaptureFailed);
        assert_eq!(err.as_operation_error(EscrowOperation::Void), ErrorCode::EscrowVoidFailed);
    }

    #[test]
    fn signature_errors_map_to_invalid_signature_regardless_of_operation() {
        let err = Eip155ChainError::SignatureMismatch;
        assert_eq!(err.as_operation_error(EscrowOperation::Authorize), ErrorCode::InvalidSignature);
    }
}
