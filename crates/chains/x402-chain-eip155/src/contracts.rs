//! `sol!` bindings for the escrow contract and the ERC-3009/ERC-20 surfaces
//! it sits on top of.
//!
//! The escrow contract itself is external (§1: "the code of the EVM escrow
//! contract itself is *external*; the facilitator only calls it"). This
//! module only declares the ABI fragment the facilitator needs to call:
//! `authorize`/`capture`/`void`/`charge`/`getHash` plus the read-only token
//! surface (`balanceOf`, `authorizationState`) and Multicall3.

use alloy_sol_types::sol;

sol! {
    /// The escrow session key. Mirrors [`x402_types::payment_info::PaymentInfo`]
    /// field-for-field; `getHash(PaymentInfo)` is this struct's canonical
    /// EIP-712 hash computed on-chain.
    #[derive(Debug)]
    struct PaymentInfo {
        address operator;
        address payer;
        address receiver;
        address token;
        uint256 maxAmount;
        uint256 preApprovalExpiry;
        uint256 authorizationExpiry;
        uint256 refundExpiry;
        uint16 minFeeBps;
        uint16 maxFeeBps;
        address feeReceiver;
        uint256 salt;
    }

    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEscrow {
        function authorize(PaymentInfo calldata paymentInfo, uint256 amount, address tokenCollector, bytes calldata collectorData) external;
        function capture(PaymentInfo calldata paymentInfo, uint256 amount, uint16 feeBps, address feeReceiver) external;
        function void(PaymentInfo calldata paymentInfo) external;
        function charge(PaymentInfo calldata paymentInfo, uint256 amount, address tokenCollector, bytes calldata collectorData, uint16 feeBps, address feeReceiver) external;
        function getHash(PaymentInfo calldata paymentInfo) external view returns (bytes32);
    }

    /// The ERC-3009-capable token surface the escrow's token collector pulls
    /// from. `authorizationState` lets the session engine reject an already
    /// spent nonce before wasting gas on `authorize` (§4.3 precondition (i)).
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEip3009Token {
        function balanceOf(address account) external view returns (uint256);
        function authorizationState(address authorizer, bytes32 nonce) external view returns (bool);
        function transferWithAuthorization(address from, address to, uint256 value, uint256 validAfter, uint256 validBefore, bytes32 nonce, uint8 v, bytes32 r, bytes32 s) external;
    }

    /// The EIP-712 struct a payer actually signs for ERC-3009. Used only to
    /// reconstruct the signing hash for off-chain recovery in [`crate::eip712`];
    /// the on-chain `tokenCollector` re-derives and checks the same hash.
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }

    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
    }
}

/// The canonical Multicall3 deployment address, identical across almost
/// every EVM chain it's deployed to.
pub const MULTICALL3_ADDRESS: alloy_primitives::Address =
    alloy_primitives::address!("0xcA11bde05977b3631167028862bE2a173976CA11");

impl From<&x402_types::payment_info::PaymentInfo> for PaymentInfo {
    fn from(p: &x402_types::payment_info::PaymentInfo) -> Self {
        PaymentInfo {
            operator: p.operator,
            payer: p.payer,
            receiver: p.receiver,
            token: p.token,
            maxAmount: p.max_amount,
            preApprovalExpiry: alloy_primitives::U256::from(p.pre_approval_expiry.as_secs()),
            authorizationExpiry: alloy_primitives::U256::from(p.authorization_expiry.as_secs()),
            refundExpiry: alloy_primitives::U256::from(p.refund_expiry.as_secs()),
            minFeeBps: p.min_fee_bps.into(),
            maxFeeBps: p.max_fee_bps.into(),
            feeReceiver: p.fee_receiver,
            salt: p.salt,
        }
    }
}
