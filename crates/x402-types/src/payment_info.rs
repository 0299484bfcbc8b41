//! `PaymentInfo`, the value object defining an escrow session.
//!
//! An escrow session is identified by the keccak256 hash of its `PaymentInfo`
//! tuple, computed with the payer zeroed out (see
//! [`PaymentInfo::canonical_for_hash`]). That makes the session id
//! payer-agnostic: the same signed authorization could in principle be bound
//! by any payer, but the facilitator records exactly one payer per session at
//! creation time. The actual keccak256/EIP-712 hashing lives in
//! `x402-chain-eip155`, which is the only crate with the escrow contract's
//! ABI; this module only owns the value type and its field invariants.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::timestamp::UnixTimestamp;

/// Maximum representable amount: `2^120 - 1`, the width of the escrow
/// contract's packed amount fields.
pub fn max_amount() -> U256 {
    (U256::from(1u8) << 120) - U256::from(1u8)
}

/// The tuple that defines an escrow session (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub operator: Address,
    pub payer: Address,
    pub receiver: Address,
    pub token: Address,
    pub max_amount: U256,
    pub pre_approval_expiry: UnixTimestamp,
    pub authorization_expiry: UnixTimestamp,
    pub refund_expiry: UnixTimestamp,
    pub min_fee_bps: u16,
    pub max_fee_bps: u16,
    pub fee_receiver: Address,
    pub salt: U256,
}

/// A `PaymentInfo` with the payer zeroed out, the canonical input to the
/// session-id hash (spec §3: "Identity: `sessionId = keccak256(...)` ...
/// the payer is set to zero in the hash input").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentInfoForHash(pub PaymentInfo);

/// Why a `PaymentInfo` fails its field invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PaymentInfoInvariantError {
    #[error("minFeeBps must be <= maxFeeBps <= 10000")]
    FeeBpsOutOfOrder,
    #[error("preApprovalExpiry must be <= authorizationExpiry <= refundExpiry")]
    ExpiryOutOfOrder,
    #[error("maxAmount exceeds 2^120 - 1")]
    MaxAmountTooLarge,
}

impl PaymentInfo {
    /// Checks the invariants from spec §3: fee bounds, expiry ordering, and
    /// the amount width the escrow contract can pack.
    pub fn validate(&self) -> Result<(), PaymentInfoInvariantError> {
        if self.min_fee_bps > self.max_fee_bps || self.max_fee_bps > 10_000 {
            return Err(PaymentInfoInvariantError::FeeBpsOutOfOrder);
        }
        if !(self.pre_approval_expiry <= self.authorization_expiry
            && self.authorization_expiry <= self.refund_expiry)
        {
            return Err(PaymentInfoInvariantError::ExpiryOutOfOrder);
        }
        if self.max_amount > max_amount() {
            return Err(PaymentInfoInvariantError::MaxAmountTooLarge);
        }
        Ok(())
    }

    /// Returns the canonical, payer-zeroed form used as session-id hash input.
    pub fn for_hash(&self) -> PaymentInfoForHash {
        let mut zeroed = self.clone();
        zeroed.payer = Address::ZERO;
        PaymentInfoForHash(zeroed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PaymentInfo {
        PaymentInfo {
            operator: Address::ZERO,
            payer: Address::repeat_byte(1),
            receiver: Address::repeat_byte(2),
            token: Address::repeat_byte(3),
            max_amount: U256::from(1_000_000u64),
            pre_approval_expiry: UnixTimestamp::from_secs(100),
            authorization_expiry: UnixTimestamp::from_secs(200),
            refund_expiry: UnixTimestamp::from_secs(300),
            min_fee_bps: 0,
            max_fee_bps: 0,
            fee_receiver: Address::ZERO,
            salt: U256::from(42u64),
        }
    }

    #[test]
    fn validates_well_formed_payment_info() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn rejects_fee_bps_out_of_order() {
        let mut p = sample();
        p.min_fee_bps = 500;
        p.max_fee_bps = 100;
        assert_eq!(p.validate(), Err(PaymentInfoInvariantError::FeeBpsOutOfOrder));
    }

    #[test]
    fn rejects_fee_bps_above_10000() {
        let mut p = sample();
        p.max_fee_bps = 10_001;
        assert_eq!(p.validate(), Err(PaymentInfoInvariantError::FeeBpsOutOfOrder));
    }

    #[test]
    fn rejects_expiry_out_of_order() {
        let mut p = sample();
        p.authorization_expiry = UnixTimestamp::from_secs(50);
        assert_eq!(p.validate(), Err(PaymentInfoInvariantError::ExpiryOutOfOrder));
    }

    #[test]
    fn for_hash_zeroes_payer() {
        let p = sample();
        let zeroed = p.for_hash();
        assert_eq!(zeroed.0.payer, Address::ZERO);
        assert_eq!(zeroed.0.receiver, p.receiver);
    }
}
