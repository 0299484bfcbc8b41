//! Conversions between the store's string-column [`Session`] rows and the
//! typed [`PaymentInfo`] the chain adapter needs to reconstruct a contract
//! call. The store never does EVM arithmetic (see `x402-store`'s grounding
//! notes), so every address/amount round-trips through `FromStr`/`Display`
//! at this crate's boundary instead.

use alloy_primitives::{Address, U256};
use std::str::FromStr;
use x402_store::models::Session;
use x402_types::error::ErrorCode;
use x402_types::payment_info::PaymentInfo;
use x402_types::timestamp::UnixTimestamp;

use crate::error::ApiError;

fn bad_row() -> ApiError {
    tracing::error!("session row failed to parse back into PaymentInfo");
    ApiError::new(ErrorCode::InternalError)
}

pub fn session_to_payment_info(session: &Session) -> Result<PaymentInfo, ApiError> {
    Ok(PaymentInfo {
        operator: Address::from_str(&session.operator).map_err(|_| bad_row())?,
        payer: Address::from_str(&session.payer).map_err(|_| bad_row())?,
        receiver: Address::from_str(&session.receiver).map_err(|_| bad_row())?,
        token: Address::from_str(&session.token).map_err(|_| bad_row())?,
        max_amount: U256::from_str(&session.authorized_amount).map_err(|_| bad_row())?,
        pre_approval_expiry: UnixTimestamp::from_secs(session.pre_approval_expiry as u64),
        authorization_expiry: UnixTimestamp::from_secs(session.authorization_expiry as u64),
        refund_expiry: UnixTimestamp::from_secs(session.refund_expiry as u64),
        min_fee_bps: session.min_fee_bps as u16,
        max_fee_bps: session.max_fee_bps as u16,
        fee_receiver: Address::from_str(&session.fee_receiver).map_err(|_| bad_row())?,
        salt: U256::from_str(&session.salt).map_err(|_| bad_row())?,
    })
}

pub fn u256_to_u128(amount: U256) -> Result<u128, ApiError> {
    u128::try_from(amount).map_err(|_| ApiError::new(ErrorCode::DepositOutOfBounds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use x402_store::models::SessionStatus;

    fn sample_session() -> Session {
        Session {
            id: "0xsession".to_string(),
            network_id: "eip155:8453".to_string(),
            user_id: Uuid::new_v4(),
            payer: "0x1111111111111111111111111111111111111111".to_string(),
            receiver: "0x2222222222222222222222222222222222222222".to_string(),
            token: "0x3333333333333333333333333333333333333333".to_string(),
            authorized_amount: "100000".to_string(),
            authorization_expiry: Utc::now().timestamp() + 3600,
            refund_expiry: Utc::now().timestamp() + 7200,
            pre_approval_expiry: Utc::now().timestamp() - 1,
            operator: "0x4444444444444444444444444444444444444444".to_string(),
            salt: "7".to_string(),
            min_fee_bps: 10,
            max_fee_bps: 50,
            fee_receiver: "0x5555555555555555555555555555555555555555".to_string(),
            authorize_tx_hash: "0xauth".to_string(),
            void_tx_hash: None,
            session_token_hash: "tokhash".to_string(),
            status: SessionStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn session_to_payment_info_round_trips_every_field() {
        let session = sample_session();
        let info = session_to_payment_info(&session).unwrap();
        assert_eq!(info.payer, Address::from_str(&session.payer).unwrap());
        assert_eq!(info.operator, Address::from_str(&session.operator).unwrap());
        assert_eq!(info.max_amount, U256::from(100_000u128));
        assert_eq!(info.min_fee_bps, 10);
        assert_eq!(info.max_fee_bps, 50);
        assert_eq!(info.salt, U256::from(7u128));
    }

    #[test]
    fn session_to_payment_info_rejects_unparseable_address() {
        let mut session = sample_session();
        session.payer = "not-an-address".to_string();
        let err = session_to_payment_info(&session).unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[test]
    fn u256_to_u128_accepts_in_range_value() {
        assert_eq!(u256_to_u128(U256::from(42u128)).unwrap(), 42u128);
    }

    #[test]
    fn u256_to_u128_rejects_overflowing_value() {
        let too_big = U256::from(u128::MAX) + U256::from(1u128);
        let err = u256_to_u128(too_big).unwrap_err();
        assert_eq!(err.code, ErrorCode::DepositOutOfBounds);
    }
}
