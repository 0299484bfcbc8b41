//! Off-chain recovery of the payer address from an ERC-3009
//! `TransferWithAuthorization` signature, so the session/usage engine can
//! reject a bad signature before spending gas on `authorize`/`capture` (the
//! on-chain token collector re-derives and checks the same hash; this is a
//! fail-fast, not the source of truth).

use alloy_primitives::{Address, B256, Bytes, Signature};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain};

use crate::contracts::TransferWithAuthorization;
use crate::error::Eip155ChainError;

/// EIP-712 domain parameters for the accepted token, either supplied by the
/// resource server (`PaymentRequirements.extra`) or read from the token
/// contract's `name()`/`version()`.
#[derive(Debug, Clone)]
pub struct TokenEip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl TokenEip712Domain {
    fn as_domain(&self) -> Eip712Domain {
        eip712_domain! {
            name: self.name.clone(),
            version: self.version.clone(),
            chain_id: self.chain_id,
            verifying_contract: self.verifying_contract,
        }
    }
}

/// Recovers the EOA address that signed an ERC-3009 `transferWithAuthorization`.
///
/// Only 65-byte EOA signatures are supported (spec scope: payers are
/// wallets/agents, not smart-contract accounts).
pub fn recover_payer(
    domain: &TokenEip712Domain,
    from: Address,
    to: Address,
    value: alloy_primitives::U256,
    valid_after: u64,
    valid_before: u64,
    nonce: B256,
    signature: &Bytes,
) -> Result<Address, Eip155ChainError> {
    if signature.len() != 65 {
        return Err(Eip155ChainError::SignatureRecovery(format!(
            "expected a 65-byte EOA signature, got {} bytes",
            signature.len()
        )));
    }
    let sig = Signature::from_raw(signature)
        .map_err(|e| Eip155ChainError::SignatureRecovery(e.to_string()))?;

    let message = TransferWithAuthorization {
        from,
        to,
        value,
        validAfter: alloy_primitives::U256::from(valid_after),
        validBefore: alloy_primitives::U256::from(valid_before),
        nonce,
    };
    let hash = message.eip712_signing_hash(&domain.as_domain());

    sig.recover_address_from_prehash(&hash)
        .map_err(|e| Eip155ChainError::SignatureRecovery(e.to_string()))
}

/// Verifies a recovered signer matches the claimed payer.
pub fn assert_signer_is_payer(
    domain: &TokenEip712Domain,
    claimed_payer: Address,
    to: Address,
    value: alloy_primitives::U256,
    valid_after: u64,
    valid_before: u64,
    nonce: B256,
    signature: &Bytes,
) -> Result<(), Eip155ChainError> {
    let recovered =
        recover_payer(domain, claimed_payer, to, value, valid_after, valid_before, nonce, signature)?;
    if recovered == claimed_payer {
        Ok(())
    } else {
        Err(Eip155ChainError::SignatureMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    #[test]
    fn recovers_the_signing_address() {
        let signer = PrivateKeySigner::random();
        let domain = TokenEip712Domain {
            name: "USD Coin".into(),
            version: "2".into(),
            chain_id: 8453,
            verifying_contract: Address::repeat_byte(0xAA),
        };
        let to = Address::repeat_byte(0xBB);
        let value = U256::from(1_000_000u64);
        let nonce = B256::repeat_byte(0x01);

        let message = TransferWithAuthorization {
            from: signer.address(),
            to,
            value,
            validAfter: U256::ZERO,
            validBefore: U256::from(u64::MAX),
            nonce,
        };
        let hash = message.eip712_signing_hash(&domain.as_domain());
        let signature = signer.sign_hash_sync(&hash).unwrap();
        let signature_bytes = Bytes::from(signature.as_bytes().to_vec());

        let recovered =
            recover_payer(&domain, signer.address(), to, value, 0, u64::MAX, nonce, &signature_bytes)
                .unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn rejects_wrong_length_signature() {
        let domain = TokenEip712Domain {
            name: "USD Coin".into(),
            version: "2".into(),
            chain_id: 8453,
            verifying_contract: Address::ZERO,
        };
        let result = recover_payer(
            &domain,
            Address::ZERO,
            Address::ZERO,
            U256::ZERO,
            0,
            0,
            B256::ZERO,
            &Bytes::from(vec![0u8; 10]),
        );
        assert!(result.is_err());
    }
}
