//! EVM chain adapter for the x402 escrow facilitator.
//!
//! This crate is the only place in the workspace that knows the escrow
//! contract's ABI. It owns:
//!
//! - [`config`] - per-network configuration (RPC endpoints, escrow/collector/
//!   Multicall3 addresses, operator signer keys)
//! - [`provider`] - the operator wallet: nonce-managed transaction submission,
//!   round-robin signer selection, and Multicall3 batching
//! - [`contracts`] - `sol!` bindings for the escrow contract, ERC-20, and
//!   Multicall3
//! - [`eip712`] - off-chain recovery of the payer address from an ERC-3009
//!   `TransferWithAuthorization` signature
//! - [`error`] - the chain-level error taxonomy, mapped onto
//!   [`x402_types::error::ErrorCode`] at the boundary
//!
//! Session identity (the `paymentInfoHash`) is never recomputed locally: the
//! escrow contract's `getHash` is the canonical source, per the read-only
//! helper in [`provider::Eip155Provider::payment_info_hash`].

pub mod config;
pub mod contracts;
pub mod eip712;
pub mod error;
pub mod pending_nonce_manager;
pub mod provider;

pub use config::NetworkConfig;
pub use error::Eip155ChainError;
pub use provider::{Eip155Provider, EscrowCall};
