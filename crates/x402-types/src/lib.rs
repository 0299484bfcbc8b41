//! Shared value types for the x402 escrow facilitator.
//!
//! This crate is blockchain-agnostic: it defines the wire shapes, the error
//! taxonomy, and the `PaymentInfo` value object that the chain adapter, the
//! store, and the session engine all share. Chain-specific behavior (EIP-712
//! recovery, contract calls) lives in `x402-chain-eip155`.
//!
//! # Modules
//!
//! - [`chain`] - CAIP-2 chain identifiers
//! - [`networks`] - registry of well-known eip155 networks
//! - [`payment_info`] - the `PaymentInfo` value object and session identity
//! - [`proto`] - wire format types for `/verify`, `/settle`, `/supported`
//! - [`error`] - the error code taxonomy shared across the workspace
//! - [`timestamp`] - Unix timestamp utility used in authorization windows
//! - [`util`] - base64 and human-readable money amount helpers

pub mod chain;
pub mod error;
pub mod networks;
pub mod payment_info;
pub mod proto;
pub mod timestamp;
pub mod util;
