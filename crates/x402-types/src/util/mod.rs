//! Utility types and functions for x402.
//!
//! This module provides various helper types used throughout the x402 crate:
//!
//! - [`b64`] - Base64 encoding/decoding utilities

pub mod b64;

pub use b64::*;
