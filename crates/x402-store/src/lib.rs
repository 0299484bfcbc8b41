//! Transactional store for the x402 escrow facilitator.
//!
//! Owns the networks / users / api_keys / sessions / usage_logs /
//! capture_logs schema (spec §3) and the atomic stored-procedure-style
//! operations the Session Engine, Capture Scheduler, and Reclaim Orchestrator
//! depend on (spec §4.3), behind the [`Store`] trait so the engine never
//! depends on a concrete database.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::Store;
