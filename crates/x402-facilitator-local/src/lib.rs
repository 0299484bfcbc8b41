#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Local facilitator implementation for the x402 escrow payment protocol.
//!
//! Requests land on the [`handlers`] API surface, are authenticated in
//! [`auth`] and rate-limited in [`rate_limit`], and are then dispatched by
//! [`scheme_router`] to either a direct ERC-3009 transfer (the deprecated
//! `exact` scheme) or the [`session_engine`], which owns the escrow session
//! lifecycle: creation, usage debits, inline tier-3 capture, and reclaim.
//! [`capture_scheduler`] and [`reclaim::ReclaimOrchestrator`] run the
//! batched, cron- and payer-triggered counterparts of that same lifecycle.
//! [`convert`] bridges the store's string-column rows to the typed values
//! the chain adapter needs; [`error`] and [`config`] are the shared error
//! taxonomy and tunables every other module depends on.
//!
//! # Modules
//!
//! - [`error`] - the facilitator's HTTP-visible error type
//! - [`config`] - engine tunables (capture tiers, timeouts)
//! - [`auth`] - API key, payer JWT, and cron secret authentication
//! - [`rate_limit`] - process-local rate limiting
//! - [`convert`] - store row <-> chain adapter type conversions
//! - [`session_engine`] - escrow session creation, usage, and reclaim
//! - [`scheme_router`] - dispatches `/verify` and `/settle` by scheme
//! - [`capture_scheduler`] - batched tier-1/tier-2 capture sweeps
//! - [`reclaim`] - payer-triggered reclaim-all across sessions
//! - [`handlers`] - HTTP endpoints and application state
//! - [`util`] - graceful shutdown and telemetry

pub mod auth;
pub mod capture_scheduler;
pub mod config;
pub mod convert;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod reclaim;
pub mod scheme_router;
pub mod session_engine;
pub mod util;

pub use config::EngineConfig;
pub use error::ApiError;
pub use handlers::AppState;
