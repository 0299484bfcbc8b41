//! x402 escrow facilitator HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server exposing the x402 escrow
//! facilitator's protocol interface (`/verify`, `/settle`, `/supported`),
//! the cron-triggered batch capture endpoint, and the payer-facing reclaim
//! dashboard endpoints, all running against EIP-155 (EVM) networks.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS` control the Postgres store
//! - `JWT_SECRET`, `CRON_SECRET` gate payer and cron authentication
//! - `OTEL_*` variables enable tracing to systems like Honeycomb (telemetry feature)

mod config;
mod run;

use std::process;

use crate::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}
