//! x402 escrow facilitator HTTP entrypoint.
//!
//! Builds the chain registry (one [`Eip155Provider`] per configured
//! network), the Postgres-backed store, the four engine components, and the
//! Axum router, then serves with graceful shutdown on SIGTERM/SIGINT. A
//! background task additionally runs the capture sweep on a fixed interval,
//! independent of any external cron hitting `POST /capture`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use x402_chain_eip155::provider::Eip155Provider;
use x402_facilitator_local::capture_scheduler::CaptureScheduler;
use x402_facilitator_local::handlers::{self, AppState};
use x402_facilitator_local::rate_limit::RateLimiters;
use x402_facilitator_local::reclaim::ReclaimOrchestrator;
use x402_facilitator_local::scheme_router::SchemeRouter;
use x402_facilitator_local::session_engine::SessionEngine;
use x402_facilitator_local::util::SigDown;
#[cfg(feature = "telemetry")]
use x402_facilitator_local::util::Telemetry;
use x402_store::postgres::PgStore;
use x402_types::chain::{ChainRegistry, FromConfig};
use x402_types::timestamp::UnixTimestamp;

use crate::config::Config;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .expect("failed to initialize rustls crypto provider");

    dotenv().ok();

    #[cfg(feature = "telemetry")]
    let _telemetry = Telemetry::new();
    #[cfg(not(feature = "telemetry"))]
    tracing_subscriber::fmt::init();

    let config = Config::load()?;

    let mut providers = HashMap::new();
    for (chain_id, network_config) in &config.networks {
        let provider = Eip155Provider::from_config(network_config).await?;
        providers.insert(chain_id.clone(), provider);
    }
    let chains: Arc<ChainRegistry<Eip155Provider>> = Arc::new(ChainRegistry::new(providers));

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(pool));

    let engine_config = Arc::new(config.engine.clone());
    let engine = Arc::new(SessionEngine::new(store.clone(), chains.clone(), engine_config.clone()));
    let router = Arc::new(SchemeRouter::new(store.clone(), engine.clone(), chains.clone()));
    let scheduler = Arc::new(CaptureScheduler::new(store.clone(), chains.clone(), engine_config.clone()));
    let reclaim = Arc::new(ReclaimOrchestrator::new(store.clone(), chains.clone()));

    let state = AppState {
        store: store.clone(),
        chains,
        engine,
        router,
        scheduler: scheduler.clone(),
        reclaim,
        config: engine_config,
        rate_limiters: Arc::new(RateLimiters::default()),
        jwt_secret: Arc::new(config.jwt_secret.clone()),
        cron_secret: Arc::new(config.cron_secret.clone()),
    };

    let app = Router::new()
        .merge(handlers::routes::<PgStore>().with_state(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("starting server at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await;
    let listener = listener.inspect_err(|e| tracing::error!("failed to bind to {}: {}", addr, e))?;

    let sig_down = SigDown::try_new()?;
    let shutdown_token = sig_down.cancellation_token();
    let sweep_token = sig_down.cancellation_token();
    let sweep_interval = config.capture_sweep_interval;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now_secs = UnixTimestamp::now().as_secs() as i64;
                    if let Err(err) = scheduler.run_once(now_secs).await {
                        tracing::warn!(error = %err, "background capture sweep failed");
                    }
                }
                _ = sweep_token.cancelled() => break,
            }
        }
    });

    let graceful_shutdown = async move { shutdown_token.cancelled().await };
    axum::serve(listener, app).with_graceful_shutdown(graceful_shutdown).await?;

    Ok(())
}
